use std::sync::{Arc, Mutex};
use xpt_common::{PinMode, PlatformOffset, PlatformType, Result, XptError, sub_platform_id};
use xpt_drivers::board::{Board, I2cBus};
use xpt_drivers::dispatch::I2cHooks;
use xpt_drivers::peripheral::gpio::Gpio;
use xpt_drivers::peripheral::i2c::I2c;
use xpt_drivers::platform::Platform;
use xpt_drivers::platform::grovepi;
use xpt_drivers::platform::mock::{self, MockPlatform};
use xpt_drivers::{Config, Io, Session};

type Frames = Arc<Mutex<Vec<Vec<u8>>>>;

/// The mock board with its I2C bus swapped for a recorder of GrovePi frames.
fn bridge(frames: &Frames) -> Board {
    let mut board = MockPlatform::board();
    let mut table = (*board.adv_func).clone();
    let frames = frames.clone();
    table.i2c = I2cHooks {
        init_bus_replace: Some(Arc::new(|_: &mut I2c| -> Result<()> { Ok(()) })),
        address_replace: Some(Arc::new(|dev: &mut I2c, addr: u8| -> Result<()> {
            assert_eq!(dev.addr(), Some(addr));
            Ok(())
        })),
        write_byte_replace: Some(Arc::new(|_: &mut I2c, _: u8| -> Result<()> { Ok(()) })),
        write_replace: Some(Arc::new(move |dev: &mut I2c, data: &[u8]| -> Result<()> {
            assert_eq!(dev.addr(), Some(grovepi::ADDRESS));
            frames.lock().unwrap().push(data.to_vec());
            Ok(())
        })),
        read_replace: Some(Arc::new(|_: &mut I2c, buf: &mut [u8]| -> Result<usize> {
            buf.fill(0);
            buf[0] = 1;
            Ok(buf.len())
        })),
        ..I2cHooks::default()
    };
    board.i2c_buses = vec![I2cBus {
        name: Some("i2c-0".into()),
        bus_id: Some(0),
        ..I2cBus::default()
    }];
    board.adv_func = Arc::new(table);
    board
}

#[test]
fn test_sub_ids_need_a_sub_platform() {
    let session = Session::new(Config::default(), MockPlatform::board()).unwrap();
    assert!(!session.has_sub_platform());
    assert_eq!(Gpio::init(&session, sub_platform_id(0)).err(), Some(XptError::InvalidHandle));
    assert_eq!(session.pin_name(sub_platform_id(0)), None);
    assert_eq!(session.platform_pin_count(PlatformOffset::Sub), 0);
    assert_eq!(session.remove_subplatform(PlatformType::GrovePi), Err(XptError::InvalidParameter));
}

#[test]
fn test_unsupported_sub_platforms() {
    let session = Session::new(Config::default(), MockPlatform::board()).unwrap();
    assert_eq!(
        session.add_subplatform(PlatformType::GenericFirmata, "/dev/ttyACM0"),
        Err(XptError::InvalidParameter)
    );
    assert_eq!(
        session.add_subplatform(PlatformType::GrovePi, "bus zero"),
        Err(XptError::InvalidParameter)
    );
    assert_eq!(
        session.add_subplatform(PlatformType::Mock, "0"),
        Err(XptError::InvalidParameter)
    );
    assert_eq!(
        session.remove_subplatform(PlatformType::FtdiFt4222),
        Err(XptError::InvalidParameter)
    );
}

#[test]
fn test_grovepi_addressing() {
    let frames = Frames::default();
    let session = Session::new(Config::default(), bridge(&frames)).unwrap();
    session.add_subplatform(PlatformType::GrovePi, "0").unwrap();
    assert_eq!(
        session.add_subplatform(PlatformType::GrovePi, "0"),
        Err(XptError::FeatureNotSupported)
    );

    assert!(session.has_sub_platform());
    assert_eq!(
        session.platform_name(),
        format!("{} + {}", mock::PLATFORM_NAME, grovepi::PLATFORM_NAME)
    );
    assert_eq!(session.platform_pin_count(PlatformOffset::Sub), 14);
    assert_eq!(session.pin_count(), 11);
    assert_eq!(session.pin_name(sub_platform_id(11)).as_deref(), Some("A1"));
    assert_eq!(session.pin_name(sub_platform_id(13)).as_deref(), Some("A3"));
    // The shield has 14 pins; ids past it do not fall through to the primary.
    assert_eq!(session.pin_name(sub_platform_id(14)), None);
    assert!(!session.pin_mode_test(sub_platform_id(14), PinMode::Gpio));
    assert_eq!(
        Gpio::init(&session, sub_platform_id(14)).err(),
        Some(XptError::InvalidResource)
    );
    assert_eq!(session.pin_name(1).as_deref(), Some("GPIO1"));
    assert!(session.pin_mode_test(sub_platform_id(5), PinMode::Pwm));
    assert!(!session.pin_mode_test(sub_platform_id(4), PinMode::Pwm));
    assert_eq!(
        session.platform_combined_type(),
        PlatformType::Mock.id() | (PlatformType::GrovePi.id() << 8)
    );
    assert_eq!(session.platform_version(PlatformOffset::Sub).as_deref(), Some("1.2.7"));

    // Pin 2 on the primary and on the shield are different pins.
    let mut shield = Gpio::init(&session, sub_platform_id(2)).unwrap();
    shield.write(1).unwrap();
    assert_eq!(shield.read(), Ok(1));
    let mut local = Gpio::init(&session, 1).unwrap();
    assert_eq!(local.read(), Ok(0));

    let frames = frames.lock().unwrap().clone();
    assert_eq!(
        frames,
        vec![
            vec![grovepi::REGISTER, grovepi::GPIO_WRITE, 2, 1, 0],
            vec![grovepi::REGISTER, grovepi::GPIO_READ, 2, 0, 0],
        ]
    );

    match session.init_io("gpio-514").unwrap() {
        Io::Gpio(gpio) => assert_eq!(gpio.pin_raw(), 2),
        other => panic!("unexpected context {:?}", other),
    }

    session.remove_subplatform(PlatformType::GrovePi).unwrap();
    assert_eq!(session.platform_name(), mock::PLATFORM_NAME);
}
