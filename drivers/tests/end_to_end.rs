use std::fs;
use std::path::Path;
use xpt_common::{PinMode, PlatformType, XptError, result_code};
use xpt_drivers::board::{Board, Capabilities, PinInfo, Routing};
use xpt_drivers::hal::gpio::Direction;
use xpt_drivers::peripheral::gpio::Gpio;
use xpt_drivers::peripheral::pwm::Pwm;
use xpt_drivers::{Config, Io};

const RAW_PIN: u32 = 17;

fn one_pin_board() -> Board {
    let mut board = Board::new(PlatformType::Other(11), "one pin");
    board.pins = vec![PinInfo::new("IO0", Capabilities::GPIO).with_gpio(Routing::new(RAW_PIN))];
    board.gpio_count = 1;
    board
}

/// A sysfs tree where writing to `export` is accepted but creates nothing,
/// so the pin directory is prepared up front.
fn sysfs(root: &Path) {
    let class = root.join("class/gpio");
    let pin = class.join(format!("gpio{}", RAW_PIN));
    fs::create_dir_all(&pin).unwrap();
    fs::write(class.join("export"), "").unwrap();
    fs::write(class.join("unexport"), "").unwrap();
    fs::write(pin.join("value"), "0").unwrap();
    fs::write(pin.join("direction"), "in").unwrap();
}

// The process-wide session is shared, so everything touching it runs in one test.
#[test]
fn test_one_pin_board() {
    let root = tempfile::tempdir().unwrap();
    sysfs(root.path());

    assert_eq!(xpt_drivers::session().err(), Some(XptError::PlatformNotInitialised));
    let session =
        xpt_drivers::init_board(Config::default().with_sysfs_root(root.path()), one_pin_board())
            .unwrap();
    // A second init hands back the same session.
    let again = xpt_drivers::init_board(Config::default(), Board::null()).unwrap();
    assert_eq!(again.platform_name(), "one pin");

    assert_eq!(session.pin_count(), 1);
    assert!(session.pin_mode_test(0, PinMode::Gpio));
    assert_eq!(session.gpio_lookup("IO0"), Some(RAW_PIN));
    assert_eq!(session.adc_raw_bits(), 0);

    let pwm = Pwm::init(&session, 0);
    assert_eq!(pwm.as_ref().err(), Some(&XptError::FeatureNotSupported));
    assert_eq!(result_code(&pwm), 2);
    assert_eq!(Gpio::init(&session, 1).err(), Some(XptError::InvalidResource));

    let mut gpio = Gpio::init(&session, 0).unwrap();
    assert_eq!(gpio.read_dir(), Ok(Direction::In));
    gpio.dir(Direction::Out).unwrap();
    assert_eq!(gpio.read_dir(), Ok(Direction::Out));
    gpio.write(1).unwrap();
    assert_eq!(gpio.read(), Ok(1));
    gpio.close().unwrap();

    match xpt_drivers::session().unwrap().init_io("GPIO-0").unwrap() {
        Io::Gpio(mut gpio) => assert_eq!(gpio.read(), Ok(1)),
        other => panic!("unexpected context {:?}", other),
    }
    assert_eq!(session.init_io("AIO-RAW-0").err(), Some(XptError::InvalidParameter));
    assert_eq!(session.init_io("LCD-0").err(), Some(XptError::InvalidParameter));

    xpt_drivers::deinit();
    assert_eq!(xpt_drivers::session().err(), Some(XptError::PlatformNotInitialised));
    // Contexts keep working after the global session is gone.
    let mut gpio = Gpio::init(&session, 0).unwrap();
    gpio.write(0).unwrap();
    assert_eq!(gpio.read(), Ok(0));
}

#[test]
fn test_one_pin_board_over_hooks() {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI32, Ordering};
    use xpt_common::Result;
    use xpt_drivers::dispatch::{AdvanceFunc, GpioHooks, OpHooks};
    use xpt_drivers::Session;

    let level = Arc::new(AtomicI32::new(0));
    let (write_level, read_level) = (level.clone(), level.clone());
    let board = one_pin_board().with_adv_func(AdvanceFunc {
        gpio: GpioHooks {
            init_internal_replace: Some(Arc::new(|_: &mut Gpio, _: u32| -> Result<()> { Ok(()) })),
            close_replace: Some(Arc::new(|_: &mut Gpio| -> Result<()> { Ok(()) })),
            write: OpHooks {
                replace: Some(Arc::new(move |_: &mut Gpio, value: i32| -> Result<()> {
                    write_level.store(value, Ordering::SeqCst);
                    Ok(())
                })),
                ..OpHooks::default()
            },
            read_replace: Some(Arc::new(move |_: &mut Gpio, _: ()| -> Result<i32> {
                Ok(read_level.load(Ordering::SeqCst))
            })),
            ..GpioHooks::default()
        },
        ..AdvanceFunc::default()
    });
    let session = Session::new(Config::default(), board).unwrap();

    let mut gpio = Gpio::init(&session, 0).unwrap();
    assert_eq!(Pwm::init(&session, 0).err(), Some(XptError::FeatureNotSupported));
    gpio.write(1).unwrap();
    assert_eq!(gpio.read(), Ok(1));
    assert_eq!(level.load(Ordering::SeqCst), 1);
}
