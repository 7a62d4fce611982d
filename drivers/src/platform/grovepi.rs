//! GrovePi+ shield, attached as a sub-platform over I2C.
//!
//! The shield's microcontroller takes 5-byte command frames
//! `[REGISTER, command, pin, value, 0]` at address [`ADDRESS`]. Reads
//! follow the frame with a one-byte write and then read back one byte
//! (digital) or three bytes (analog, big-endian value in bytes 1..3).

use crate::board::{Board, Capabilities, PinInfo, Routing};
use crate::dispatch::{AdvanceFunc, AioHooks, GpioHooks, OpHooks, PwmHooks};
use crate::hal::gpio::{Direction, DriveMode};
use crate::peripheral::aio::Aio;
use crate::peripheral::gpio::Gpio;
use crate::peripheral::i2c::I2c;
use crate::peripheral::pwm::Pwm;
use crate::registry::Session;
use log::{info, warn};
use spin::Mutex;
use std::sync::Arc;
use xpt_common::{PlatformType, Result, XptError};

pub const ADDRESS: u8 = 0x04;
pub const REGISTER: u8 = 0x01;
pub const GPIO_READ: u8 = 0x01;
pub const GPIO_WRITE: u8 = 0x02;
pub const AIO_READ: u8 = 0x03;
pub const PWM: u8 = 0x04;
pub const GPIO_MODE: u8 = 0x05;

pub const PLATFORM_NAME: &str = "grovepi";
const FIRMWARE_VERSION: &str = "1.2.7";
const GPIO_COUNT: usize = 10;
const PWM_PINS: [u32; 4] = [3, 5, 6, 9];
/// The shield runs its PWM at a fixed period.
pub const PWM_PERIOD_US: u32 = 2048;

/// Shared handle to the shield's bus.
#[derive(Clone)]
struct Link {
    bus: Arc<Mutex<I2c>>,
}

impl Link {
    fn send(&self, command: u8, pin: u32, value: u8) -> Result<()> {
        let pin = u8::try_from(pin).map_err(|_| XptError::InvalidResource)?;
        let mut bus = self.bus.lock();
        bus.write(&[REGISTER, command, pin, value, 0]).map_err(|err| {
            warn!("grovepi: failed to write command to i2c bus {}: {}", bus.bus(), err);
            XptError::Unspecified
        })
    }

    fn query(&self, command: u8, pin: u32) -> Result<u32> {
        self.send(command, pin, 0)?;
        let mut bus = self.bus.lock();
        bus.write_byte(1).map_err(|err| {
            warn!("grovepi: failed to write to i2c bus {}: {}", bus.bus(), err);
            XptError::Unspecified
        })?;
        let mut result = [0u8; 3];
        let len = if command == AIO_READ { 3 } else { 1 };
        bus.read(&mut result[..len]).map_err(|err| {
            warn!("grovepi: failed to read result from i2c bus {}: {}", bus.bus(), err);
            XptError::Unspecified
        })?;
        Ok(match command {
            AIO_READ => (u32::from(result[1]) << 8) | u32::from(result[2]),
            _ => u32::from(result[0]),
        })
    }
}

/// Open the shield on I2C bus `bus` of `session`'s primary board and describe it.
pub fn board(session: &Session, bus: u32) -> Result<Board> {
    let mut i2c = I2c::init(session, bus)?;
    i2c.address(ADDRESS)?;
    let link = Link {
        bus: Arc::new(Mutex::new(i2c)),
    };
    let duty_cache = Arc::new(Mutex::new([0u8; GPIO_COUNT]));

    let mut board = Board::new(PlatformType::GrovePi, PLATFORM_NAME);
    board.platform_version = Some(FIRMWARE_VERSION.into());
    board.pins = (0..GPIO_COUNT as u32)
        .map(|pin| {
            let mut info = PinInfo::new(format!("IO{}", pin), Capabilities::GPIO)
                .with_gpio(Routing::new(pin));
            if PWM_PINS.contains(&pin) {
                info.capabilities |= Capabilities::PWM;
                info = info.with_pwm(Routing::new(pin));
            }
            info
        })
        .chain((0..4u32).map(|channel| {
            let pin = GPIO_COUNT as u32 + channel;
            PinInfo::new(format!("A{}", channel), Capabilities::GPIO | Capabilities::AIO)
                .with_gpio(Routing::new(pin))
                .with_aio(Routing::new(channel))
        }))
        .collect();
    board.gpio_count = GPIO_COUNT;
    board.aio_count = 4;
    board.adc_raw = 10;
    board.adc_supported = 10;
    board.pwm_min_period = PWM_PERIOD_US;
    board.pwm_max_period = PWM_PERIOD_US;

    info!("grovepi: shield found on i2c bus {}", bus);
    Ok(board.with_adv_func(AdvanceFunc {
        gpio: gpio_hooks(&link),
        aio: aio_hooks(&link),
        pwm: pwm_hooks(&link, &duty_cache),
        ..AdvanceFunc::default()
    }))
}

fn gpio_hooks(link: &Link) -> GpioHooks {
    let read_link = link.clone();
    let write_link = link.clone();
    GpioHooks {
        init_internal_replace: Some(Arc::new(|_: &mut Gpio, _: u32| -> Result<()> { Ok(()) })),
        close_replace: Some(Arc::new(|_: &mut Gpio| -> Result<()> { Ok(()) })),
        mode: OpHooks {
            replace: Some(Arc::new(|_: &mut Gpio, _: DriveMode| -> Result<()> {
                Err(XptError::FeatureNotImplemented)
            })),
            ..OpHooks::default()
        },
        dir: OpHooks {
            replace: Some(Arc::new(|_: &mut Gpio, _: Direction| -> Result<()> { Ok(()) })),
            ..OpHooks::default()
        },
        read_replace: Some(Arc::new(move |dev: &mut Gpio, _: ()| -> Result<i32> {
            let value = read_link.query(GPIO_READ, dev.pin_raw())?;
            Ok(value as i32)
        })),
        write: OpHooks {
            replace: Some(Arc::new(move |dev: &mut Gpio, value: i32| -> Result<()> {
                write_link.send(GPIO_WRITE, dev.pin_raw(), u8::from(value != 0))
            })),
            ..OpHooks::default()
        },
        ..GpioHooks::default()
    }
}

fn aio_hooks(link: &Link) -> AioHooks {
    let link = link.clone();
    AioHooks {
        init_internal_replace: Some(Arc::new(|_: &mut Aio, _: u32| -> Result<()> { Ok(()) })),
        close_replace: Some(Arc::new(|_: &mut Aio| -> Result<()> { Ok(()) })),
        read_replace: Some(Arc::new(move |dev: &mut Aio, _: ()| -> Result<u32> {
            link.query(AIO_READ, dev.channel())
        })),
        ..AioHooks::default()
    }
}

fn cached_duty(cache: &Mutex<[u8; GPIO_COUNT]>, pin: u32) -> Result<u8> {
    cache
        .lock()
        .get(pin as usize)
        .copied()
        .ok_or(XptError::InvalidResource)
}

fn pwm_hooks(link: &Link, cache: &Arc<Mutex<[u8; GPIO_COUNT]>>) -> PwmHooks {
    let write_link = link.clone();
    let enable_link = link.clone();
    let write_cache = Arc::clone(cache);
    let read_cache = Arc::clone(cache);
    let enable_cache = Arc::clone(cache);
    PwmHooks {
        init_internal_replace: Some(Arc::new(|_: &mut Pwm, _: u32| -> Result<()> { Ok(()) })),
        period_replace: Some(Arc::new(|_: &mut Pwm, _: u32| -> Result<()> {
            warn!("grovepi: the pwm period is fixed at {}us", PWM_PERIOD_US);
            Err(XptError::FeatureNotImplemented)
        })),
        write: OpHooks {
            replace: Some(Arc::new(move |dev: &mut Pwm, fraction: f32| -> Result<()> {
                let duty = (fraction * f32::from(u8::MAX)).round() as u8;
                let mut cache = write_cache.lock();
                let slot = cache
                    .get_mut(dev.pin() as usize)
                    .ok_or(XptError::InvalidResource)?;
                *slot = duty;
                drop(cache);
                write_link.send(PWM, dev.pin(), duty)
            })),
            ..OpHooks::default()
        },
        read_replace: Some(Arc::new(move |dev: &mut Pwm, _: ()| -> Result<f32> {
            let duty = cached_duty(&read_cache, dev.pin())?;
            Ok(f32::from(duty) / f32::from(u8::MAX))
        })),
        enable: OpHooks {
            replace: Some(Arc::new(move |dev: &mut Pwm, enable: bool| -> Result<()> {
                if enable {
                    let duty = cached_duty(&enable_cache, dev.pin())?;
                    enable_link.send(PWM, dev.pin(), duty)
                } else {
                    enable_link.send(GPIO_WRITE, dev.pin(), 0)
                }
            })),
            ..OpHooks::default()
        },
        ..PwmHooks::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::I2cBus;
    use crate::config::Config;
    use crate::dispatch::I2cHooks;
    use std::sync::Mutex as StdMutex;
    use xpt_common::sub_platform_id;

    /// Primary board whose only I2C bus records frames and answers reads with `reply`.
    fn primary(frames: Arc<StdMutex<Vec<Vec<u8>>>>, reply: Vec<u8>) -> Board {
        let mut board = Board::new(PlatformType::Mock, "bridge");
        board.i2c_buses = vec![I2cBus {
            bus_id: Some(1),
            ..I2cBus::default()
        }];
        board.with_adv_func(AdvanceFunc {
            i2c: I2cHooks {
                init_bus_replace: Some(Arc::new(|_: &mut I2c| -> Result<()> { Ok(()) })),
                address_replace: Some(Arc::new(|_: &mut I2c, _: u8| -> Result<()> { Ok(()) })),
                write_byte_replace: Some(Arc::new(|_: &mut I2c, _: u8| -> Result<()> { Ok(()) })),
                write_replace: Some(Arc::new(move |_: &mut I2c, data: &[u8]| -> Result<()> {
                    frames.lock().unwrap().push(data.to_vec());
                    Ok(())
                })),
                read_replace: Some(Arc::new(move |_: &mut I2c, buf: &mut [u8]| -> Result<usize> {
                    let len = buf.len();
                    buf.copy_from_slice(&reply[..len]);
                    Ok(len)
                })),
                ..I2cHooks::default()
            },
            ..AdvanceFunc::default()
        })
    }

    #[test]
    fn test_board_shape() {
        let frames = Arc::new(StdMutex::new(Vec::new()));
        let session = Session::new(Config::default(), primary(frames, vec![0; 3])).unwrap();
        let board = board(&session, 0).unwrap();
        assert_eq!(board.phy_pin_count(), 14);
        assert_eq!(board.pins[10].name, "A0");
        assert!(board.pins[9].capabilities.contains(Capabilities::PWM));
        assert!(!board.pins[4].capabilities.contains(Capabilities::PWM));
        assert_eq!(board.platform_version.as_deref(), Some(FIRMWARE_VERSION));
    }

    #[test]
    fn test_frames_through_sub_platform() {
        let frames = Arc::new(StdMutex::new(Vec::new()));
        let session =
            Session::new(Config::default(), primary(frames.clone(), vec![1, 0x02, 0x10])).unwrap();
        session.add_subplatform(PlatformType::GrovePi, "0").unwrap();

        let mut gpio = Gpio::init(&session, sub_platform_id(4)).unwrap();
        gpio.write(1).unwrap();
        assert_eq!(gpio.read(), Ok(1));
        assert_eq!(gpio.mode(DriveMode::PullUp), Err(XptError::FeatureNotImplemented));
        gpio.dir(Direction::Out).unwrap();

        let mut aio = Aio::init(&session, sub_platform_id(0)).unwrap();
        assert_eq!(aio.read(), Ok(0x210));

        let mut pwm = Pwm::init(&session, sub_platform_id(3)).unwrap();
        pwm.write(1.0).unwrap();
        assert_eq!(pwm.read(), Ok(1.0));
        assert_eq!(pwm.period_us(PWM_PERIOD_US), Err(XptError::FeatureNotImplemented));
        assert_eq!(pwm.period_us(1000), Err(XptError::InvalidParameter));
        pwm.enable(false).unwrap();
        assert_eq!(
            Pwm::init(&session, sub_platform_id(4)).err(),
            Some(XptError::FeatureNotSupported)
        );

        assert_eq!(
            *frames.lock().unwrap(),
            vec![
                vec![REGISTER, GPIO_WRITE, 4, 1, 0],
                vec![REGISTER, GPIO_READ, 4, 0, 0],
                vec![REGISTER, AIO_READ, 0, 0, 0],
                vec![REGISTER, PWM, 3, 255, 0],
                vec![REGISTER, GPIO_WRITE, 3, 0, 0],
            ]
        );
    }
}
