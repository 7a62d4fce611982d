//! In-memory board for tests and development hosts.
//!
//! Every primitive is a replace hook over shared state, so nothing touches
//! sysfs or device nodes:
//!
//! - GPIO keeps direction, level and edge mode per pin; a write that moves
//!   the level in the armed edge direction raises a pending interrupt.
//! - I2C emulates one device at [`I2C_DEV_ADDR`] with a register block of
//!   [`I2C_DEV_DATA_LEN`] bytes.
//! - SPI replies with every byte XOR [`SPI_REPLY_BYTE`] (words XOR
//!   [`SPI_REPLY_WORD`]).
//! - UART reads return [`UART_DATA_BYTE`].
//! - AIO reads return midscale at the context's resolution.

use super::Platform;
use crate::board::{AioDev, Board, Capabilities, I2cBus, PinInfo, Routing, SpiBus, UartDev};
use crate::dispatch::{
    AdvanceFunc, AioHooks, GpioHooks, I2cHooks, OpHooks, SpiHooks, UartHooks,
};
use crate::hal::gpio::{Direction, DriveMode, Edge};
use crate::hal::i2c::I2cMode;
use crate::hal::serial::Parity;
use crate::hal::spi::SpiMode;
use crate::peripheral::aio::Aio;
use crate::peripheral::gpio::Gpio;
use crate::peripheral::gpio::isr::IsrWaiter;
use crate::peripheral::i2c::I2c;
use crate::peripheral::spi::Spi;
use crate::peripheral::uart::Uart;
use log::{debug, error};
use spin::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use xpt_common::{PlatformType, Result, XptError};

pub const PLATFORM_NAME: &str = "Mock platform";
pub const GPIO_COUNT: usize = 2;
pub const I2C_DEV_ADDR: u8 = 0x33;
pub const I2C_DEV_DATA_LEN: usize = 10;
pub const I2C_DEV_DATA_INIT_BYTE: u8 = 0xAB;
pub const SPI_REPLY_BYTE: u8 = 0xAB;
pub const SPI_REPLY_WORD: u16 = 0xABBA;
/// ASCII `Z`.
pub const UART_DATA_BYTE: u8 = 0x5A;
pub const UART_DEV_PATH: &str = "/dev/ttyS0";

#[derive(Debug, Copy, Clone)]
struct MockPin {
    dir: Direction,
    value: i32,
    edge: Edge,
    drive: DriveMode,
    pending: bool,
}

impl Default for MockPin {
    fn default() -> Self {
        Self {
            dir: Direction::In,
            value: 0,
            edge: Edge::None,
            drive: DriveMode::Strong,
            pending: false,
        }
    }
}

#[derive(Debug)]
struct MockState {
    gpio: [MockPin; GPIO_COUNT],
    i2c: [u8; I2C_DEV_DATA_LEN],
}

type Shared = Arc<Mutex<MockState>>;

pub struct MockPlatform;

impl Platform for MockPlatform {
    fn name() -> &'static str {
        PLATFORM_NAME
    }

    fn board() -> Board {
        let state: Shared = Arc::new(Mutex::new(MockState {
            gpio: [MockPin::default(); GPIO_COUNT],
            i2c: [I2C_DEV_DATA_INIT_BYTE; I2C_DEV_DATA_LEN],
        }));

        let mut board = Board::new(PlatformType::Mock, PLATFORM_NAME);
        board.pins = vec![
            PinInfo::new("GPIO0", Capabilities::GPIO).with_gpio(Routing::new(0)),
            PinInfo::new("GPIO1", Capabilities::GPIO).with_gpio(Routing::new(1)),
            PinInfo::new("ADC0", Capabilities::AIO).with_aio(Routing::new(0)),
            PinInfo::new("I2C0SDA", Capabilities::I2C).with_i2c(Routing::new(0)),
            PinInfo::new("I2C0SCL", Capabilities::I2C).with_i2c(Routing::new(0)),
            PinInfo::new("SPI0CS", Capabilities::SPI).with_spi(Routing::new(0)),
            PinInfo::new("SPI0MOSI", Capabilities::SPI).with_spi(Routing::new(0)),
            PinInfo::new("SPI0MISO", Capabilities::SPI).with_spi(Routing::new(0)),
            PinInfo::new("SPI0SCLK", Capabilities::SPI).with_spi(Routing::new(0)),
            PinInfo::new("UART0RX", Capabilities::UART).with_uart(Routing::new(0)),
            PinInfo::new("UART0TX", Capabilities::UART).with_uart(Routing::new(0)),
        ];
        board.gpio_count = GPIO_COUNT;
        board.aio_count = 1;
        board.aio_devs = vec![AioDev { pin: 2 }];
        board.adc_raw = 12;
        board.adc_supported = 10;
        board.i2c_buses = vec![I2cBus {
            name: Some("i2c0".into()),
            bus_id: Some(0),
            sda: Some(3),
            scl: Some(4),
        }];
        board.spi_buses = vec![SpiBus {
            name: Some("spi0".into()),
            bus_id: 0,
            slave_s: 0,
            three_wire: false,
            cs: Some(5),
            mosi: Some(6),
            miso: Some(7),
            sclk: Some(8),
        }];
        board.uart_devs = vec![UartDev {
            name: Some("uart0".into()),
            index: 0,
            rx: Some(9),
            tx: Some(10),
            cts: None,
            rts: None,
            device_path: Some(PathBuf::from(UART_DEV_PATH)),
        }];

        board.with_adv_func(AdvanceFunc {
            gpio: gpio_hooks(&state),
            i2c: i2c_hooks(&state),
            aio: aio_hooks(),
            spi: spi_hooks(),
            uart: uart_hooks(),
            ..AdvanceFunc::default()
        })
    }
}

fn with_pin<T>(state: &Shared, pin: u32, f: impl FnOnce(&mut MockPin) -> T) -> Result<T> {
    let mut state = state.lock();
    let slot = state
        .gpio
        .get_mut(pin as usize)
        .ok_or(XptError::InvalidResource)?;
    Ok(f(slot))
}

fn gpio_hooks(state: &Shared) -> GpioHooks {
    let init_state = Arc::clone(state);
    let dir_state = Arc::clone(state);
    let read_dir_state = Arc::clone(state);
    let read_state = Arc::clone(state);
    let write_state = Arc::clone(state);
    let edge_state = Arc::clone(state);
    let mode_state = Arc::clone(state);
    let wait_state = Arc::clone(state);

    GpioHooks {
        init_internal_replace: Some(Arc::new(move |_: &mut Gpio, pin: u32| -> Result<()> {
            with_pin(&init_state, pin, |_| ()).inspect_err(|_| {
                error!("mock: gpio{} does not exist", pin);
            })
        })),
        close_replace: Some(Arc::new(|_: &mut Gpio| -> Result<()> { Ok(()) })),
        dir: OpHooks {
            replace: Some(Arc::new(move |dev: &mut Gpio, dir: Direction| -> Result<()> {
                with_pin(&dir_state, dev.pin_raw(), |pin| match dir {
                    Direction::OutHigh => {
                        pin.dir = Direction::Out;
                        pin.value = 1;
                    }
                    Direction::OutLow => {
                        pin.dir = Direction::Out;
                        pin.value = 0;
                    }
                    other => pin.dir = other,
                })
            })),
            ..OpHooks::default()
        },
        read_dir_replace: Some(Arc::new(move |dev: &mut Gpio, _: ()| -> Result<Direction> {
            with_pin(&read_dir_state, dev.pin_raw(), |pin| pin.dir)
        })),
        read_replace: Some(Arc::new(move |dev: &mut Gpio, _: ()| -> Result<i32> {
            with_pin(&read_state, dev.pin_raw(), |pin| pin.value)
        })),
        write: OpHooks {
            replace: Some(Arc::new(move |dev: &mut Gpio, value: i32| -> Result<()> {
                let raw = dev.pin_raw();
                with_pin(&write_state, raw, |pin| {
                    if pin.dir == Direction::In {
                        error!("mock: gpio{}: write to an input pin", raw);
                        return Err(XptError::InvalidResource);
                    }
                    let value = i32::from(value != 0);
                    if pin.edge.matches(pin.value, value) {
                        pin.pending = true;
                    }
                    pin.value = value;
                    Ok(())
                })?
            })),
            ..OpHooks::default()
        },
        edge_mode_replace: Some(Arc::new(move |dev: &mut Gpio, edge: Edge| -> Result<()> {
            with_pin(&edge_state, dev.pin_raw(), |pin| {
                pin.edge = edge;
                if edge == Edge::None {
                    pin.pending = false;
                }
            })
        })),
        mode: OpHooks {
            replace: Some(Arc::new(move |dev: &mut Gpio, mode: DriveMode| -> Result<()> {
                with_pin(&mode_state, dev.pin_raw(), |pin| pin.drive = mode)
            })),
            ..OpHooks::default()
        },
        interrupt_handler_init_replace: Some(Arc::new(|_: &mut IsrWaiter| -> Result<()> {
            Ok(())
        })),
        wait_interrupt_replace: Some(Arc::new(move |waiter: &IsrWaiter| -> Result<()> {
            loop {
                if waiter.is_terminating() {
                    return Err(XptError::NoDataAvailable);
                }
                let fired = with_pin(&wait_state, waiter.pin(), |pin| {
                    std::mem::take(&mut pin.pending)
                })?;
                if fired {
                    return Ok(());
                }
                thread::sleep(Duration::from_millis(1));
            }
        })),
        ..GpioHooks::default()
    }
}

fn mock_device(dev: &I2c) -> Result<()> {
    if dev.addr() == Some(I2C_DEV_ADDR) {
        Ok(())
    } else {
        debug!("mock: i2c{}: no device at {:?}", dev.bus(), dev.addr());
        Err(XptError::Unspecified)
    }
}

fn register_range(start: u8, len: usize) -> Result<std::ops::Range<usize>> {
    let start = usize::from(start);
    match start.checked_add(len) {
        Some(end) if end <= I2C_DEV_DATA_LEN => Ok(start..end),
        _ => Err(XptError::Unspecified),
    }
}

fn i2c_hooks(state: &Shared) -> I2cHooks {
    let read_state = Arc::clone(state);
    let read_byte_state = Arc::clone(state);
    let read_byte_data_state = Arc::clone(state);
    let read_word_state = Arc::clone(state);
    let read_bytes_state = Arc::clone(state);
    let write_state = Arc::clone(state);
    let write_byte_state = Arc::clone(state);
    let write_byte_data_state = Arc::clone(state);
    let write_word_state = Arc::clone(state);

    I2cHooks {
        init_bus_replace: Some(Arc::new(|dev: &mut I2c| -> Result<()> {
            if dev.bus() != 0 {
                return Err(XptError::InvalidResource);
            }
            Ok(())
        })),
        stop_replace: Some(Arc::new(|_: &mut I2c| -> Result<()> { Ok(()) })),
        set_frequency_replace: Some(Arc::new(|_: &mut I2c, _: I2cMode| -> Result<()> { Ok(()) })),
        address_replace: Some(Arc::new(|_: &mut I2c, _: u8| -> Result<()> { Ok(()) })),
        read_replace: Some(Arc::new(move |dev: &mut I2c, buf: &mut [u8]| -> Result<usize> {
            mock_device(dev)?;
            let regs = read_state.lock().i2c;
            let len = buf.len().min(I2C_DEV_DATA_LEN);
            buf[..len].copy_from_slice(&regs[..len]);
            Ok(len)
        })),
        read_byte_replace: Some(Arc::new(move |dev: &mut I2c, _: ()| -> Result<u8> {
            mock_device(dev)?;
            Ok(read_byte_state.lock().i2c[0])
        })),
        read_byte_data_replace: Some(Arc::new(move |dev: &mut I2c, command: u8| -> Result<u8> {
            mock_device(dev)?;
            let range = register_range(command, 1)?;
            Ok(read_byte_data_state.lock().i2c[range.start])
        })),
        read_word_data_replace: Some(Arc::new(move |dev: &mut I2c, command: u8| -> Result<u16> {
            mock_device(dev)?;
            let range = register_range(command, 2)?;
            let regs = read_word_state.lock().i2c;
            Ok(u16::from_le_bytes([regs[range.start], regs[range.start + 1]]))
        })),
        read_bytes_data_replace: Some(Arc::new(
            move |dev: &mut I2c, command: u8, buf: &mut [u8]| -> Result<usize> {
                mock_device(dev)?;
                let range = register_range(command, buf.len())?;
                buf.copy_from_slice(&read_bytes_state.lock().i2c[range]);
                Ok(buf.len())
            },
        )),
        write_replace: Some(Arc::new(move |dev: &mut I2c, data: &[u8]| -> Result<()> {
            mock_device(dev)?;
            let Some((&command, payload)) = data.split_first() else {
                return Err(XptError::InvalidParameter);
            };
            let range = register_range(command, payload.len())?;
            write_state.lock().i2c[range].copy_from_slice(payload);
            Ok(())
        })),
        write_byte_replace: Some(Arc::new(move |dev: &mut I2c, value: u8| -> Result<()> {
            mock_device(dev)?;
            write_byte_state.lock().i2c[0] = value;
            Ok(())
        })),
        write_byte_data_replace: Some(Arc::new(
            move |dev: &mut I2c, (value, command): (u8, u8)| -> Result<()> {
                mock_device(dev)?;
                let range = register_range(command, 1)?;
                write_byte_data_state.lock().i2c[range.start] = value;
                Ok(())
            },
        )),
        write_word_data_replace: Some(Arc::new(
            move |dev: &mut I2c, (value, command): (u16, u8)| -> Result<()> {
                mock_device(dev)?;
                let range = register_range(command, 2)?;
                write_word_state.lock().i2c[range].copy_from_slice(&value.to_le_bytes());
                Ok(())
            },
        )),
        ..I2cHooks::default()
    }
}

fn aio_hooks() -> AioHooks {
    AioHooks {
        init_internal_replace: Some(Arc::new(|_: &mut Aio, _: u32| -> Result<()> { Ok(()) })),
        close_replace: Some(Arc::new(|_: &mut Aio| -> Result<()> { Ok(()) })),
        read_replace: Some(Arc::new(|dev: &mut Aio, _: ()| -> Result<u32> {
            Ok((1u32 << dev.get_bit().min(31)) / 2)
        })),
        ..AioHooks::default()
    }
}

fn spi_hooks() -> SpiHooks {
    SpiHooks {
        init_raw_replace: Some(Arc::new(|_: &mut Spi, (bus, cs): (u32, u32)| -> Result<()> {
            if bus != 0 || cs != 0 {
                return Err(XptError::InvalidResource);
            }
            Ok(())
        })),
        stop_replace: Some(Arc::new(|_: &mut Spi| -> Result<()> { Ok(()) })),
        lsbmode_replace: Some(Arc::new(|_: &mut Spi, _: bool| -> Result<()> { Ok(()) })),
        mode_replace: Some(Arc::new(|_: &mut Spi, _: SpiMode| -> Result<()> { Ok(()) })),
        bit_per_word_replace: Some(Arc::new(|_: &mut Spi, _: u32| -> Result<()> { Ok(()) })),
        frequency_replace: Some(Arc::new(|_: &mut Spi, _: u32| -> Result<()> { Ok(()) })),
        write_replace: Some(Arc::new(|_: &mut Spi, data: u8| -> Result<u8> {
            Ok(data ^ SPI_REPLY_BYTE)
        })),
        write_word_replace: Some(Arc::new(|_: &mut Spi, data: u16| -> Result<u16> {
            Ok(data ^ SPI_REPLY_WORD)
        })),
        transfer_buf_replace: Some(Arc::new(
            |_: &mut Spi, tx: &[u8], rx: &mut [u8]| -> Result<()> {
                for (out, byte) in rx.iter_mut().zip(tx) {
                    *out = byte ^ SPI_REPLY_BYTE;
                }
                Ok(())
            },
        )),
        transfer_buf_word_replace: Some(Arc::new(
            |_: &mut Spi, tx: &[u16], rx: &mut [u16]| -> Result<()> {
                for (out, word) in rx.iter_mut().zip(tx) {
                    *out = word ^ SPI_REPLY_WORD;
                }
                Ok(())
            },
        )),
        ..SpiHooks::default()
    }
}

fn uart_hooks() -> UartHooks {
    UartHooks {
        init_raw_replace: Some(Arc::new(|_: &mut Uart, path: &Path| -> Result<()> {
            debug!("mock: uart opened at {}", path.display());
            Ok(())
        })),
        flush_replace: Some(Arc::new(|_: &mut Uart| -> Result<()> { Ok(()) })),
        sendbreak_replace: Some(Arc::new(|_: &mut Uart, _: u32| -> Result<()> { Ok(()) })),
        set_baudrate_replace: Some(Arc::new(|_: &mut Uart, _: u32| -> Result<()> { Ok(()) })),
        set_mode_replace: Some(Arc::new(
            |_: &mut Uart, (bytesize, _, stopbits): (u8, Parity, u8)| -> Result<()> {
                if !(5..=8).contains(&bytesize) || !(1..=2).contains(&stopbits) {
                    return Err(XptError::InvalidParameter);
                }
                Ok(())
            },
        )),
        set_flowcontrol_replace: Some(Arc::new(|_: &mut Uart, _: (bool, bool)| -> Result<()> {
            Ok(())
        })),
        set_timeout_replace: Some(Arc::new(|_: &mut Uart, _: (u32, u32, u32)| -> Result<()> {
            Ok(())
        })),
        set_non_blocking_replace: Some(Arc::new(|_: &mut Uart, _: bool| -> Result<()> { Ok(()) })),
        read_replace: Some(Arc::new(|_: &mut Uart, buf: &mut [u8]| -> Result<usize> {
            buf.fill(UART_DATA_BYTE);
            Ok(buf.len())
        })),
        write_replace: Some(Arc::new(|_: &mut Uart, buf: &[u8]| -> Result<usize> {
            Ok(buf.len())
        })),
        data_available_replace: Some(Arc::new(|_: &mut Uart, _: u32| -> Result<bool> {
            Ok(true)
        })),
        ..UartHooks::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::hal::interrupt::IsrState;
    use crate::registry::Session;
    use std::sync::mpsc;

    fn session() -> Session {
        Session::new(Config::default(), MockPlatform::board()).unwrap()
    }

    #[test]
    fn test_board_layout() {
        let session = session();
        assert_eq!(session.platform_name(), PLATFORM_NAME);
        assert_eq!(session.pin_count(), 11);
        assert_eq!(session.gpio_count(), 2);
        assert_eq!(session.adc_raw_bits(), 12);
        assert_eq!(session.adc_supported_bits(), 10);
        assert_eq!(session.pin_name(8).as_deref(), Some("SPI0SCLK"));
    }

    #[test]
    fn test_gpio_state() {
        let session = session();
        let mut gpio = Gpio::init(&session, 1).unwrap();
        assert_eq!(gpio.write(1), Err(XptError::InvalidResource));
        gpio.dir(Direction::OutHigh).unwrap();
        assert_eq!(gpio.read_dir(), Ok(Direction::Out));
        assert_eq!(gpio.read(), Ok(1));
        gpio.write(0).unwrap();
        assert_eq!(gpio.read(), Ok(0));
        assert_eq!(Gpio::init_raw(&session, 7).err(), Some(XptError::InvalidResource));
    }

    #[test]
    fn test_gpio_edge_raises_interrupt() {
        let session = session();
        let mut gpio = Gpio::init(&session, 0).unwrap();
        gpio.dir(Direction::Out).unwrap();
        let events = gpio.isr_events(Edge::Rising).unwrap();
        assert_eq!(gpio.isr_state(), IsrState::Armed);

        gpio.write(1).unwrap();
        let event = events.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(event.pin, 0);
        // A falling write does not match a rising edge.
        gpio.write(0).unwrap();
        assert!(events.recv_timeout(Duration::from_millis(50)).is_err());

        gpio.isr_exit().unwrap();
        assert_eq!(gpio.isr_state(), IsrState::Idle);
    }

    #[test]
    fn test_gpio_isr_callback() {
        let session = session();
        let mut gpio = Gpio::init(&session, 1).unwrap();
        gpio.dir(Direction::OutHigh).unwrap();
        let (tx, rx) = mpsc::channel();
        gpio.isr(
            Edge::Both,
            Box::new(move || {
                let _ = tx.send(());
            }),
        )
        .unwrap();
        gpio.write(0).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        gpio.close().unwrap();
    }

    #[test]
    fn test_i2c_register_block() {
        let session = session();
        let mut i2c = I2c::init(&session, 0).unwrap();
        assert_eq!(i2c.read_byte(), Err(XptError::Unspecified));
        i2c.address(I2C_DEV_ADDR).unwrap();

        assert_eq!(i2c.read_byte(), Ok(I2C_DEV_DATA_INIT_BYTE));
        i2c.write_byte_data(0x11, 2).unwrap();
        assert_eq!(i2c.read_byte_data(2), Ok(0x11));
        i2c.write_word_data(0x2233, 4).unwrap();
        assert_eq!(i2c.read_word_data(4), Ok(0x2233));
        i2c.write(&[7, 1, 2, 3]).unwrap();
        let mut buf = [0u8; 3];
        assert_eq!(i2c.read_bytes_data(7, &mut buf), Ok(3));
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(i2c.read_byte_data(10), Err(XptError::Unspecified));

        let mut all = [0u8; I2C_DEV_DATA_LEN + 1];
        assert_eq!(i2c.read(&mut all), Err(XptError::Unspecified));
        i2c.stop().unwrap();
    }

    #[test]
    fn test_spi_uart_aio() {
        let session = session();
        let mut spi = Spi::init(&session, 0).unwrap();
        assert_eq!(spi.write(0x0F), Ok(0x0F ^ SPI_REPLY_BYTE));
        assert_eq!(spi.write_word(0x1234), Ok(0x1234 ^ SPI_REPLY_WORD));
        assert_eq!(spi.write_buf_word(&[0, 1]).unwrap(), vec![SPI_REPLY_WORD, 1 ^ SPI_REPLY_WORD]);
        spi.mode(SpiMode::Mode2).unwrap();
        assert_eq!(spi.current_mode(), SpiMode::Mode2);

        let mut uart = Uart::init(&session, 0).unwrap();
        assert_eq!(uart.dev_path(), Path::new(UART_DEV_PATH));
        let mut buf = [0u8; 4];
        assert_eq!(uart.read(&mut buf), Ok(4));
        assert_eq!(&buf, b"ZZZZ");
        assert_eq!(uart.data_available(0), Ok(true));

        let mut aio = Aio::init(&session, 0).unwrap();
        assert_eq!(aio.read(), Ok(512));
        aio.set_bit(12).unwrap();
        assert_eq!(aio.read(), Ok(2048));
    }
}
