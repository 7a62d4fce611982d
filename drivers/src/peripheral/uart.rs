//! Serial port driver.
//!
//! Fresh contexts are configured 9600 baud 8N1 without flow control.

use crate::dispatch::AdvanceFunc;
use crate::hal::serial::{DataBits, Parity, SerialConfig, StopBits};
use crate::mux;
use crate::registry::Session;
use log::{debug, error};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use xpt_common::{Result, XptError};

cfg_if::cfg_if! {
    if #[cfg(all(feature = "linux", target_os = "linux"))] {
        mod backend {
            use crate::hal::serial::{Parity, SerialConfig};
            use log::error;
            use std::path::Path;
            use std::time::Duration;
            use xpt_common::{Result, XptError};

            fn failed(op: &str, err: rppal::uart::Error) -> XptError {
                error!("uart: {} failed: {}", op, err);
                XptError::Unspecified
            }

            fn parity(parity: Parity) -> rppal::uart::Parity {
                match parity {
                    Parity::None => rppal::uart::Parity::None,
                    Parity::Even => rppal::uart::Parity::Even,
                    Parity::Odd => rppal::uart::Parity::Odd,
                    Parity::Mark => rppal::uart::Parity::Mark,
                    Parity::Space => rppal::uart::Parity::Space,
                }
            }

            pub(super) struct Device(rppal::uart::Uart);

            impl Device {
                pub(super) fn open(path: &Path, config: &SerialConfig) -> Result<Self> {
                    rppal::uart::Uart::with_path(
                        path,
                        config.baud_rate,
                        parity(config.parity),
                        config.data_bits.bits(),
                        config.stop_bits.count(),
                    )
                    .map(Device)
                    .map_err(|err| {
                        error!("uart: failed to open {}: {}", path.display(), err);
                        XptError::InvalidResource
                    })
                }

                pub(super) fn flush(&mut self) -> Result<()> {
                    self.0.drain().map_err(|err| failed("flush", err))
                }

                pub(super) fn set_baudrate(&mut self, baud: u32) -> Result<()> {
                    self.0.set_baud_rate(baud).map_err(|err| {
                        error!("uart: baud rate {} rejected: {}", baud, err);
                        XptError::InvalidParameter
                    })
                }

                pub(super) fn set_mode(&mut self, config: &SerialConfig) -> Result<()> {
                    self.0.set_data_bits(config.data_bits.bits()).map_err(|err| failed("set_mode", err))?;
                    self.0.set_parity(parity(config.parity)).map_err(|err| failed("set_mode", err))?;
                    self.0.set_stop_bits(config.stop_bits.count()).map_err(|err| failed("set_mode", err))
                }

                pub(super) fn set_flowcontrol(&mut self, xonxoff: bool, rtscts: bool) -> Result<()> {
                    self.0.set_software_flow_control(xonxoff).map_err(|err| failed("xon/xoff", err))?;
                    self.0.set_hardware_flow_control(rtscts).map_err(|err| failed("rts/cts", err))
                }

                pub(super) fn set_read_mode(&mut self, min: u8, timeout: Duration) -> Result<()> {
                    self.0.set_read_mode(min, timeout).map_err(|err| {
                        error!("uart: read mode rejected: {}", err);
                        XptError::InvalidParameter
                    })
                }

                pub(super) fn set_write_blocking(&mut self, blocking: bool) -> Result<()> {
                    self.0.set_write_mode(blocking).map_err(|err| failed("write mode", err))
                }

                pub(super) fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
                    self.0.read(buf).map_err(|err| failed("read", err))
                }

                pub(super) fn write(&mut self, buf: &[u8]) -> Result<usize> {
                    self.0.write(buf).map_err(|err| failed("write", err))
                }

                pub(super) fn input_len(&self) -> Result<usize> {
                    self.0.input_len().map_err(|err| failed("input_len", err))
                }
            }
        }
    } else {
        mod backend {
            use crate::hal::serial::SerialConfig;
            use std::path::Path;
            use std::time::Duration;
            use xpt_common::{Result, XptError};

            pub(super) struct Device;

            impl Device {
                pub(super) fn open(_path: &Path, _config: &SerialConfig) -> Result<Self> {
                    Err(XptError::FeatureNotSupported)
                }

                pub(super) fn flush(&mut self) -> Result<()> {
                    Err(XptError::FeatureNotSupported)
                }

                pub(super) fn set_baudrate(&mut self, _baud: u32) -> Result<()> {
                    Err(XptError::FeatureNotSupported)
                }

                pub(super) fn set_mode(&mut self, _config: &SerialConfig) -> Result<()> {
                    Err(XptError::FeatureNotSupported)
                }

                pub(super) fn set_flowcontrol(&mut self, _xonxoff: bool, _rtscts: bool) -> Result<()> {
                    Err(XptError::FeatureNotSupported)
                }

                pub(super) fn set_read_mode(&mut self, _min: u8, _timeout: Duration) -> Result<()> {
                    Err(XptError::FeatureNotSupported)
                }

                pub(super) fn set_write_blocking(&mut self, _blocking: bool) -> Result<()> {
                    Err(XptError::FeatureNotSupported)
                }

                pub(super) fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
                    Err(XptError::FeatureNotSupported)
                }

                pub(super) fn write(&mut self, _buf: &[u8]) -> Result<usize> {
                    Err(XptError::FeatureNotSupported)
                }

                pub(super) fn input_len(&self) -> Result<usize> {
                    Err(XptError::FeatureNotSupported)
                }
            }
        }
    }
}

/// An open serial port.
pub struct Uart {
    index: Option<u32>,
    path: PathBuf,
    serial: SerialConfig,
    device: Option<backend::Device>,
    table: Arc<AdvanceFunc>,
    live: bool,
}

impl Uart {
    /// Open UART table entry `index`, muxing its RX and TX pins.
    pub fn init(session: &Session, index: u32) -> Result<Self> {
        let (board, pos) = session.resolve(index)?;
        if board.uart_devs.is_empty() {
            error!("uart: {} has no uarts", board.platform_name);
            return Err(XptError::FeatureNotSupported);
        }
        let Some(entry) = board.uart_devs.get(pos) else {
            error!("uart: device {} beyond the {} defined", pos, board.uart_devs.len());
            return Err(XptError::InvalidResource);
        };
        let table = Arc::clone(&board.adv_func);
        if let Some(pre) = &table.uart.init_pre {
            pre(index)?;
        }

        if !board.no_bus_mux {
            for pin in [entry.rx, entry.tx].into_iter().flatten() {
                let Some(info) = board.pins.get(pin) else { continue };
                if !info.uart.mux().is_empty() {
                    mux::apply(session, &info.uart).inspect_err(|_| {
                        error!("uart: failed to set-up uart multiplexer on pin {}", pin);
                    })?;
                }
            }
        }

        let Some(path) = entry.device_path.as_deref() else {
            error!("uart{}: no device path for this board", index);
            return Err(XptError::InvalidResource);
        };
        let mut dev = Self::open(table, path)?;
        dev.index = Some(index);
        let table = Arc::clone(&dev.table);
        if let Some(post) = &table.uart.init_post {
            post(&mut dev)?;
        }
        Ok(dev)
    }

    /// Open the tty at `path` with the primary board's hooks.
    pub fn init_raw(session: &Session, path: impl AsRef<Path>) -> Result<Self> {
        Self::open(Arc::clone(&session.board().adv_func), path.as_ref())
    }

    fn open(table: Arc<AdvanceFunc>, path: &Path) -> Result<Self> {
        let mut dev = Self {
            index: None,
            path: path.to_path_buf(),
            serial: SerialConfig::default(),
            device: None,
            table: Arc::clone(&table),
            live: false,
        };
        match &table.uart.init_raw_replace {
            Some(replace) => replace(&mut dev, path)?,
            None => dev.device = Some(backend::Device::open(path, &dev.serial)?),
        }
        dev.live = true;
        debug!("uart: opened {}", path.display());
        Ok(dev)
    }

    fn device(&mut self) -> Result<&mut backend::Device> {
        self.device.as_mut().ok_or(XptError::InvalidHandle)
    }

    /// Table index the context was opened from, if any.
    pub fn index(&self) -> Option<u32> {
        self.index
    }

    pub fn dev_path(&self) -> &Path {
        &self.path
    }

    pub fn serial_config(&self) -> SerialConfig {
        self.serial
    }

    /// Block until all queued output is transmitted.
    pub fn flush(&mut self) -> Result<()> {
        let table = Arc::clone(&self.table);
        if let Some(replace) = &table.uart.flush_replace {
            return replace(self);
        }
        self.device()?.flush()
    }

    pub fn sendbreak(&mut self, millis: u32) -> Result<()> {
        let table = Arc::clone(&self.table);
        match &table.uart.sendbreak_replace {
            Some(replace) => replace(self, millis),
            None => Err(XptError::FeatureNotSupported),
        }
    }

    pub fn set_baudrate(&mut self, baud: u32) -> Result<()> {
        let table = Arc::clone(&self.table);
        match &table.uart.set_baudrate_replace {
            Some(replace) => replace(self, baud)?,
            None => self.device()?.set_baudrate(baud)?,
        }
        self.serial.baud_rate = baud;
        Ok(())
    }

    /// Set framing: data bits (5..=8), parity and stop bits (1 or 2).
    pub fn set_mode(&mut self, bytesize: u8, parity: Parity, stopbits: u8) -> Result<()> {
        let table = Arc::clone(&self.table);
        if let Some(replace) = &table.uart.set_mode_replace {
            return replace(self, (bytesize, parity, stopbits));
        }
        let (Some(data_bits), Some(stop_bits)) =
            (DataBits::from_bits(bytesize), StopBits::from_count(stopbits))
        else {
            error!("uart: unsupported framing {}/{}", bytesize, stopbits);
            return Err(XptError::InvalidParameter);
        };
        let serial = SerialConfig {
            data_bits,
            parity,
            stop_bits,
            ..self.serial
        };
        self.device()?.set_mode(&serial)?;
        self.serial = serial;
        Ok(())
    }

    pub fn set_flowcontrol(&mut self, xonxoff: bool, rtscts: bool) -> Result<()> {
        let table = Arc::clone(&self.table);
        if let Some(replace) = &table.uart.set_flowcontrol_replace {
            return replace(self, (xonxoff, rtscts));
        }
        self.device()?.set_flowcontrol(xonxoff, rtscts)
    }

    /// Timeouts in milliseconds. Only the read timeout reaches the tty.
    pub fn set_timeout(&mut self, read: u32, write: u32, interchar: u32) -> Result<()> {
        let table = Arc::clone(&self.table);
        if let Some(replace) = &table.uart.set_timeout_replace {
            return replace(self, (read, write, interchar));
        }
        self.device()?
            .set_read_mode(0, Duration::from_millis(u64::from(read)))
    }

    pub fn set_non_blocking(&mut self, nonblock: bool) -> Result<()> {
        let table = Arc::clone(&self.table);
        if let Some(replace) = &table.uart.set_non_blocking_replace {
            return replace(self, nonblock);
        }
        let device = self.device()?;
        device.set_read_mode(u8::from(!nonblock), Duration::ZERO)?;
        device.set_write_blocking(!nonblock)
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let table = Arc::clone(&self.table);
        if let Some(replace) = &table.uart.read_replace {
            return replace(self, buf);
        }
        self.device()?.read(buf)
    }

    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let table = Arc::clone(&self.table);
        if let Some(replace) = &table.uart.write_replace {
            return replace(self, buf);
        }
        self.device()?.write(buf)
    }

    /// Whether input is waiting, checking for up to `millis` milliseconds.
    pub fn data_available(&mut self, millis: u32) -> Result<bool> {
        let table = Arc::clone(&self.table);
        if let Some(replace) = &table.uart.data_available_replace {
            return replace(self, millis);
        }
        let deadline = Instant::now() + Duration::from_millis(u64::from(millis));
        let device = self.device()?;
        loop {
            if device.input_len()? > 0 {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn stop(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if !self.live {
            return Ok(());
        }
        self.live = false;
        self.device = None;
        Ok(())
    }
}

impl Drop for Uart {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            debug!("uart: release of {} on drop failed: {}", self.path.display(), err);
        }
    }
}

impl fmt::Debug for Uart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Uart")
            .field("index", &self.index)
            .field("path", &self.path)
            .field("serial", &self.serial)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{Board, UartDev};
    use crate::config::Config;
    use crate::dispatch::UartHooks;
    use xpt_common::PlatformType;

    fn board(path: Option<&str>) -> Board {
        let mut board = Board::new(PlatformType::Unknown, "uart test");
        board.uart_devs = vec![UartDev {
            device_path: path.map(PathBuf::from),
            ..UartDev::default()
        }];
        board.with_adv_func(AdvanceFunc {
            uart: UartHooks {
                init_raw_replace: Some(Arc::new(|_: &mut Uart, _: &Path| -> Result<()> { Ok(()) })),
                set_baudrate_replace: Some(Arc::new(|_: &mut Uart, _: u32| -> Result<()> { Ok(()) })),
                ..UartHooks::default()
            },
            ..AdvanceFunc::default()
        })
    }

    #[test]
    fn test_init_from_table() {
        let session = Session::new(Config::default(), board(Some("/dev/ttyTEST0"))).unwrap();
        let mut uart = Uart::init(&session, 0).unwrap();
        assert_eq!(uart.index(), Some(0));
        assert_eq!(uart.dev_path(), Path::new("/dev/ttyTEST0"));
        assert_eq!(uart.serial_config(), SerialConfig::new_8n1(9600));
        uart.set_baudrate(115_200).unwrap();
        assert_eq!(uart.serial_config().baud_rate, 115_200);
        assert_eq!(uart.sendbreak(10), Err(XptError::FeatureNotSupported));
        assert_eq!(uart.data_available(0), Err(XptError::InvalidHandle));
    }

    #[test]
    fn test_missing_device_path() {
        let session = Session::new(Config::default(), board(None)).unwrap();
        assert_eq!(Uart::init(&session, 0).err(), Some(XptError::InvalidResource));
        assert_eq!(Uart::init(&session, 1).err(), Some(XptError::InvalidResource));
    }

    #[test]
    fn test_invalid_framing() {
        let session = Session::new(Config::default(), board(Some("/dev/ttyTEST0"))).unwrap();
        let mut uart = Uart::init_raw(&session, "/dev/ttyTEST1").unwrap();
        assert_eq!(uart.index(), None);
        assert_eq!(uart.set_mode(9, Parity::None, 1), Err(XptError::InvalidParameter));
        assert_eq!(uart.set_mode(8, Parity::None, 3), Err(XptError::InvalidParameter));
    }
}
