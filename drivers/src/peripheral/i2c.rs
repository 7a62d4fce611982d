//! I2C master driver.
//!
//! The default backend is the kernel `i2c-dev` interface through `rppal`
//! (cargo feature `linux`). Boards may replace any operation, including
//! opening the bus, through [`I2cHooks`](crate::dispatch::I2cHooks).

use crate::dispatch::AdvanceFunc;
use crate::hal::i2c::{I2cMode, SMBUS_BLOCK_MAX};
use crate::mux;
use crate::registry::Session;
use log::{debug, error};
use std::fmt;
use std::sync::Arc;
use xpt_common::{Result, XptError};

cfg_if::cfg_if! {
    if #[cfg(all(feature = "linux", target_os = "linux"))] {
        mod backend {
            use log::error;
            use xpt_common::{Result, XptError};

            fn failed(op: &str, err: rppal::i2c::Error) -> XptError {
                error!("i2c: {} failed: {}", op, err);
                XptError::Unspecified
            }

            pub(super) struct Bus(rppal::i2c::I2c);

            impl Bus {
                pub(super) fn open(bus: u32) -> Result<Self> {
                    let bus = u8::try_from(bus).map_err(|_| XptError::InvalidResource)?;
                    rppal::i2c::I2c::with_bus(bus).map(Bus).map_err(|err| {
                        error!("i2c: failed to open bus {}: {}", bus, err);
                        XptError::InvalidResource
                    })
                }

                pub(super) fn set_address(&mut self, addr: u8) -> Result<()> {
                    self.0.set_slave_address(u16::from(addr)).map_err(|err| failed("address", err))
                }

                pub(super) fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
                    self.0.read(buf).map_err(|err| failed("read", err))
                }

                pub(super) fn write_read(&mut self, command: u8, buf: &mut [u8]) -> Result<()> {
                    self.0.write_read(&[command], buf).map_err(|err| failed("read_bytes_data", err))
                }

                pub(super) fn receive_byte(&mut self) -> Result<u8> {
                    self.0.smbus_receive_byte().map_err(|err| failed("read_byte", err))
                }

                pub(super) fn read_byte(&mut self, command: u8) -> Result<u8> {
                    self.0.smbus_read_byte(command).map_err(|err| failed("read_byte_data", err))
                }

                pub(super) fn read_word(&mut self, command: u8) -> Result<u16> {
                    self.0.smbus_read_word(command).map_err(|err| failed("read_word_data", err))
                }

                pub(super) fn block_write(&mut self, command: u8, data: &[u8]) -> Result<()> {
                    self.0.block_write(command, data).map_err(|err| failed("write", err))
                }

                pub(super) fn send_byte(&mut self, value: u8) -> Result<()> {
                    self.0.smbus_send_byte(value).map_err(|err| failed("write_byte", err))
                }

                pub(super) fn write_byte(&mut self, command: u8, value: u8) -> Result<()> {
                    self.0.smbus_write_byte(command, value).map_err(|err| failed("write_byte_data", err))
                }

                pub(super) fn write_word(&mut self, command: u8, value: u16) -> Result<()> {
                    self.0.smbus_write_word(command, value).map_err(|err| failed("write_word_data", err))
                }
            }
        }
    } else {
        mod backend {
            use xpt_common::{Result, XptError};

            pub(super) struct Bus;

            impl Bus {
                pub(super) fn open(_bus: u32) -> Result<Self> {
                    Err(XptError::FeatureNotSupported)
                }

                pub(super) fn set_address(&mut self, _addr: u8) -> Result<()> {
                    Err(XptError::FeatureNotSupported)
                }

                pub(super) fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
                    Err(XptError::FeatureNotSupported)
                }

                pub(super) fn write_read(&mut self, _command: u8, _buf: &mut [u8]) -> Result<()> {
                    Err(XptError::FeatureNotSupported)
                }

                pub(super) fn receive_byte(&mut self) -> Result<u8> {
                    Err(XptError::FeatureNotSupported)
                }

                pub(super) fn read_byte(&mut self, _command: u8) -> Result<u8> {
                    Err(XptError::FeatureNotSupported)
                }

                pub(super) fn read_word(&mut self, _command: u8) -> Result<u16> {
                    Err(XptError::FeatureNotSupported)
                }

                pub(super) fn block_write(&mut self, _command: u8, _data: &[u8]) -> Result<()> {
                    Err(XptError::FeatureNotSupported)
                }

                pub(super) fn send_byte(&mut self, _value: u8) -> Result<()> {
                    Err(XptError::FeatureNotSupported)
                }

                pub(super) fn write_byte(&mut self, _command: u8, _value: u8) -> Result<()> {
                    Err(XptError::FeatureNotSupported)
                }

                pub(super) fn write_word(&mut self, _command: u8, _value: u16) -> Result<()> {
                    Err(XptError::FeatureNotSupported)
                }
            }
        }
    }
}

/// An open I2C bus.
pub struct I2c {
    bus: u32,
    addr: Option<u8>,
    device: Option<backend::Bus>,
    table: Arc<AdvanceFunc>,
    live: bool,
}

impl I2c {
    fn init_internal(table: Arc<AdvanceFunc>, bus: u32) -> Result<Self> {
        let mut dev = Self {
            bus,
            addr: None,
            device: None,
            table: Arc::clone(&table),
            live: false,
        };
        if let Some(pre) = &table.i2c.init_pre {
            pre(bus)?;
        }
        match &table.i2c.init_bus_replace {
            Some(replace) => replace(&mut dev)?,
            None => dev.device = Some(backend::Bus::open(bus)?),
        }
        dev.live = true;
        if let Some(post) = &table.i2c.init_post {
            post(&mut dev)?;
        }
        debug!("i2c{}: opened", bus);
        Ok(dev)
    }

    /// Open I2C table entry `bus` (sub-platform bit honoured), muxing SDA then SCL.
    pub fn init(session: &Session, bus: u32) -> Result<Self> {
        let (board, mut index) = session.resolve(bus)?;
        if board.i2c_buses.is_empty() {
            error!("i2c: {} has no i2c buses", board.platform_name);
            return Err(XptError::FeatureNotSupported);
        }
        if index >= board.i2c_buses.len() {
            error!("i2c: bus {} beyond the {} defined", index, board.i2c_buses.len());
            return Err(XptError::InvalidResource);
        }
        if board.i2c_buses[index].bus_id.is_none() {
            index = board.def_i2c_bus;
        }
        let entry = board.i2c_buses.get(index).ok_or(XptError::InvalidResource)?;
        let bus_id = entry.bus_id.ok_or(XptError::InvalidResource)?;

        if !board.no_bus_mux {
            for pos in [entry.sda, entry.scl].into_iter().flatten() {
                let Some(info) = board.pins.get(pos) else { continue };
                if !info.i2c.mux().is_empty() {
                    mux::apply(session, &info.i2c).inspect_err(|_| {
                        error!("i2c: failed to set-up i2c multiplexer on pin {}", pos);
                    })?;
                }
            }
        }
        Self::init_internal(Arc::clone(&board.adv_func), bus_id)
    }

    /// Open kernel bus `bus` with the primary board's hooks and no muxing.
    pub fn init_raw(session: &Session, bus: u32) -> Result<Self> {
        Self::init_internal(Arc::clone(&session.board().adv_func), bus)
    }

    fn device(&mut self) -> Result<&mut backend::Bus> {
        self.device.as_mut().ok_or(XptError::InvalidHandle)
    }

    pub fn bus(&self) -> u32 {
        self.bus
    }

    /// Last address selected with [`I2c::address`].
    pub fn addr(&self) -> Option<u8> {
        self.addr
    }

    pub fn frequency(&mut self, mode: I2cMode) -> Result<()> {
        let table = Arc::clone(&self.table);
        match &table.i2c.set_frequency_replace {
            Some(replace) => replace(self, mode),
            None => Err(XptError::FeatureNotSupported),
        }
    }

    /// Select the slave address for following transfers.
    pub fn address(&mut self, addr: u8) -> Result<()> {
        self.addr = Some(addr);
        let table = Arc::clone(&self.table);
        if let Some(replace) = &table.i2c.address_replace {
            return replace(self, addr);
        }
        self.device()?.set_address(addr)
    }

    /// Plain read filling all of `buf`.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let table = Arc::clone(&self.table);
        let count = match &table.i2c.read_replace {
            Some(replace) => replace(self, buf)?,
            None => self.device()?.read(buf)?,
        };
        if count != buf.len() {
            error!("i2c{}: short read, {} of {} bytes", self.bus, count, buf.len());
            return Err(XptError::Unspecified);
        }
        Ok(count)
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        let table = Arc::clone(&self.table);
        if let Some(replace) = &table.i2c.read_byte_replace {
            return replace(self, ());
        }
        self.device()?.receive_byte()
    }

    pub fn read_byte_data(&mut self, command: u8) -> Result<u8> {
        let table = Arc::clone(&self.table);
        if let Some(replace) = &table.i2c.read_byte_data_replace {
            return replace(self, command);
        }
        self.device()?.read_byte(command)
    }

    pub fn read_word_data(&mut self, command: u8) -> Result<u16> {
        let table = Arc::clone(&self.table);
        if let Some(replace) = &table.i2c.read_word_data_replace {
            return replace(self, command);
        }
        self.device()?.read_word(command)
    }

    /// Write `command`, then read `buf.len()` bytes in one combined transfer.
    pub fn read_bytes_data(&mut self, command: u8, buf: &mut [u8]) -> Result<usize> {
        let table = Arc::clone(&self.table);
        if let Some(replace) = &table.i2c.read_bytes_data_replace {
            return replace(self, command, buf);
        }
        self.device()?.write_read(command, buf)?;
        Ok(buf.len())
    }

    /// Write `data[0]` as the command byte followed by at most 32 data bytes.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let table = Arc::clone(&self.table);
        if let Some(replace) = &table.i2c.write_replace {
            return replace(self, data);
        }
        let Some((&command, payload)) = data.split_first() else {
            return Err(XptError::InvalidParameter);
        };
        let payload = &payload[..payload.len().min(SMBUS_BLOCK_MAX)];
        self.device()?.block_write(command, payload)
    }

    pub fn write_byte(&mut self, value: u8) -> Result<()> {
        let table = Arc::clone(&self.table);
        if let Some(replace) = &table.i2c.write_byte_replace {
            return replace(self, value);
        }
        self.device()?.send_byte(value)
    }

    pub fn write_byte_data(&mut self, value: u8, command: u8) -> Result<()> {
        let table = Arc::clone(&self.table);
        if let Some(replace) = &table.i2c.write_byte_data_replace {
            return replace(self, (value, command));
        }
        self.device()?.write_byte(command, value)
    }

    pub fn write_word_data(&mut self, value: u16, command: u8) -> Result<()> {
        let table = Arc::clone(&self.table);
        if let Some(replace) = &table.i2c.write_word_data_replace {
            return replace(self, (value, command));
        }
        self.device()?.write_word(command, value)
    }

    /// Close the bus.
    pub fn stop(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if !self.live {
            return Ok(());
        }
        self.live = false;
        let table = Arc::clone(&self.table);
        if let Some(replace) = &table.i2c.stop_replace {
            return replace(self);
        }
        self.device = None;
        Ok(())
    }
}

impl Drop for I2c {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            debug!("i2c{}: release on drop failed: {}", self.bus, err);
        }
    }
}

impl fmt::Debug for I2c {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("I2c")
            .field("bus", &self.bus)
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{Board, Capabilities, I2cBus, PinInfo, Routing};
    use crate::config::Config;
    use crate::dispatch::I2cHooks;
    use std::sync::Mutex;
    use xpt_common::PlatformType;

    fn hooked_board(opened: Arc<Mutex<Vec<u32>>>) -> Board {
        let mut board = Board::new(PlatformType::Unknown, "i2c test");
        board.pins = vec![
            PinInfo::new("SDA", Capabilities::I2C).with_i2c(Routing::new(0)),
            PinInfo::new("SCL", Capabilities::I2C).with_i2c(Routing::new(0)),
        ];
        board.i2c_buses = vec![
            I2cBus {
                bus_id: None,
                ..I2cBus::default()
            },
            I2cBus {
                bus_id: Some(7),
                sda: Some(0),
                scl: Some(1),
                ..I2cBus::default()
            },
        ];
        board.def_i2c_bus = 1;
        board.with_adv_func(AdvanceFunc {
            i2c: I2cHooks {
                init_bus_replace: Some(Arc::new(move |dev: &mut I2c| -> Result<()> {
                    opened.lock().unwrap().push(dev.bus());
                    Ok(())
                })),
                read_replace: Some(Arc::new(|_: &mut I2c, buf: &mut [u8]| -> Result<usize> {
                    Ok(buf.len().saturating_sub(1))
                })),
                ..I2cHooks::default()
            },
            ..AdvanceFunc::default()
        })
    }

    #[test]
    fn test_unset_bus_id_uses_default_bus() {
        let opened = Arc::new(Mutex::new(Vec::new()));
        let session = Session::new(Config::default(), hooked_board(opened.clone())).unwrap();
        let i2c = I2c::init(&session, 0).unwrap();
        assert_eq!(i2c.bus(), 7);
        assert_eq!(*opened.lock().unwrap(), [7]);
        assert_eq!(I2c::init(&session, 2).err(), Some(XptError::InvalidResource));
    }

    #[test]
    fn test_short_read_fails() {
        let session = Session::new(
            Config::default(),
            hooked_board(Arc::new(Mutex::new(Vec::new()))),
        )
        .unwrap();
        let mut i2c = I2c::init(&session, 1).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(i2c.read(&mut buf), Err(XptError::Unspecified));
        // Unhooked operations need a kernel device, which the hook did not open
        assert_eq!(i2c.read_byte(), Err(XptError::InvalidHandle));
        assert_eq!(i2c.frequency(I2cMode::Fast), Err(XptError::FeatureNotSupported));
    }

    #[test]
    fn test_board_without_buses() {
        let session = Session::new(Config::default(), Board::null()).unwrap();
        assert_eq!(I2c::init(&session, 0).err(), Some(XptError::FeatureNotSupported));
    }
}
