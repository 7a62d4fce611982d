//! SPI master driver over `spidev`.

use crate::dispatch::AdvanceFunc;
use crate::hal::spi::{DEFAULT_BITS_PER_WORD, DEFAULT_CLOCK_HZ, SpiMode};
use crate::mux;
use crate::registry::Session;
use log::{debug, error};
use std::fmt;
use std::sync::Arc;
use xpt_common::{Result, XptError};

cfg_if::cfg_if! {
    if #[cfg(all(feature = "linux", target_os = "linux"))] {
        mod backend {
            use crate::hal::spi::SpiMode;
            use log::error;
            use rppal::spi::{BitOrder, Bus, Mode, SlaveSelect};
            use xpt_common::{Result, XptError};

            fn failed(op: &str, err: rppal::spi::Error) -> XptError {
                error!("spi: {} failed: {}", op, err);
                XptError::Unspecified
            }

            fn bus(id: u32) -> Option<Bus> {
                Some(match id {
                    0 => Bus::Spi0,
                    1 => Bus::Spi1,
                    2 => Bus::Spi2,
                    3 => Bus::Spi3,
                    4 => Bus::Spi4,
                    5 => Bus::Spi5,
                    6 => Bus::Spi6,
                    _ => return None,
                })
            }

            fn slave(cs: u32) -> Option<SlaveSelect> {
                Some(match cs {
                    0 => SlaveSelect::Ss0,
                    1 => SlaveSelect::Ss1,
                    2 => SlaveSelect::Ss2,
                    3 => SlaveSelect::Ss3,
                    4 => SlaveSelect::Ss4,
                    5 => SlaveSelect::Ss5,
                    6 => SlaveSelect::Ss6,
                    7 => SlaveSelect::Ss7,
                    8 => SlaveSelect::Ss8,
                    9 => SlaveSelect::Ss9,
                    10 => SlaveSelect::Ss10,
                    11 => SlaveSelect::Ss11,
                    12 => SlaveSelect::Ss12,
                    13 => SlaveSelect::Ss13,
                    14 => SlaveSelect::Ss14,
                    15 => SlaveSelect::Ss15,
                    _ => return None,
                })
            }

            fn mode(mode: SpiMode) -> Mode {
                match mode {
                    SpiMode::Mode0 => Mode::Mode0,
                    SpiMode::Mode1 => Mode::Mode1,
                    SpiMode::Mode2 => Mode::Mode2,
                    SpiMode::Mode3 => Mode::Mode3,
                }
            }

            pub(super) struct Device(rppal::spi::Spi);

            impl Device {
                pub(super) fn open(bus_id: u32, cs: u32, clock: u32, spi_mode: SpiMode) -> Result<Self> {
                    let (Some(bus), Some(cs_line)) = (bus(bus_id), slave(cs)) else {
                        error!("spi: no spidev{}.{}", bus_id, cs);
                        return Err(XptError::InvalidResource);
                    };
                    rppal::spi::Spi::new(bus, cs_line, clock, mode(spi_mode))
                        .map(Device)
                        .map_err(|err| {
                            error!("spi: failed to open spidev{}.{}: {}", bus_id, cs, err);
                            XptError::InvalidResource
                        })
                }

                pub(super) fn set_mode(&mut self, spi_mode: SpiMode) -> Result<()> {
                    self.0.set_mode(mode(spi_mode)).map_err(|err| failed("mode", err))
                }

                pub(super) fn set_clock(&mut self, hz: u32) -> Result<()> {
                    self.0.set_clock_speed(hz).map_err(|err| failed("frequency", err))
                }

                pub(super) fn set_lsb_first(&mut self, lsb: bool) -> Result<()> {
                    let order = if lsb { BitOrder::LsbFirst } else { BitOrder::MsbFirst };
                    self.0.set_bit_order(order).map_err(|err| {
                        error!("spi: lsbmode failed: {}", err);
                        XptError::FeatureNotSupported
                    })
                }

                pub(super) fn set_bits_per_word(&mut self, bits: u32) -> Result<()> {
                    let bits = u8::try_from(bits).map_err(|_| XptError::InvalidParameter)?;
                    self.0.set_bits_per_word(bits).map_err(|err| failed("bit_per_word", err))
                }

                pub(super) fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<()> {
                    self.0.transfer(rx, tx).map(|_| ()).map_err(|err| failed("transfer", err))
                }
            }
        }
    } else {
        mod backend {
            use crate::hal::spi::SpiMode;
            use xpt_common::{Result, XptError};

            pub(super) struct Device;

            impl Device {
                pub(super) fn open(_bus: u32, _cs: u32, _clock: u32, _mode: SpiMode) -> Result<Self> {
                    Err(XptError::FeatureNotSupported)
                }

                pub(super) fn set_mode(&mut self, _mode: SpiMode) -> Result<()> {
                    Err(XptError::FeatureNotSupported)
                }

                pub(super) fn set_clock(&mut self, _hz: u32) -> Result<()> {
                    Err(XptError::FeatureNotSupported)
                }

                pub(super) fn set_lsb_first(&mut self, _lsb: bool) -> Result<()> {
                    Err(XptError::FeatureNotSupported)
                }

                pub(super) fn set_bits_per_word(&mut self, _bits: u32) -> Result<()> {
                    Err(XptError::FeatureNotSupported)
                }

                pub(super) fn transfer(&mut self, _tx: &[u8], _rx: &mut [u8]) -> Result<()> {
                    Err(XptError::FeatureNotSupported)
                }
            }
        }
    }
}

/// An open SPI device (bus plus chip select).
pub struct Spi {
    bus: u32,
    cs: u32,
    mode: SpiMode,
    clock: u32,
    lsb: bool,
    bpw: u32,
    device: Option<backend::Device>,
    table: Arc<AdvanceFunc>,
    live: bool,
}

impl Spi {
    /// Open SPI table entry `bus`, muxing its SCLK, MOSI, MISO and CS pins.
    pub fn init(session: &Session, bus: u32) -> Result<Self> {
        let (board, index) = session.resolve(bus)?;
        if board.spi_buses.is_empty() {
            error!("spi: {} has no spi buses", board.platform_name);
            return Err(XptError::FeatureNotSupported);
        }
        let Some(entry) = board.spi_buses.get(index) else {
            error!("spi: bus {} beyond the {} defined", index, board.spi_buses.len());
            return Err(XptError::InvalidResource);
        };

        if !board.no_bus_mux {
            for pos in [entry.sclk, entry.mosi, entry.miso, entry.cs].into_iter().flatten() {
                let Some(info) = board.pins.get(pos) else { continue };
                if !info.spi.mux().is_empty() {
                    mux::apply(session, &info.spi).inspect_err(|_| {
                        error!("spi: failed to set-up spi multiplexer on pin {}", pos);
                    })?;
                }
            }
        }
        Self::open(Arc::clone(&board.adv_func), entry.bus_id, entry.slave_s)
    }

    /// Open `spidev<bus>.<cs>` with the primary board's hooks and no muxing.
    pub fn init_raw(session: &Session, bus: u32, cs: u32) -> Result<Self> {
        Self::open(Arc::clone(&session.board().adv_func), bus, cs)
    }

    fn open(table: Arc<AdvanceFunc>, bus: u32, cs: u32) -> Result<Self> {
        if let Some(pre) = &table.spi.init_pre {
            pre(bus)?;
        }
        let mut dev = Self {
            bus,
            cs,
            mode: SpiMode::default(),
            clock: DEFAULT_CLOCK_HZ,
            lsb: false,
            bpw: DEFAULT_BITS_PER_WORD,
            device: None,
            table: Arc::clone(&table),
            live: false,
        };
        match &table.spi.init_raw_replace {
            Some(replace) => replace(&mut dev, (bus, cs))?,
            None => dev.device = Some(backend::Device::open(bus, cs, dev.clock, dev.mode)?),
        }
        dev.live = true;
        if let Some(post) = &table.spi.init_post {
            post(&mut dev)?;
        }
        debug!("spi{}.{}: opened", bus, cs);
        Ok(dev)
    }

    fn device(&mut self) -> Result<&mut backend::Device> {
        self.device.as_mut().ok_or(XptError::InvalidHandle)
    }

    pub fn bus(&self) -> u32 {
        self.bus
    }

    pub fn cs(&self) -> u32 {
        self.cs
    }

    pub fn current_mode(&self) -> SpiMode {
        self.mode
    }

    pub fn current_frequency(&self) -> u32 {
        self.clock
    }

    pub fn is_lsb_first(&self) -> bool {
        self.lsb
    }

    pub fn bits_per_word(&self) -> u32 {
        self.bpw
    }

    pub fn mode(&mut self, mode: SpiMode) -> Result<()> {
        let table = Arc::clone(&self.table);
        match &table.spi.mode_replace {
            Some(replace) => replace(self, mode)?,
            None => self.device()?.set_mode(mode)?,
        }
        self.mode = mode;
        Ok(())
    }

    /// Set the bus clock in Hz.
    pub fn frequency(&mut self, hz: u32) -> Result<()> {
        if hz == 0 {
            return Err(XptError::InvalidParameter);
        }
        let table = Arc::clone(&self.table);
        match &table.spi.frequency_replace {
            Some(replace) => replace(self, hz)?,
            None => self.device()?.set_clock(hz)?,
        }
        self.clock = hz;
        Ok(())
    }

    /// Shift the least significant bit out first.
    pub fn lsbmode(&mut self, lsb: bool) -> Result<()> {
        let table = Arc::clone(&self.table);
        match &table.spi.lsbmode_replace {
            Some(replace) => replace(self, lsb)?,
            None => self.device()?.set_lsb_first(lsb)?,
        }
        self.lsb = lsb;
        Ok(())
    }

    pub fn bit_per_word(&mut self, bits: u32) -> Result<()> {
        let table = Arc::clone(&self.table);
        match &table.spi.bit_per_word_replace {
            Some(replace) => replace(self, bits)?,
            None => self.device()?.set_bits_per_word(bits)?,
        }
        self.bpw = bits;
        Ok(())
    }

    /// Full-duplex single byte; returns the byte clocked in.
    pub fn write(&mut self, data: u8) -> Result<u8> {
        let table = Arc::clone(&self.table);
        if let Some(replace) = &table.spi.write_replace {
            return replace(self, data);
        }
        let mut rx = [0u8; 1];
        self.device()?.transfer(&[data], &mut rx)?;
        Ok(rx[0])
    }

    /// Full-duplex single 16-bit word.
    pub fn write_word(&mut self, data: u16) -> Result<u16> {
        let table = Arc::clone(&self.table);
        if let Some(replace) = &table.spi.write_word_replace {
            return replace(self, data);
        }
        let mut rx = [0u8; 2];
        self.device()?.transfer(&data.to_ne_bytes(), &mut rx)?;
        Ok(u16::from_ne_bytes(rx))
    }

    /// Clock `data` out and return the bytes received.
    pub fn write_buf(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let mut rx = vec![0u8; data.len()];
        self.transfer_buf(data, &mut rx)?;
        Ok(rx)
    }

    pub fn write_buf_word(&mut self, data: &[u16]) -> Result<Vec<u16>> {
        let mut rx = vec![0u16; data.len()];
        self.transfer_buf_word(data, &mut rx)?;
        Ok(rx)
    }

    /// Clock `tx` out while filling `rx`; both must have the same length.
    pub fn transfer_buf(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<()> {
        if tx.len() != rx.len() {
            return Err(XptError::InvalidParameter);
        }
        let table = Arc::clone(&self.table);
        if let Some(replace) = &table.spi.transfer_buf_replace {
            return replace(self, tx, rx);
        }
        self.device()?.transfer(tx, rx)
    }

    pub fn transfer_buf_word(&mut self, tx: &[u16], rx: &mut [u16]) -> Result<()> {
        if tx.len() != rx.len() {
            return Err(XptError::InvalidParameter);
        }
        let table = Arc::clone(&self.table);
        if let Some(replace) = &table.spi.transfer_buf_word_replace {
            return replace(self, tx, rx);
        }
        let raw_tx: Vec<u8> = tx.iter().flat_map(|word| word.to_ne_bytes()).collect();
        let mut raw_rx = vec![0u8; raw_tx.len()];
        self.device()?.transfer(&raw_tx, &mut raw_rx)?;
        for (word, bytes) in rx.iter_mut().zip(raw_rx.chunks_exact(2)) {
            *word = u16::from_ne_bytes([bytes[0], bytes[1]]);
        }
        Ok(())
    }

    pub fn stop(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if !self.live {
            return Ok(());
        }
        self.live = false;
        let table = Arc::clone(&self.table);
        if let Some(replace) = &table.spi.stop_replace {
            return replace(self);
        }
        self.device = None;
        Ok(())
    }
}

impl Drop for Spi {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            debug!("spi{}.{}: release on drop failed: {}", self.bus, self.cs, err);
        }
    }
}

impl fmt::Debug for Spi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spi")
            .field("bus", &self.bus)
            .field("cs", &self.cs)
            .field("mode", &self.mode)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{Board, SpiBus};
    use crate::config::Config;
    use crate::dispatch::SpiHooks;
    use xpt_common::PlatformType;

    fn loopback_board() -> Board {
        let mut board = Board::new(PlatformType::Unknown, "spi test");
        board.spi_buses = vec![SpiBus {
            bus_id: 2,
            slave_s: 1,
            ..SpiBus::default()
        }];
        board.with_adv_func(AdvanceFunc {
            spi: SpiHooks {
                init_raw_replace: Some(Arc::new(|_: &mut Spi, _: (u32, u32)| -> Result<()> { Ok(()) })),
                frequency_replace: Some(Arc::new(|_: &mut Spi, _: u32| -> Result<()> { Ok(()) })),
                transfer_buf_replace: Some(Arc::new(
                    |_: &mut Spi, tx: &[u8], rx: &mut [u8]| -> Result<()> {
                        rx.copy_from_slice(tx);
                        Ok(())
                    },
                )),
                ..SpiHooks::default()
            },
            ..AdvanceFunc::default()
        })
    }

    #[test]
    fn test_init_uses_bus_table_entry() {
        let session = Session::new(Config::default(), loopback_board()).unwrap();
        let spi = Spi::init(&session, 0).unwrap();
        assert_eq!((spi.bus(), spi.cs()), (2, 1));
        assert_eq!(spi.current_frequency(), DEFAULT_CLOCK_HZ);
        assert_eq!(spi.bits_per_word(), DEFAULT_BITS_PER_WORD);
        assert_eq!(Spi::init(&session, 1).err(), Some(XptError::InvalidResource));
    }

    #[test]
    fn test_write_buf_and_cached_settings() {
        let session = Session::new(Config::default(), loopback_board()).unwrap();
        let mut spi = Spi::init(&session, 0).unwrap();
        assert_eq!(spi.write_buf(&[1, 2, 3]).unwrap(), vec![1, 2, 3]);
        spi.frequency(1_000_000).unwrap();
        assert_eq!(spi.current_frequency(), 1_000_000);
        assert_eq!(spi.frequency(0), Err(XptError::InvalidParameter));
        let mut rx = [0u8; 2];
        assert_eq!(spi.transfer_buf(&[1], &mut rx), Err(XptError::InvalidParameter));
        // No hook and no kernel device behind this context
        assert_eq!(spi.mode(SpiMode::Mode3), Err(XptError::InvalidHandle));
        spi.stop().unwrap();
    }
}
