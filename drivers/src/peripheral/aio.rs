//! Analog input driver.
//!
//! Channels are read from `bus/iio/devices/iio:device0/in_voltage<N>_raw`
//! and rescaled from the board's ADC resolution to the context's requested
//! resolution (10 bits unless changed with [`Aio::set_bit`]).

use crate::config::Config;
use crate::dispatch::AdvanceFunc;
use crate::mux;
use crate::registry::Session;
use log::{debug, error};
use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use xpt_common::{PinMode, Result, XptError};

/// Resolution of a freshly opened channel.
pub const DEFAULT_BITS: u32 = 10;
/// Widest resolution a sample can be scaled to.
pub const MAX_BITS: u32 = 32;

pub struct Aio {
    channel: u32,
    file: Option<File>,
    value_bit: u32,
    raw_bits: u32,
    table: Arc<AdvanceFunc>,
    config: Arc<Config>,
    live: bool,
}

impl Aio {
    /// Open ADC channel `aio`.
    ///
    /// The physical pin is `aio_devs[aio]` on boards with a non-sequential
    /// ADC map, otherwise the pin right after the GPIO range.
    pub fn init(session: &Session, aio: u32) -> Result<Self> {
        let (board, aio) = session.resolve(aio)?;
        let index = match board.aio_devs.get(aio) {
            Some(dev) if board.aio_non_seq && aio < board.aio_count => dev.pin,
            _ => aio + board.gpio_count,
        };
        if index >= board.phy_pin_count() {
            error!("aio: pin {} beyond platform definition", index);
            return Err(XptError::InvalidResource);
        }
        if aio >= board.aio_count {
            error!("aio: requested channel {} out of range", aio);
            return Err(XptError::InvalidResource);
        }
        let info = board.pin(index, PinMode::Aio)?;
        if !info.aio.mux().is_empty() {
            mux::apply(session, &info.aio).inspect_err(|_| {
                error!("aio: unable to setup multiplexers for pin {}", index);
            })?;
        }

        let table = Arc::clone(&board.adv_func);
        let mut dev = Self {
            channel: info.aio.pinmap,
            file: None,
            value_bit: DEFAULT_BITS,
            raw_bits: board.adc_raw_bits(),
            table: Arc::clone(&table),
            config: Arc::clone(session.config()),
            live: false,
        };
        match &table.aio.init_internal_replace {
            Some(replace) => replace(&mut dev, aio as u32)?,
            None => dev.get_valid_fp()?,
        }
        dev.live = true;

        if let Some(pre) = &table.aio.init_pre {
            pre(aio as u32)?;
        }
        if let Some(post) = &table.aio.init_post {
            post(&mut dev)?;
        }
        debug!("aio{}: opened, {} raw bits", dev.channel, dev.raw_bits);
        Ok(dev)
    }

    fn raw_path(&self) -> PathBuf {
        self.config
            .iio_devices()
            .join("iio:device0")
            .join(format!("in_voltage{}_raw", self.channel))
    }

    fn get_valid_fp(&mut self) -> Result<()> {
        let table = Arc::clone(&self.table);
        if let Some(open) = &table.aio.get_valid_fp {
            return open(self);
        }
        let path = self.raw_path();
        let file = File::open(&path).map_err(|err| {
            error!("aio: failed to open {} for reading: {}", path.display(), err);
            XptError::InvalidResource
        })?;
        self.file = Some(file);
        Ok(())
    }

    /// Shift applied to raw samples and the full-scale value after shifting.
    fn scaling(&self) -> Result<(u32, u32, bool)> {
        let raw_max = match self.raw_bits {
            bits if bits >= 32 => u32::MAX,
            bits => (1u32 << bits) - 1,
        };
        let scaled = if self.raw_bits < self.value_bit {
            let shift = self.value_bit - self.raw_bits;
            raw_max.checked_shl(shift).map(|max| (shift, max, true))
        } else {
            let shift = self.raw_bits - self.value_bit;
            raw_max.checked_shr(shift).map(|max| (shift, max, false))
        };
        scaled.ok_or_else(|| {
            error!(
                "aio{}: cannot scale {} raw bits to {} bits",
                self.channel, self.raw_bits, self.value_bit
            );
            XptError::InvalidParameter
        })
    }

    /// Sample the channel at the context's resolution.
    pub fn read(&mut self) -> Result<u32> {
        let table = Arc::clone(&self.table);
        if let Some(replace) = &table.aio.read_replace {
            return replace(self, ());
        }

        if self.file.is_none() {
            self.get_valid_fp()?;
        }
        let file = self.file.as_mut().ok_or(XptError::InvalidResource)?;
        let mut buf = [0u8; 16];
        file.seek(SeekFrom::Start(0)).map_err(|_| XptError::Unspecified)?;
        let len = file.read(&mut buf).map_err(|err| {
            error!("aio: failed to read a sensible value: {}", err);
            XptError::Unspecified
        })?;
        let raw: u32 = std::str::from_utf8(&buf[..len])
            .ok()
            .and_then(|text| {
                let text = text.trim_start();
                let end = text.find(|c: char| !c.is_ascii_digit()).unwrap_or(text.len());
                text[..end].parse().ok()
            })
            .ok_or_else(|| {
                error!("aio: value is not a decimal number");
                XptError::Unspecified
            })?;

        let (shift, _, up) = self.scaling()?;
        Ok(if up { raw << shift } else { raw >> shift })
    }

    /// Sample normalised to `0.0..=1.0`.
    pub fn read_float(&mut self) -> Result<f32> {
        let value = self.read()?;
        let (_, max, _) = self.scaling()?;
        if max == 0 {
            error!("aio{}: board reports no ADC resolution", self.channel);
            return Err(XptError::FeatureNotSupported);
        }
        Ok(value as f32 / max as f32)
    }

    /// Change the resolution reads are scaled to, at most [`MAX_BITS`].
    pub fn set_bit(&mut self, bits: u32) -> Result<()> {
        if bits < 1 {
            error!("aio{}: set_bit: {} bits is invalid", self.channel, bits);
            return Err(XptError::InvalidResource);
        }
        if bits > MAX_BITS {
            error!("aio{}: set_bit: {} bits exceeds {}", self.channel, bits, MAX_BITS);
            return Err(XptError::InvalidParameter);
        }
        self.value_bit = bits;
        Ok(())
    }

    pub fn get_bit(&self) -> u32 {
        self.value_bit
    }

    /// Backend ADC channel.
    pub fn channel(&self) -> u32 {
        self.channel
    }

    pub fn set_channel(&mut self, channel: u32) {
        self.channel = channel;
    }

    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if !self.live {
            return Ok(());
        }
        self.live = false;
        let table = Arc::clone(&self.table);
        if let Some(replace) = &table.aio.close_replace {
            return replace(self);
        }
        self.file = None;
        Ok(())
    }
}

impl Drop for Aio {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            debug!("aio{}: release on drop failed: {}", self.channel, err);
        }
    }
}

impl fmt::Debug for Aio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aio")
            .field("channel", &self.channel)
            .field("value_bit", &self.value_bit)
            .field("raw_bits", &self.raw_bits)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{Board, Capabilities, PinInfo, Routing};
    use std::fs;
    use std::path::Path;
    use xpt_common::PlatformType;

    fn adc_session(root: &Path, raw_bits: u32) -> Session {
        let mut board = Board::new(PlatformType::Unknown, "adc test");
        board.pins = vec![
            PinInfo::new("IO0", Capabilities::GPIO),
            PinInfo::new("A0", Capabilities::AIO).with_aio(Routing::new(3)),
        ];
        board.gpio_count = 1;
        board.aio_count = 1;
        board.adc_raw = raw_bits;
        board.adc_supported = 10;
        Session::new(Config::default().with_sysfs_root(root), board).unwrap()
    }

    fn write_sample(root: &Path, value: &str) {
        let dir = root.join("bus/iio/devices/iio:device0");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("in_voltage3_raw"), value).unwrap();
    }

    #[test]
    fn test_read_scales_down() {
        let root = tempfile::tempdir().unwrap();
        write_sample(root.path(), "4095\n");
        let session = adc_session(root.path(), 12);
        let mut aio = Aio::init(&session, 0).unwrap();
        assert_eq!(aio.channel(), 3);
        assert_eq!(aio.read(), Ok(1023));
        assert_eq!(aio.read_float(), Ok(1.0));

        aio.set_bit(12).unwrap();
        assert_eq!(aio.read(), Ok(4095));
        assert_eq!(aio.get_bit(), 12);
    }

    #[test]
    fn test_read_scales_up() {
        let root = tempfile::tempdir().unwrap();
        write_sample(root.path(), "255");
        let session = adc_session(root.path(), 8);
        let mut aio = Aio::init(&session, 0).unwrap();
        assert_eq!(aio.read(), Ok(255 << 2));
    }

    #[test]
    fn test_rejects_non_numeric_sample() {
        let root = tempfile::tempdir().unwrap();
        write_sample(root.path(), "abc");
        let session = adc_session(root.path(), 10);
        let mut aio = Aio::init(&session, 0).unwrap();
        assert_eq!(aio.read(), Err(XptError::Unspecified));
    }

    #[test]
    fn test_init_checks() {
        let root = tempfile::tempdir().unwrap();
        let session = adc_session(root.path(), 10);
        // Channel 1 maps past the last physical pin
        assert_eq!(Aio::init(&session, 1).err(), Some(XptError::InvalidResource));
        // No sample file
        assert_eq!(Aio::init(&session, 0).err(), Some(XptError::InvalidResource));
    }

    #[test]
    fn test_set_bit_rejects_zero() {
        let root = tempfile::tempdir().unwrap();
        write_sample(root.path(), "1");
        let session = adc_session(root.path(), 10);
        let mut aio = Aio::init(&session, 0).unwrap();
        assert_eq!(aio.set_bit(0), Err(XptError::InvalidResource));
    }

    #[test]
    fn test_set_bit_upper_bound() {
        let root = tempfile::tempdir().unwrap();
        write_sample(root.path(), "1023");
        let session = adc_session(root.path(), 10);
        let mut aio = Aio::init(&session, 0).unwrap();
        assert_eq!(aio.set_bit(64), Err(XptError::InvalidParameter));
        assert_eq!(aio.get_bit(), DEFAULT_BITS);
        assert_eq!(aio.read_float(), Ok(1.0));

        aio.set_bit(MAX_BITS).unwrap();
        assert_eq!(aio.read(), Ok(1023 << 22));
    }

    #[test]
    fn test_unscalable_resolution_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        write_sample(root.path(), "1");
        // A board without an ADC reports zero raw bits.
        let session = adc_session(root.path(), 0);
        let mut aio = Aio::init(&session, 0).unwrap();
        aio.set_bit(MAX_BITS).unwrap();
        assert_eq!(aio.read(), Err(XptError::InvalidParameter));
    }
}
