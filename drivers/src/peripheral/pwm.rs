//! PWM driver over the sysfs PWM class (`pwmchipN/pwmM/{period,duty_cycle,enable}`).

use crate::config::Config;
use crate::dispatch::AdvanceFunc;
use crate::mux;
use crate::peripheral::sysfs;
use crate::registry::Session;
use log::{debug, error, warn};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use xpt_common::{PinMode, Result, XptError};

/// An open PWM output.
pub struct Pwm {
    chip: u32,
    pin: u32,
    period_ns: Option<u32>,
    owner: bool,
    max_period: u32,
    min_period: u32,
    table: Arc<AdvanceFunc>,
    config: Arc<Config>,
    live: bool,
}

impl Pwm {
    fn blank(table: Arc<AdvanceFunc>, config: Arc<Config>, chip: u32, pin: u32) -> Self {
        Self {
            chip,
            pin,
            period_ns: None,
            owner: false,
            max_period: 0,
            min_period: 0,
            table,
            config,
            live: false,
        }
    }

    fn init_internal(table: Arc<AdvanceFunc>, config: Arc<Config>, chip: u32, pin: u32) -> Result<Self> {
        let mut dev = Self::blank(Arc::clone(&table), config, chip, pin);
        if let Some(replace) = &table.pwm.init_raw_replace {
            replace(&mut dev, pin)?;
            dev.live = true;
            return Ok(dev);
        }

        if !dev.pwm_dir().is_dir() {
            let export = dev.chip_dir().join("export");
            sysfs::write_attr(&export, pin).map_err(|err| {
                error!("pwm{}.{}: init: failed to export: {}", chip, pin, err);
                XptError::InvalidResource
            })?;
            dev.owner = true;
        }
        dev.live = true;
        Ok(dev)
    }

    /// Open the PWM function of physical pin `pin`.
    ///
    /// The period is set to the board's default, when it has one, once the
    /// output is open.
    pub fn init(session: &Session, pin: u32) -> Result<Self> {
        let (board, index) = session.resolve(pin)?;
        let info = board.pin(index, PinMode::Pwm).inspect_err(|_| {
            error!("pwm: init: pin {} not capable of pwm", pin);
        })?;
        let table = Arc::clone(&board.adv_func);
        let config = Arc::clone(session.config());
        if let Some(replace) = &table.pwm.init_replace {
            // Replaced init sees the board-local pin index.
            let local = index as u32;
            let mut dev = Self::blank(Arc::clone(&table), config, 0, local);
            replace(&mut dev, local)?;
            dev.live = true;
            dev.max_period = board.pwm_max_period;
            dev.min_period = board.pwm_min_period;
            return Ok(dev);
        }
        if let Some(pre) = &table.pwm.init_pre {
            pre(pin)?;
        }

        if !info.pwm.mux().is_empty() {
            mux::apply(session, &info.pwm).inspect_err(|_| {
                error!("pwm: init: failed to set-up multiplexer for pin {}", pin);
            })?;
        }

        let (chip, raw) = (info.pwm.parent_id, info.pwm.pinmap);
        let mut dev = match &table.pwm.init_internal_replace {
            Some(replace) => {
                let mut dev = Self::blank(Arc::clone(&table), config, chip, raw);
                replace(&mut dev, raw)?;
                dev.live = true;
                dev
            }
            None => Self::init_internal(Arc::clone(&table), config, chip, raw)?,
        };
        dev.max_period = board.pwm_max_period;
        dev.min_period = board.pwm_min_period;
        if let Some(post) = &table.pwm.init_post {
            post(&mut dev)?;
        }
        if let Some(period) = board.pwm_default_period {
            dev.period_us(period)?;
        }
        debug!("pwm{}.{}: opened for physical pin {}", dev.chip, dev.pin, index);
        Ok(dev)
    }

    /// Open `pwmchip<chip>/pwm<pin>` directly with the primary board's hooks.
    pub fn init_raw(session: &Session, chip: u32, pin: u32) -> Result<Self> {
        let board = session.board();
        let mut dev = Self::init_internal(
            Arc::clone(&board.adv_func),
            Arc::clone(session.config()),
            chip,
            pin,
        )?;
        dev.max_period = board.pwm_max_period;
        dev.min_period = board.pwm_min_period;
        Ok(dev)
    }

    fn chip_dir(&self) -> PathBuf {
        self.config.pwm_class().join(format!("pwmchip{}", self.chip))
    }

    fn pwm_dir(&self) -> PathBuf {
        self.chip_dir().join(format!("pwm{}", self.pin))
    }

    fn write_attr(&self, name: &str, value: u32, op: &str) -> Result<()> {
        sysfs::write_attr(&self.pwm_dir().join(name), value).map_err(|err| {
            error!("pwm{}.{}: {}: failed to write '{}': {}", self.chip, self.pin, op, name, err);
            XptError::InvalidResource
        })
    }

    fn read_attr(&self, name: &str) -> Result<u32> {
        let text = sysfs::read_attr(&self.pwm_dir().join(name)).map_err(|err| {
            error!("pwm{}.{}: failed to read '{}': {}", self.chip, self.pin, name, err);
            XptError::InvalidResource
        })?;
        sysfs::parse(&text).ok_or(XptError::Unspecified)
    }

    pub fn chip(&self) -> u32 {
        self.chip
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }

    /// Cached period in nanoseconds, read from sysfs on first use.
    fn period_ns(&mut self) -> Result<u32> {
        if let Some(period) = self.period_ns {
            return Ok(period);
        }
        let period = self.read_attr("period")?;
        self.period_ns = Some(period);
        Ok(period)
    }

    /// Set the duty cycle as a fraction of the period, clamped to `0.0..=1.0`.
    pub fn write(&mut self, fraction: f32) -> Result<()> {
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        let table = Arc::clone(&self.table);
        table.pwm.write.run(self, fraction, Self::write_default)
    }

    fn write_default(&mut self, fraction: f32) -> Result<()> {
        let period = self.period_ns()?;
        let duty = (period as f32 * fraction) as u32;
        self.write_attr("duty_cycle", duty, "write")
    }

    /// Current duty cycle as a fraction of the period.
    pub fn read(&mut self) -> Result<f32> {
        let table = Arc::clone(&self.table);
        if let Some(replace) = &table.pwm.read_replace {
            return replace(self, ());
        }
        let period = self.read_attr("period")?;
        self.period_ns = Some(period);
        if period == 0 {
            return Ok(0.0);
        }
        let duty = self.read_attr("duty_cycle")?;
        Ok((duty as f32 / period as f32).clamp(0.0, 1.0))
    }

    pub fn period(&mut self, seconds: f32) -> Result<()> {
        self.period_us(Self::to_micros(seconds * 1_000_000.0)?)
    }

    pub fn period_ms(&mut self, millis: u32) -> Result<()> {
        self.period_us(millis.checked_mul(1000).ok_or(XptError::InvalidParameter)?)
    }

    /// Set the period in microseconds, bounded by the board's limits when it has them.
    pub fn period_us(&mut self, micros: u32) -> Result<()> {
        if self.max_period > 0 && (micros < self.min_period || micros > self.max_period) {
            error!(
                "pwm{}.{}: period {}us outside {}..={}",
                self.chip, self.pin, micros, self.min_period, self.max_period
            );
            return Err(XptError::InvalidParameter);
        }
        let period = micros.checked_mul(1000).ok_or(XptError::InvalidParameter)?;
        let table = Arc::clone(&self.table);
        match &table.pwm.period_replace {
            Some(replace) => replace(self, period)?,
            None => self.write_attr("period", period, "period")?,
        }
        self.period_ns = Some(period);
        Ok(())
    }

    pub fn pulsewidth(&mut self, seconds: f32) -> Result<()> {
        self.pulsewidth_us(Self::to_micros(seconds * 1_000_000.0)?)
    }

    pub fn pulsewidth_ms(&mut self, millis: u32) -> Result<()> {
        self.pulsewidth_us(millis.checked_mul(1000).ok_or(XptError::InvalidParameter)?)
    }

    /// Set the high time in microseconds.
    pub fn pulsewidth_us(&mut self, micros: u32) -> Result<()> {
        let duty = micros.checked_mul(1000).ok_or(XptError::InvalidParameter)?;
        self.write_attr("duty_cycle", duty, "pulsewidth")
    }

    fn to_micros(value: f32) -> Result<u32> {
        if !value.is_finite() || value < 0.0 || value > u32::MAX as f32 {
            return Err(XptError::InvalidParameter);
        }
        Ok(value as u32)
    }

    pub fn enable(&mut self, enable: bool) -> Result<()> {
        let table = Arc::clone(&self.table);
        table.pwm.enable.run(self, enable, Self::enable_default)
    }

    fn enable_default(&mut self, enable: bool) -> Result<()> {
        self.write_attr("enable", u32::from(enable), "enable")
    }

    /// Take or release ownership; an owner disables and unexports on close.
    pub fn owner(&mut self, owner: bool) {
        self.owner = owner;
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Longest period the board accepts, in microseconds (0 when unbounded).
    pub fn max_period(&self) -> u32 {
        self.max_period
    }

    pub fn min_period(&self) -> u32 {
        self.min_period
    }

    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if !self.live {
            return Ok(());
        }
        self.live = false;
        if !self.owner {
            return Ok(());
        }
        if let Err(err) = self.enable(false) {
            warn!("pwm{}.{}: close: failed to disable: {}", self.chip, self.pin, err);
        }
        let unexport = self.chip_dir().join("unexport");
        sysfs::write_attr(&unexport, self.pin).map_err(|err| {
            error!("pwm{}.{}: close: failed to unexport: {}", self.chip, self.pin, err);
            XptError::InvalidResource
        })
    }
}

impl Drop for Pwm {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            debug!("pwm{}.{}: release on drop failed: {}", self.chip, self.pin, err);
        }
    }
}

impl fmt::Debug for Pwm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pwm")
            .field("chip", &self.chip)
            .field("pin", &self.pin)
            .field("period_ns", &self.period_ns)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{Board, Capabilities, PinInfo, Routing};
    use crate::dispatch::PwmHooks;
    use std::fs;
    use std::path::Path;
    use xpt_common::PlatformType;

    fn session(root: &Path, default_period: Option<u32>) -> Session {
        let mut board = Board::new(PlatformType::Unknown, "pwm test");
        board.pins = vec![
            PinInfo::new("PWM0", Capabilities::PWM).with_pwm(Routing::new(1).with_parent(0)),
            PinInfo::new("IO1", Capabilities::GPIO).with_gpio(Routing::new(1)),
        ];
        board.pwm_default_period = default_period;
        board.pwm_max_period = 100_000;
        board.pwm_min_period = 10;
        Session::new(Config::default().with_sysfs_root(root), board).unwrap()
    }

    fn fake_chip(root: &Path, exported: bool) -> PathBuf {
        let chip = root.join("class/pwm/pwmchip0");
        fs::create_dir_all(&chip).unwrap();
        fs::write(chip.join("export"), "").unwrap();
        fs::write(chip.join("unexport"), "").unwrap();
        let dir = chip.join("pwm1");
        if exported {
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("period"), "1000000\n").unwrap();
            fs::write(dir.join("duty_cycle"), "0\n").unwrap();
            fs::write(dir.join("enable"), "0\n").unwrap();
        }
        chip
    }

    #[test]
    fn test_write_scales_cached_period() {
        let root = tempfile::tempdir().unwrap();
        let dir = fake_chip(root.path(), true).join("pwm1");
        let mut pwm = Pwm::init(&session(root.path(), None), 0).unwrap();
        assert!(!pwm.is_owner());
        pwm.write(0.25).unwrap();
        assert_eq!(fs::read_to_string(dir.join("duty_cycle")).unwrap(), "250000");
        // Out-of-range fractions are clamped
        pwm.write(3.0).unwrap();
        assert_eq!(fs::read_to_string(dir.join("duty_cycle")).unwrap(), "1000000");
        assert_eq!(pwm.read(), Ok(1.0));
    }

    #[test]
    fn test_default_period_and_bounds() {
        let root = tempfile::tempdir().unwrap();
        let dir = fake_chip(root.path(), true).join("pwm1");
        let mut pwm = Pwm::init(&session(root.path(), Some(500)), 0).unwrap();
        assert_eq!(fs::read_to_string(dir.join("period")).unwrap(), "500000");
        assert_eq!(pwm.period_us(5), Err(XptError::InvalidParameter));
        assert_eq!(pwm.period_ms(200), Err(XptError::InvalidParameter));
        pwm.period_ms(2).unwrap();
        assert_eq!(fs::read_to_string(dir.join("period")).unwrap(), "2000000");
        pwm.pulsewidth_us(20).unwrap();
        assert_eq!(fs::read_to_string(dir.join("duty_cycle")).unwrap(), "20000");
        assert_eq!((pwm.min_period(), pwm.max_period()), (10, 100_000));
    }

    #[test]
    fn test_gpio_only_pin_is_not_capable() {
        let root = tempfile::tempdir().unwrap();
        fake_chip(root.path(), true);
        assert_eq!(
            Pwm::init(&session(root.path(), None), 1).err(),
            Some(XptError::FeatureNotSupported)
        );
    }

    #[test]
    fn test_replaced_init_still_checks_capability() {
        let root = tempfile::tempdir().unwrap();
        fake_chip(root.path(), true);
        let opened = Arc::new(std::sync::atomic::AtomicU32::new(u32::MAX));
        let seen = Arc::clone(&opened);
        let mut board = Board::new(PlatformType::Unknown, "pwm hooks").with_adv_func(AdvanceFunc {
            pwm: PwmHooks {
                init_replace: Some(Arc::new(move |_: &mut Pwm, pin: u32| -> Result<()> {
                    seen.store(pin, std::sync::atomic::Ordering::SeqCst);
                    Ok(())
                })),
                ..PwmHooks::default()
            },
            ..AdvanceFunc::default()
        });
        board.pins = vec![
            PinInfo::new("IO0", Capabilities::GPIO).with_gpio(Routing::new(0)),
            PinInfo::new("PWM1", Capabilities::PWM).with_pwm(Routing::new(4)),
        ];
        let session = Session::new(Config::default().with_sysfs_root(root.path()), board).unwrap();

        assert_eq!(Pwm::init(&session, 0).err(), Some(XptError::FeatureNotSupported));
        assert_eq!(Pwm::init(&session, 7).err(), Some(XptError::InvalidResource));
        assert_eq!(opened.load(std::sync::atomic::Ordering::SeqCst), u32::MAX);

        let pwm = Pwm::init(&session, 1).unwrap();
        assert_eq!(pwm.pin(), 1);
        assert_eq!(opened.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_raw_export_ownership() {
        let root = tempfile::tempdir().unwrap();
        let chip = fake_chip(root.path(), false);
        let pwm = Pwm::init_raw(&session(root.path(), None), 0, 1).unwrap();
        assert!(pwm.is_owner());
        assert_eq!(fs::read_to_string(chip.join("export")).unwrap(), "1");
        pwm.close().unwrap();
        assert_eq!(fs::read_to_string(chip.join("unexport")).unwrap(), "1");
    }
}
