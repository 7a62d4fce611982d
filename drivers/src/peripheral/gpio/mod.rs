//! GPIO driver.
//!
//! The default backend is the sysfs GPIO class: `export`/`unexport` for
//! ownership and `gpioN/{value,direction,edge,drive,active_low}` for I/O.
//! Every primitive routes through the board's [`GpioHooks`] first.
//!
//! [`GpioHooks`]: crate::dispatch::GpioHooks

pub mod isr;

use crate::config::Config;
use crate::dispatch::AdvanceFunc;
use crate::hal::gpio::{
    Direction, DriveMode, Edge, InputMode, InputPin, OutputDriverMode, OutputPin, PinLevel,
    StatefulOutputPin,
};
use crate::mux;
use crate::peripheral::sysfs;
use crate::registry::Session;
use log::{debug, error};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;
use xpt_common::{PinMode, Result, XptError};

/// Direct register access installed by a board's `mmap_setup` hook.
#[derive(Clone)]
pub struct MmapAccess {
    pub read: Arc<dyn Fn(&Gpio) -> Result<i32> + Send + Sync>,
    pub write: Arc<dyn Fn(&Gpio, i32) -> Result<()> + Send + Sync>,
}

/// An open GPIO pin.
///
/// Closing (explicitly or on drop) stops any interrupt worker and unexports
/// the pin if this context exported it.
pub struct Gpio {
    pin: u32,
    phy_pin: Option<u32>,
    owner: bool,
    value: Option<File>,
    isr: Option<isr::IsrHandle>,
    mmap: Option<MmapAccess>,
    table: Arc<AdvanceFunc>,
    config: Arc<Config>,
    live: bool,
}

impl Gpio {
    fn blank(table: Arc<AdvanceFunc>, config: Arc<Config>, pin: u32) -> Self {
        Self {
            pin,
            phy_pin: None,
            owner: false,
            value: None,
            isr: None,
            mmap: None,
            table,
            config,
            live: false,
        }
    }

    fn init_internal(table: Arc<AdvanceFunc>, config: Arc<Config>, pin: u32) -> Result<Self> {
        let mut dev = Self::blank(Arc::clone(&table), config, pin);
        if let Some(replace) = &table.gpio.init_internal_replace {
            replace(&mut dev, pin)?;
            dev.live = true;
            return Ok(dev);
        }
        if let Some(pre) = &table.gpio.init_pre {
            pre(pin)?;
        }

        if dev.pin_dir().is_dir() {
            dev.owner = false;
        } else {
            let export = dev.config.gpio_class().join("export");
            sysfs::write_attr(&export, pin).map_err(|err| {
                error!("gpio{}: init: failed to export: {}", pin, err);
                XptError::InvalidResource
            })?;
            dev.owner = true;
        }
        dev.live = true;
        Ok(dev)
    }

    /// Open physical pin `pin` (sub-platform bit honoured), running its mux recipe.
    pub fn init(session: &Session, pin: u32) -> Result<Self> {
        let (board, index) = session.resolve(pin)?;
        let info = board.pin(index, PinMode::Gpio)?;
        if !info.gpio.mux().is_empty() {
            mux::apply(session, &info.gpio).inspect_err(|_| {
                error!("gpio: init: unable to setup muxes for pin {}", pin);
            })?;
        }

        let mut dev = Self::init_internal(
            Arc::clone(&board.adv_func),
            Arc::clone(session.config()),
            info.gpio.pinmap,
        )?;
        dev.phy_pin = Some(index as u32);
        if let Some(post) = &board.adv_func.gpio.init_post {
            post(&mut dev)?;
        }
        debug!("gpio{}: opened for physical pin {}", dev.pin, index);
        Ok(dev)
    }

    /// Open a backend GPIO number directly, without capability checks or muxing.
    pub fn init_raw(session: &Session, pin: u32) -> Result<Self> {
        Self::init_internal(
            Arc::clone(&session.board().adv_func),
            Arc::clone(session.config()),
            pin,
        )
    }

    fn pin_dir(&self) -> PathBuf {
        self.config.gpio_class().join(format!("gpio{}", self.pin))
    }

    fn attr(&self, name: &str) -> PathBuf {
        self.pin_dir().join(name)
    }

    fn open_attr_for_write(&self, name: &str, op: &str) -> Result<File> {
        OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(self.attr(name))
            .map_err(|err| {
                error!("gpio{}: {}: failed to open '{}': {}", self.pin, op, name, err);
                XptError::InvalidResource
            })
    }

    fn value_file(&mut self) -> Result<&mut File> {
        if self.value.is_none() {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(self.attr("value"))
                .map_err(|err| {
                    error!("gpio{}: failed to open 'value': {}", self.pin, err);
                    XptError::InvalidResource
                })?;
            self.value = Some(file);
        }
        self.value.as_mut().ok_or(XptError::InvalidResource)
    }

    /// Select which edges raise an interrupt.
    pub fn edge_mode(&mut self, edge: Edge) -> Result<()> {
        let table = Arc::clone(&self.table);
        if let Some(replace) = &table.gpio.edge_mode_replace {
            return replace(self, edge);
        }

        self.value = None;
        let mut file = self.open_attr_for_write("edge", "edge_mode")?;
        file.write_all(edge.sysfs_str().as_bytes()).map_err(|err| {
            error!("gpio{}: edge_mode: failed to write '{}': {}", self.pin, edge.sysfs_str(), err);
            XptError::Unspecified
        })
    }

    /// Set the drive / bias mode.
    pub fn mode(&mut self, mode: DriveMode) -> Result<()> {
        let table = Arc::clone(&self.table);
        table.gpio.mode.run(self, mode, Self::mode_default)
    }

    fn mode_default(&mut self, mode: DriveMode) -> Result<()> {
        self.value = None;
        let mut file = self.open_attr_for_write("drive", "mode")?;
        file.write_all(mode.sysfs_str().as_bytes()).map_err(|err| {
            error!("gpio{}: mode: failed to write '{}': {}", self.pin, mode.sysfs_str(), err);
            XptError::InvalidResource
        })
    }

    /// Set the pin direction.
    pub fn dir(&mut self, dir: Direction) -> Result<()> {
        let table = Arc::clone(&self.table);
        table.gpio.dir.run(self, dir, Self::dir_default)
    }

    fn dir_default(&mut self, dir: Direction) -> Result<()> {
        self.value = None;
        let opened = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(self.attr("direction"));
        let mut file = match opened {
            Ok(file) => file,
            Err(err) => {
                // Output-only pins may expose no direction file; emulate the initial level.
                return match dir {
                    Direction::OutHigh => self.write(1),
                    Direction::OutLow => self.write(0),
                    _ => {
                        error!("gpio{}: dir: failed to open 'direction': {}", self.pin, err);
                        Err(XptError::InvalidResource)
                    }
                };
            }
        };
        file.write_all(dir.sysfs_str().as_bytes()).map_err(|err| {
            error!("gpio{}: dir: failed to write '{}': {}", self.pin, dir.sysfs_str(), err);
            XptError::Unspecified
        })
    }

    /// Current direction; `OutHigh`/`OutLow` read back as `Out`.
    pub fn read_dir(&mut self) -> Result<Direction> {
        let table = Arc::clone(&self.table);
        if let Some(replace) = &table.gpio.read_dir_replace {
            return replace(self, ());
        }

        let text = sysfs::read_attr(&self.attr("direction")).map_err(|err| {
            error!("gpio{}: read_dir: failed to read 'direction': {}", self.pin, err);
            XptError::InvalidResource
        })?;
        match text.trim() {
            "out" => Ok(Direction::Out),
            "in" => Ok(Direction::In),
            other => {
                error!("gpio{}: read_dir: unknown direction '{}'", self.pin, other);
                Err(XptError::Unspecified)
            }
        }
    }

    /// Read the pin level as 0 or 1.
    pub fn read(&mut self) -> Result<i32> {
        let table = Arc::clone(&self.table);
        if let Some(replace) = &table.gpio.read_replace {
            return replace(self, ());
        }
        if let Some(mmap) = self.mmap.clone() {
            return (mmap.read)(self);
        }
        self.read_default()
    }

    fn read_default(&mut self) -> Result<i32> {
        let pin = self.pin;
        let file = self.value_file()?;
        file.seek(SeekFrom::Start(0)).map_err(|_| XptError::Unspecified)?;
        let mut buf = [0u8; 2];
        let len = file.read(&mut buf).map_err(|err| {
            error!("gpio{}: read: failed to read 'value': {}", pin, err);
            XptError::Unspecified
        })?;
        match buf[..len].first() {
            Some(digit @ b'0'..=b'9') => Ok(i32::from(digit - b'0')),
            _ => {
                error!("gpio{}: read: value file is not numeric", pin);
                Err(XptError::Unspecified)
            }
        }
    }

    /// Drive the pin to `value`.
    pub fn write(&mut self, value: i32) -> Result<()> {
        if let Some(mmap) = self.mmap.clone() {
            return (mmap.write)(self, value);
        }
        let table = Arc::clone(&self.table);
        table.gpio.write.run(self, value, Self::write_default)
    }

    fn write_default(&mut self, value: i32) -> Result<()> {
        let pin = self.pin;
        let file = self.value_file()?;
        file.seek(SeekFrom::Start(0)).map_err(|_| XptError::Unspecified)?;
        file.write_all(value.to_string().as_bytes()).map_err(|err| {
            error!("gpio{}: write: failed to write {}: {}", pin, value, err);
            XptError::Unspecified
        })
    }

    /// Take or release ownership; an owner unexports the pin on close.
    pub fn owner(&mut self, owner: bool) {
        debug!("gpio{}: owner set to {}", self.pin, owner);
        self.owner = owner;
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Switch to (or away from) direct register access.
    pub fn use_mmaped(&mut self, enable: bool) -> Result<()> {
        let table = Arc::clone(&self.table);
        match &table.gpio.mmap_setup {
            Some(setup) => setup(self, enable),
            None => {
                error!("gpio{}: use_mmaped: not implemented on this platform", self.pin);
                Err(XptError::FeatureNotImplemented)
            }
        }
    }

    /// Install or clear direct access functions; used by `mmap_setup` hooks.
    pub fn set_mmap_access(&mut self, access: Option<MmapAccess>) {
        self.mmap = access;
    }

    /// Physical pin this context was opened for; `None` for raw contexts.
    pub fn pin(&self) -> Option<u32> {
        self.phy_pin
    }

    /// Backend GPIO number.
    pub fn pin_raw(&self) -> u32 {
        self.pin
    }

    /// Set input polarity.
    pub fn input_mode(&mut self, mode: InputMode) -> Result<()> {
        let flag = match mode {
            InputMode::ActiveHigh => "0",
            InputMode::ActiveLow => "1",
        };
        let mut file = self.open_attr_for_write("active_low", "input_mode")?;
        file.write_all(flag.as_bytes()).map_err(|err| {
            error!("gpio{}: input_mode: failed to write 'active_low': {}", self.pin, err);
            XptError::Unspecified
        })
    }

    /// Select open-drain or push-pull output; only boards with a hook support it.
    pub fn out_driver_mode(&mut self, mode: OutputDriverMode) -> Result<()> {
        let table = Arc::clone(&self.table);
        match &table.gpio.out_driver_mode_replace {
            Some(replace) => replace(self, mode),
            None => Err(XptError::FeatureNotSupported),
        }
    }

    /// Release the pin.
    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if !self.live {
            return Ok(());
        }
        self.live = false;
        let stopped = if self.isr.is_some() { self.isr_exit() } else { Ok(()) };

        let table = Arc::clone(&self.table);
        if let Some(replace) = &table.gpio.close_replace {
            return replace(self).and(stopped);
        }
        if let Some(pre) = &table.gpio.close_pre {
            pre(self)?;
        }
        self.value = None;
        if self.owner {
            let unexport = self.config.gpio_class().join("unexport");
            sysfs::write_attr(&unexport, self.pin).map_err(|err| {
                error!("gpio{}: close: failed to unexport: {}", self.pin, err);
                XptError::InvalidResource
            })?;
        }
        stopped
    }
}

impl Drop for Gpio {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            debug!("gpio{}: release on drop failed: {}", self.pin, err);
        }
    }
}

impl fmt::Debug for Gpio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gpio")
            .field("pin", &self.pin)
            .field("phy_pin", &self.phy_pin)
            .field("owner", &self.owner)
            .field("isr", &self.isr_state())
            .finish_non_exhaustive()
    }
}

impl InputPin for Gpio {
    type Error = XptError;

    fn read_level(&mut self) -> Result<PinLevel> {
        Ok(PinLevel::from(self.read()? != 0))
    }
}

impl OutputPin for Gpio {
    type Error = XptError;

    fn set_high(&mut self) -> Result<()> {
        self.write(PinLevel::High.into())
    }

    fn set_low(&mut self) -> Result<()> {
        self.write(PinLevel::Low.into())
    }
}

impl StatefulOutputPin for Gpio {
    fn read_output(&mut self) -> Result<PinLevel> {
        self.read_level()
    }
}
