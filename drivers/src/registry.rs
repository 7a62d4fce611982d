//! Platform registry.
//!
//! A [`Session`] owns the detected primary board, an optional sub-platform
//! addressed through the high pin bit, and the list of IIO devices found at
//! start-up. Every driver init takes the session it opens against.
//!
//! A process-wide session is available through [`init`], [`session`] and
//! [`deinit`]; `init` is idempotent.

use crate::board::Board;
use crate::config::Config;
use crate::peripheral::aio::Aio;
use crate::peripheral::gpio::Gpio;
use crate::peripheral::i2c::I2c;
use crate::peripheral::iio::{self, IioDeviceInfo};
use crate::peripheral::pwm::Pwm;
use crate::peripheral::spi::Spi;
use crate::peripheral::uart::Uart;
use crate::platform::{self, grovepi};
use log::{error, info, warn};
use spin::RwLock;
use std::fmt;
use std::sync::Arc;
use xpt_common::{
    PinMode, PlatformOffset, PlatformType, Result, XptError, is_sub_platform_id,
    sub_platform_index,
};

/// Longest accepted `init_io` descriptor.
const MAX_IO_DESCRIPTOR: usize = 255;

/// Context opened from a textual descriptor by [`Session::init_io`].
#[derive(Debug)]
pub enum Io {
    Gpio(Gpio),
    I2c(I2c),
    Aio(Aio),
    Pwm(Pwm),
    Spi(Spi),
    Uart(Uart),
}

pub struct Session {
    config: Arc<Config>,
    primary: Arc<Board>,
    sub_platform: RwLock<Option<Arc<Board>>>,
    iio_devices: Vec<IioDeviceInfo>,
}

impl Session {
    /// Session over an explicit board description.
    pub fn new(config: Config, board: Board) -> Result<Self> {
        board.validate()?;
        let iio_devices = iio::detect(&config);
        info!(
            "platform: {} initialised, {} iio devices",
            board.platform_name,
            iio_devices.len()
        );
        Ok(Self {
            config: Arc::new(config),
            primary: Arc::new(board),
            sub_platform: RwLock::new(None),
            iio_devices,
        })
    }

    /// Session over the board built into this library.
    pub fn detect(config: Config) -> Result<Self> {
        if let Some(path) = &config.json_platform {
            warn!(
                "platform: JSON platform description {} is not supported, using detection",
                path.display()
            );
        }
        let board = platform::detect();
        Self::new(config, board)
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// The primary board.
    pub fn board(&self) -> &Arc<Board> {
        &self.primary
    }

    pub fn sub_platform(&self) -> Option<Arc<Board>> {
        self.sub_platform.read().clone()
    }

    pub fn has_sub_platform(&self) -> bool {
        self.sub_platform.read().is_some()
    }

    fn board_at(&self, offset: PlatformOffset) -> Option<Arc<Board>> {
        match offset {
            PlatformOffset::Main => Some(Arc::clone(&self.primary)),
            PlatformOffset::Sub => self.sub_platform(),
        }
    }

    /// Board and local index addressed by a pin or bus id.
    pub fn resolve(&self, id: u32) -> Result<(Arc<Board>, usize)> {
        if !is_sub_platform_id(id) {
            return Ok((Arc::clone(&self.primary), id as usize));
        }
        match self.sub_platform() {
            Some(sub) => Ok((sub, sub_platform_index(id) as usize)),
            None => {
                error!("platform: sub-platform id {} used without a sub-platform", id);
                Err(XptError::InvalidHandle)
            }
        }
    }

    /// Whether `pin` exists and can perform `mode`.
    pub fn pin_mode_test(&self, pin: u32, mode: PinMode) -> bool {
        let Ok((board, index)) = self.resolve(pin) else {
            return false;
        };
        if matches!(board.platform_type, PlatformType::Unknown | PlatformType::Null) {
            return false;
        }
        board
            .pins
            .get(index)
            .is_some_and(|info| info.capabilities.supports(mode))
    }

    /// "primary" or "primary + sub".
    pub fn platform_name(&self) -> String {
        match self.sub_platform() {
            Some(sub) => format!("{} + {}", self.primary.platform_name, sub.platform_name),
            None => self.primary.platform_name.clone(),
        }
    }

    pub fn platform_type(&self) -> PlatformType {
        self.primary.platform_type
    }

    /// Primary type in the low byte, sub-platform type shifted up by eight.
    pub fn platform_combined_type(&self) -> u32 {
        let sub = self
            .sub_platform()
            .map_or(PlatformType::Unknown, |sub| sub.platform_type);
        self.primary.platform_type.id() | (sub.id() << 8)
    }

    pub fn platform_version(&self, offset: PlatformOffset) -> Option<String> {
        self.board_at(offset)?.platform_version.clone()
    }

    pub fn pin_name(&self, pin: u32) -> Option<String> {
        let (board, index) = self.resolve(pin).ok()?;
        board.pins.get(index).map(|info| info.name.clone())
    }

    /// Backend GPIO number of the GPIO-range pin called `name`.
    pub fn gpio_lookup(&self, name: &str) -> Option<u32> {
        self.primary
            .pins
            .iter()
            .take(self.primary.gpio_count)
            .find(|info| info.name == name)
            .map(|info| info.gpio.pinmap)
    }

    pub fn i2c_lookup(&self, name: &str) -> Option<u32> {
        self.primary
            .i2c_buses
            .iter()
            .find(|bus| bus.name.as_deref() == Some(name))
            .and_then(|bus| bus.bus_id)
    }

    pub fn spi_lookup(&self, name: &str) -> Option<u32> {
        self.primary
            .spi_buses
            .iter()
            .find(|bus| bus.name.as_deref() == Some(name))
            .map(|bus| bus.bus_id)
    }

    pub fn pwm_lookup(&self, name: &str) -> Option<u32> {
        self.primary
            .pwm_devs
            .iter()
            .find(|dev| dev.name.as_deref() == Some(name))
            .map(|dev| dev.index)
    }

    pub fn uart_lookup(&self, name: &str) -> Option<u32> {
        self.primary
            .uart_devs
            .iter()
            .find(|dev| dev.name.as_deref() == Some(name))
            .map(|dev| dev.index)
    }

    pub fn pin_count(&self) -> usize {
        self.primary.phy_pin_count()
    }

    /// Physical pins on the board at `offset`; zero if absent.
    pub fn platform_pin_count(&self, offset: PlatformOffset) -> usize {
        self.board_at(offset).map_or(0, |board| board.phy_pin_count())
    }

    pub fn gpio_count(&self) -> usize {
        self.primary.gpio_count
    }

    pub fn aio_count(&self) -> usize {
        self.primary.aio_count
    }

    pub fn i2c_bus_count(&self) -> usize {
        self.primary.i2c_buses.len()
    }

    pub fn spi_bus_count(&self) -> usize {
        self.primary.spi_buses.len()
    }

    pub fn uart_dev_count(&self) -> usize {
        self.primary.uart_devs.len()
    }

    pub fn pwm_dev_count(&self) -> usize {
        self.primary.pwm_devs.len()
    }

    /// Kernel bus number of I2C table entry `index`.
    pub fn i2c_bus_id(&self, index: usize) -> Option<u32> {
        self.primary.i2c_buses.get(index)?.bus_id
    }

    pub fn default_i2c_bus(&self, offset: PlatformOffset) -> Option<usize> {
        self.board_at(offset).map(|board| board.def_i2c_bus)
    }

    pub fn adc_raw_bits(&self) -> u32 {
        self.primary.adc_raw_bits()
    }

    pub fn adc_supported_bits(&self) -> u32 {
        self.primary.adc_supported_bits()
    }

    pub fn platform_adc_raw_bits(&self, offset: PlatformOffset) -> u32 {
        self.board_at(offset).map_or(0, |board| board.adc_raw_bits())
    }

    pub fn platform_adc_supported_bits(&self, offset: PlatformOffset) -> u32 {
        self.board_at(offset)
            .map_or(0, |board| board.adc_supported_bits())
    }

    pub fn iio_device_count(&self) -> usize {
        self.iio_devices.len()
    }

    pub fn iio_devices(&self) -> &[IioDeviceInfo] {
        &self.iio_devices
    }

    /// Device number of the IIO device whose `name` is exactly `name`.
    pub fn iio_device_num_by_name(&self, name: &str) -> Option<u32> {
        self.iio_devices
            .iter()
            .find(|dev| dev.name.as_deref() == Some(name))
            .map(|dev| dev.num)
    }

    /// Stack an expander board on the primary one.
    ///
    /// `dev` names the attachment point; for GrovePi it is the decimal I2C
    /// bus index on the primary board.
    pub fn add_subplatform(&self, kind: PlatformType, dev: &str) -> Result<()> {
        match kind {
            PlatformType::GenericFirmata => {
                error!("platform: firmata sub-platform support is not built");
                Err(XptError::InvalidParameter)
            }
            PlatformType::GrovePi => {
                if self.primary.platform_type == PlatformType::Unknown
                    || self.primary.i2c_buses.is_empty()
                {
                    error!("platform: grovepi needs a primary platform with an i2c bus");
                    return Err(XptError::FeatureNotSupported);
                }
                if self.has_sub_platform() {
                    error!("platform: a sub-platform is already attached");
                    return Err(XptError::FeatureNotSupported);
                }
                let bus: u32 = dev.trim().parse().map_err(|_| {
                    error!("platform: grovepi: '{}' is not an i2c bus number", dev);
                    XptError::InvalidParameter
                })?;
                let board = grovepi::board(self, bus).map_err(|err| {
                    error!("platform: grovepi: init on i2c bus {} failed: {}", bus, err);
                    XptError::InvalidParameter
                })?;
                board.validate()?;

                let mut slot = self.sub_platform.write();
                if slot.is_some() {
                    return Err(XptError::FeatureNotSupported);
                }
                info!("platform: {} attached on i2c bus {}", board.platform_name, bus);
                *slot = Some(Arc::new(board));
                Ok(())
            }
            other => {
                error!("platform: {:?} cannot be a sub-platform", other);
                Err(XptError::InvalidParameter)
            }
        }
    }

    pub fn remove_subplatform(&self, kind: PlatformType) -> Result<()> {
        if kind == PlatformType::FtdiFt4222 {
            return Err(XptError::InvalidParameter);
        }
        match self.sub_platform.write().take() {
            Some(board) => {
                info!("platform: {} detached", board.platform_name);
                Ok(())
            }
            None => Err(XptError::InvalidParameter),
        }
    }

    /// Open a context from a descriptor such as `GPIO-3`, `i2c-0`,
    /// `PWM-RAW-0-1`, `SPI-RAW-0-1` or `UART-RAW-/dev/ttyS0`.
    pub fn init_io(&self, desc: &str) -> Result<Io> {
        if desc.is_empty() || desc.len() > MAX_IO_DESCRIPTOR {
            error!("init_io: descriptor length {} out of range", desc.len());
            return Err(XptError::InvalidParameter);
        }
        let mut tokens = desc.split('-');
        let kind = tokens.next().unwrap_or_default();
        if kind.is_empty() || kind.len() > 4 {
            error!("init_io: invalid type '{}'", kind);
            return Err(XptError::InvalidParameter);
        }
        let kind = kind.to_ascii_uppercase();
        let Some(second) = tokens.next() else {
            error!("init_io: missing index in '{}'", desc);
            return Err(XptError::InvalidParameter);
        };
        let rest: Vec<&str> = tokens.collect();

        if let Ok(index) = second.parse::<u32>() {
            if !rest.is_empty() {
                error!("init_io: trailing tokens in '{}'", desc);
                return Err(XptError::InvalidParameter);
            }
            return self.open_indexed(&kind, index);
        }
        if second != "RAW" {
            error!("init_io: expected an index or RAW in '{}'", desc);
            return Err(XptError::InvalidParameter);
        }
        self.open_raw(&kind, &rest)
    }

    fn open_indexed(&self, kind: &str, index: u32) -> Result<Io> {
        match kind {
            "GPIO" => Gpio::init(self, index).map(Io::Gpio),
            "I2C" => I2c::init(self, index).map(Io::I2c),
            "AIO" => Aio::init(self, index).map(Io::Aio),
            "PWM" => Pwm::init(self, index).map(Io::Pwm),
            "SPI" => Spi::init(self, index).map(Io::Spi),
            "UART" => Uart::init(self, index).map(Io::Uart),
            other => {
                error!("init_io: unknown type '{}'", other);
                Err(XptError::InvalidParameter)
            }
        }
    }

    fn open_raw(&self, kind: &str, args: &[&str]) -> Result<Io> {
        let numbers = |expected: usize| -> Result<Vec<u32>> {
            if args.len() != expected {
                error!("init_io: {}-RAW takes {} arguments", kind, expected);
                return Err(XptError::InvalidParameter);
            }
            args.iter()
                .map(|arg| arg.parse::<u32>().map_err(|_| XptError::InvalidParameter))
                .collect()
        };

        match kind {
            "GPIO" => {
                let pin = numbers(1)?;
                Gpio::init_raw(self, pin[0]).map(Io::Gpio)
            }
            "I2C" => {
                let bus = numbers(1)?;
                I2c::init_raw(self, bus[0]).map(Io::I2c)
            }
            "PWM" => {
                let ids = numbers(2)?;
                Pwm::init_raw(self, ids[0], ids[1]).map(Io::Pwm)
            }
            "SPI" => {
                let ids = numbers(2)?;
                Spi::init_raw(self, ids[0], ids[1]).map(Io::Spi)
            }
            "UART" => {
                if args.is_empty() {
                    return Err(XptError::InvalidParameter);
                }
                Uart::init_raw(self, args.join("-")).map(Io::Uart)
            }
            other => {
                error!("init_io: type '{}' has no raw form", other);
                Err(XptError::InvalidParameter)
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("platform", &self.platform_name())
            .field("config", &self.config)
            .field("iio_devices", &self.iio_devices.len())
            .finish()
    }
}

static SESSION: RwLock<Option<Arc<Session>>> = RwLock::new(None);

/// Initialise the process-wide session from the environment.
pub fn init() -> Result<Arc<Session>> {
    init_with(Config::from_env())
}

/// Initialise the process-wide session; returns the existing one if already set up.
pub fn init_with(config: Config) -> Result<Arc<Session>> {
    init_slot(|| Session::detect(config))
}

/// Initialise the process-wide session over an explicit board.
pub fn init_board(config: Config, board: Board) -> Result<Arc<Session>> {
    init_slot(|| Session::new(config, board))
}

fn init_slot(build: impl FnOnce() -> Result<Session>) -> Result<Arc<Session>> {
    if let Some(session) = SESSION.read().as_ref() {
        return Ok(Arc::clone(session));
    }
    let mut slot = SESSION.write();
    if let Some(session) = slot.as_ref() {
        return Ok(Arc::clone(session));
    }
    let session = Arc::new(build()?);
    *slot = Some(Arc::clone(&session));
    Ok(session)
}

/// The process-wide session.
pub fn session() -> Result<Arc<Session>> {
    SESSION
        .read()
        .clone()
        .ok_or(XptError::PlatformNotInitialised)
}

/// Drop the process-wide session. Contexts already open stay usable.
pub fn deinit() {
    if SESSION.write().take().is_some() {
        info!("platform: deinitialised");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{Capabilities, I2cBus, PinInfo, Routing, SpiBus};

    fn board() -> Board {
        let mut board = Board::new(PlatformType::Other(7), "test board");
        board.platform_version = Some("1.0".into());
        board.pins = vec![
            PinInfo::new("IO0", Capabilities::GPIO).with_gpio(Routing::new(40)),
            PinInfo::new("IO1", Capabilities::GPIO | Capabilities::PWM).with_gpio(Routing::new(41)),
            PinInfo::new("A0", Capabilities::AIO),
        ];
        board.gpio_count = 2;
        board.aio_count = 1;
        board.adc_raw = 12;
        board.adc_supported = 10;
        board.i2c_buses = vec![I2cBus {
            name: Some("i2c-main".into()),
            bus_id: Some(3),
            ..I2cBus::default()
        }];
        board.spi_buses = vec![SpiBus {
            name: Some("spi0".into()),
            bus_id: 2,
            ..SpiBus::default()
        }];
        board
    }

    fn session() -> Session {
        let root = std::env::temp_dir().join("xpt-registry-no-sysfs");
        Session::new(Config::default().with_sysfs_root(root), board()).unwrap()
    }

    #[test]
    fn test_lookups() {
        let session = session();
        assert_eq!(session.gpio_lookup("IO1"), Some(41));
        assert_eq!(session.gpio_lookup("IO"), None);
        // A0 is outside the GPIO range
        assert_eq!(session.gpio_lookup("A0"), None);
        assert_eq!(session.i2c_lookup("i2c-main"), Some(3));
        assert_eq!(session.spi_lookup("spi0"), Some(2));
        assert_eq!(session.uart_lookup("uart0"), None);
        assert_eq!(session.i2c_bus_id(0), Some(3));
        assert_eq!(session.i2c_bus_id(1), None);
    }

    #[test]
    fn test_counts_and_names() {
        let session = session();
        assert_eq!(session.pin_count(), 3);
        assert_eq!(session.platform_pin_count(PlatformOffset::Sub), 0);
        assert_eq!(session.gpio_count(), 2);
        assert_eq!(session.i2c_bus_count(), 1);
        assert_eq!(session.adc_raw_bits(), 12);
        assert_eq!(session.platform_adc_supported_bits(PlatformOffset::Sub), 0);
        assert_eq!(session.pin_name(2).as_deref(), Some("A0"));
        assert_eq!(session.platform_name(), "test board");
        assert_eq!(
            session.platform_version(PlatformOffset::Main).as_deref(),
            Some("1.0")
        );
        assert_eq!(session.platform_combined_type(), 7 | (99 << 8));
    }

    #[test]
    fn test_pin_mode_test() {
        let session = session();
        assert!(session.pin_mode_test(1, PinMode::Pwm));
        assert!(!session.pin_mode_test(0, PinMode::Pwm));
        assert!(!session.pin_mode_test(9, PinMode::Gpio));
        // No sub-platform attached
        assert!(!session.pin_mode_test(xpt_common::sub_platform_id(0), PinMode::Gpio));
    }

    #[test]
    fn test_null_platform_has_no_capable_pins() {
        let mut board = Board::null();
        board.pins = vec![PinInfo::new("IO0", Capabilities::GPIO)];
        let session = Session::new(Config::default(), board).unwrap();
        assert!(!session.pin_mode_test(0, PinMode::Gpio));
    }

    #[test]
    fn test_resolve_sub_without_sub_platform() {
        let session = session();
        assert_eq!(
            session.resolve(xpt_common::sub_platform_id(1)).err(),
            Some(XptError::InvalidHandle)
        );
    }

    #[test]
    fn test_subplatform_validation() {
        let session = session();
        assert_eq!(
            session.add_subplatform(PlatformType::GenericFirmata, "/dev/ttyACM0"),
            Err(XptError::InvalidParameter)
        );
        assert_eq!(
            session.add_subplatform(PlatformType::GrovePi, "zero"),
            Err(XptError::InvalidParameter)
        );
        assert_eq!(
            session.remove_subplatform(PlatformType::GrovePi),
            Err(XptError::InvalidParameter)
        );
        assert_eq!(
            session.remove_subplatform(PlatformType::FtdiFt4222),
            Err(XptError::InvalidParameter)
        );

        let null = Session::new(Config::default(), Board::null()).unwrap();
        assert_eq!(
            null.add_subplatform(PlatformType::GrovePi, "0"),
            Err(XptError::FeatureNotSupported)
        );
    }

    #[test]
    fn test_init_io_rejects_malformed() {
        let session = session();
        for desc in ["", "GPIOX-1", "GPIO", "GPIO-1-2", "GPIO-raw-1", "AIO-RAW-1", "PWM-RAW-1", "FOO-1"] {
            assert_eq!(
                session.init_io(desc).err(),
                Some(XptError::InvalidParameter),
                "{}",
                desc
            );
        }
        let long = format!("GPIO-{}", "1".repeat(300));
        assert_eq!(session.init_io(&long).err(), Some(XptError::InvalidParameter));
    }
}
