//! Board description: the per-pin capability table and bus tables.
//!
//! A [`Board`] is plain data plus the board's override dispatch table. It is
//! built once by a platform module, validated when it enters a
//! [`crate::registry::Session`], and read-only afterwards.

use crate::dispatch::AdvanceFunc;
use bitflags::bitflags;
use std::path::PathBuf;
use std::sync::Arc;
use xpt_common::{PinMode, PlatformType, Result, XptError};

/// Most mux steps a single routing may carry.
pub const MAX_MUX_STEPS: usize = 6;
pub const MAX_I2C_BUSES: usize = 12;
pub const MAX_SPI_BUSES: usize = 12;
pub const MAX_AIO_DEVS: usize = 7;
pub const MAX_UART_DEVS: usize = 6;
pub const MAX_PWM_DEVS: usize = 6;

bitflags! {
    /// Functions a physical pin can perform.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct Capabilities: u8 {
        const VALID = 1 << 0;
        const GPIO = 1 << 1;
        const PWM = 1 << 2;
        const FAST_GPIO = 1 << 3;
        const SPI = 1 << 4;
        const I2C = 1 << 5;
        const AIO = 1 << 6;
        const UART = 1 << 7;
    }
}

impl Capabilities {
    pub const fn for_mode(mode: PinMode) -> Self {
        match mode {
            PinMode::Valid => Capabilities::VALID,
            PinMode::Gpio => Capabilities::GPIO,
            PinMode::Pwm => Capabilities::PWM,
            PinMode::FastGpio => Capabilities::FAST_GPIO,
            PinMode::Spi => Capabilities::SPI,
            PinMode::I2c => Capabilities::I2C,
            PinMode::Aio => Capabilities::AIO,
            PinMode::Uart => Capabilities::UART,
        }
    }

    pub fn supports(self, mode: PinMode) -> bool {
        self.contains(Self::for_mode(mode))
    }
}

/// Action of one mux step.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MuxCommand {
    /// Force the control pin to output, then write the value.
    Undefined,
    SetValue,
    SetDirection,
    SetInValue,
    SetOutValue,
    SetMode,
    Skip,
    /// A code the engine does not know; logged and skipped.
    Unknown(u32),
}

impl From<u32> for MuxCommand {
    fn from(code: u32) -> Self {
        match code {
            0 => MuxCommand::Undefined,
            1 => MuxCommand::SetValue,
            2 => MuxCommand::SetDirection,
            3 => MuxCommand::SetInValue,
            4 => MuxCommand::SetOutValue,
            5 => MuxCommand::SetMode,
            6 => MuxCommand::Skip,
            other => MuxCommand::Unknown(other),
        }
    }
}

/// One GPIO action that steers a physical pin to a function.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MuxStep {
    pub command: MuxCommand,
    /// Raw GPIO number of the control pin.
    pub pin: u32,
    pub value: u32,
}

impl MuxStep {
    pub const fn new(command: MuxCommand, pin: u32, value: u32) -> Self {
        Self {
            command,
            pin,
            value,
        }
    }
}

/// How a pin is reached for one function.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Routing {
    /// Backend-native identifier (sysfs gpio number, pwm channel, adc channel).
    pub pinmap: u32,
    /// Parent controller, e.g. the pwm chip.
    pub parent_id: u32,
    pub output_enable: u32,
    mux: Vec<MuxStep>,
}

impl Routing {
    pub fn new(pinmap: u32) -> Self {
        Self {
            pinmap,
            ..Self::default()
        }
    }

    pub fn with_parent(mut self, parent_id: u32) -> Self {
        self.parent_id = parent_id;
        self
    }

    /// Routing with an ordered mux recipe.
    pub fn with_mux(pinmap: u32, steps: &[MuxStep]) -> Result<Self> {
        let mut routing = Self::new(pinmap);
        for step in steps {
            routing.push_mux(*step)?;
        }
        Ok(routing)
    }

    pub fn push_mux(&mut self, step: MuxStep) -> Result<()> {
        if self.mux.len() >= MAX_MUX_STEPS {
            return Err(XptError::NoResources);
        }
        self.mux.push(step);
        Ok(())
    }

    pub fn mux(&self) -> &[MuxStep] {
        &self.mux
    }
}

/// One physical pin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PinInfo {
    pub name: String,
    pub capabilities: Capabilities,
    pub gpio: Routing,
    pub pwm: Routing,
    pub aio: Routing,
    pub i2c: Routing,
    pub spi: Routing,
    pub uart: Routing,
}

impl PinInfo {
    /// A pin with `capabilities`; `VALID` is implied.
    pub fn new(name: impl Into<String>, capabilities: Capabilities) -> Self {
        Self {
            name: name.into(),
            capabilities: capabilities | Capabilities::VALID,
            ..Self::default()
        }
    }

    /// A placeholder for a position that carries no signal.
    pub fn invalid(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_gpio(mut self, routing: Routing) -> Self {
        self.gpio = routing;
        self
    }

    pub fn with_pwm(mut self, routing: Routing) -> Self {
        self.pwm = routing;
        self
    }

    pub fn with_aio(mut self, routing: Routing) -> Self {
        self.aio = routing;
        self
    }

    pub fn with_i2c(mut self, routing: Routing) -> Self {
        self.i2c = routing;
        self
    }

    pub fn with_spi(mut self, routing: Routing) -> Self {
        self.spi = routing;
        self
    }

    pub fn with_uart(mut self, routing: Routing) -> Self {
        self.uart = routing;
        self
    }

    /// Routing record for `mode`; `Valid` has none.
    pub fn routing(&self, mode: PinMode) -> Option<&Routing> {
        match mode {
            PinMode::Gpio | PinMode::FastGpio => Some(&self.gpio),
            PinMode::Pwm => Some(&self.pwm),
            PinMode::Aio => Some(&self.aio),
            PinMode::I2c => Some(&self.i2c),
            PinMode::Spi => Some(&self.spi),
            PinMode::Uart => Some(&self.uart),
            PinMode::Valid => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct I2cBus {
    pub name: Option<String>,
    /// Kernel bus number; `None` selects the board's default bus.
    pub bus_id: Option<u32>,
    /// Physical pin carrying SCL.
    pub scl: Option<usize>,
    /// Physical pin carrying SDA.
    pub sda: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpiBus {
    pub name: Option<String>,
    pub bus_id: u32,
    pub slave_s: u32,
    pub three_wire: bool,
    pub sclk: Option<usize>,
    pub mosi: Option<usize>,
    pub miso: Option<usize>,
    pub cs: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UartDev {
    pub name: Option<String>,
    pub index: u32,
    pub rx: Option<usize>,
    pub tx: Option<usize>,
    pub cts: Option<usize>,
    pub rts: Option<usize>,
    pub device_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PwmDev {
    pub name: Option<String>,
    pub index: u32,
    pub device_path: Option<PathBuf>,
}

/// Physical pin of a non-sequential ADC channel.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct AioDev {
    pub pin: usize,
}

/// Complete description of one board.
#[derive(Debug, Clone)]
pub struct Board {
    pub platform_type: PlatformType,
    pub platform_name: String,
    pub platform_version: Option<String>,
    pub pins: Vec<PinInfo>,
    pub gpio_count: usize,
    pub aio_count: usize,
    pub i2c_buses: Vec<I2cBus>,
    pub def_i2c_bus: usize,
    pub spi_buses: Vec<SpiBus>,
    pub def_spi_bus: usize,
    pub uart_devs: Vec<UartDev>,
    pub def_uart_dev: usize,
    pub pwm_devs: Vec<PwmDev>,
    pub def_pwm_dev: usize,
    pub aio_devs: Vec<AioDev>,
    pub def_aio_dev: usize,
    /// ADC channels are listed in `aio_devs` instead of following the GPIO pins.
    pub aio_non_seq: bool,
    /// Resolution the ADC produces.
    pub adc_raw: u32,
    /// Resolution reported to callers by default.
    pub adc_supported: u32,
    /// Buses are already routed; skip pin muxing in bus init.
    pub no_bus_mux: bool,
    /// Period applied after PWM init, in microseconds.
    pub pwm_default_period: Option<u32>,
    pub pwm_max_period: u32,
    pub pwm_min_period: u32,
    pub adv_func: Arc<AdvanceFunc>,
}

impl Board {
    /// An empty board with no pins or buses.
    pub fn new(platform_type: PlatformType, platform_name: impl Into<String>) -> Self {
        Self {
            platform_type,
            platform_name: platform_name.into(),
            platform_version: None,
            pins: Vec::new(),
            gpio_count: 0,
            aio_count: 0,
            i2c_buses: Vec::new(),
            def_i2c_bus: 0,
            spi_buses: Vec::new(),
            def_spi_bus: 0,
            uart_devs: Vec::new(),
            def_uart_dev: 0,
            pwm_devs: Vec::new(),
            def_pwm_dev: 0,
            aio_devs: Vec::new(),
            def_aio_dev: 0,
            aio_non_seq: false,
            adc_raw: 0,
            adc_supported: 0,
            no_bus_mux: false,
            pwm_default_period: None,
            pwm_max_period: 0,
            pwm_min_period: 0,
            adv_func: Arc::new(AdvanceFunc::default()),
        }
    }

    /// Fallback used when detection finds nothing.
    pub fn null() -> Self {
        Self::new(PlatformType::Null, "Unknown platform")
    }

    pub fn with_adv_func(mut self, adv_func: AdvanceFunc) -> Self {
        self.adv_func = Arc::new(adv_func);
        self
    }

    pub fn phy_pin_count(&self) -> usize {
        self.pins.len()
    }

    /// Check table sizes against the fixed maxima.
    pub fn validate(&self) -> Result<()> {
        let limits = [
            ("i2c bus", self.i2c_buses.len(), MAX_I2C_BUSES),
            ("spi bus", self.spi_buses.len(), MAX_SPI_BUSES),
            ("aio device", self.aio_devs.len(), MAX_AIO_DEVS),
            ("uart device", self.uart_devs.len(), MAX_UART_DEVS),
            ("pwm device", self.pwm_devs.len(), MAX_PWM_DEVS),
        ];
        for (what, count, max) in limits {
            if count > max {
                log::error!("{}: {} {} entries exceed the maximum of {}", self.platform_name, count, what, max);
                return Err(XptError::NoResources);
            }
        }
        if self.gpio_count > self.pins.len() {
            log::error!(
                "{}: gpio_count {} exceeds {} physical pins",
                self.platform_name,
                self.gpio_count,
                self.pins.len()
            );
            return Err(XptError::InvalidParameter);
        }
        Ok(())
    }

    /// Pin `index` if it exists and can perform `mode`.
    pub fn pin(&self, index: usize, mode: PinMode) -> Result<&PinInfo> {
        let Some(info) = self.pins.get(index) else {
            log::error!("{}: pin {} beyond {} physical pins", mode, index, self.pins.len());
            return Err(XptError::InvalidResource);
        };
        if !info.capabilities.supports(mode) {
            log::error!("{}: pin {} not capable", mode, index);
            return Err(XptError::FeatureNotSupported);
        }
        Ok(info)
    }

    /// Resolution reported by AIO reads; zero when the board has no ADC.
    pub fn adc_raw_bits(&self) -> u32 {
        if self.aio_count == 0 { 0 } else { self.adc_raw }
    }

    pub fn adc_supported_bits(&self) -> u32 {
        if self.aio_count == 0 { 0 } else { self.adc_supported }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_pin_board() -> Board {
        let mut board = Board::new(PlatformType::Unknown, "test");
        board.pins = vec![
            PinInfo::new("IO0", Capabilities::GPIO).with_gpio(Routing::new(17)),
            PinInfo::invalid("NC"),
        ];
        board.gpio_count = 1;
        board
    }

    #[test]
    fn test_capability_check() {
        let board = two_pin_board();
        assert_eq!(board.pin(0, PinMode::Gpio).unwrap().gpio.pinmap, 17);
        assert_eq!(board.pin(0, PinMode::Pwm), Err(XptError::FeatureNotSupported));
        assert_eq!(board.pin(1, PinMode::Valid), Err(XptError::FeatureNotSupported));
        assert_eq!(board.pin(2, PinMode::Gpio), Err(XptError::InvalidResource));
    }

    #[test]
    fn test_mux_capacity() {
        let step = MuxStep::new(MuxCommand::SetValue, 1, 0);
        let mut routing = Routing::with_mux(3, &[step; MAX_MUX_STEPS]).unwrap();
        assert_eq!(routing.mux().len(), MAX_MUX_STEPS);
        assert_eq!(routing.push_mux(step), Err(XptError::NoResources));
    }

    #[test]
    fn test_mux_command_codes() {
        assert_eq!(MuxCommand::from(2), MuxCommand::SetDirection);
        assert_eq!(MuxCommand::from(6), MuxCommand::Skip);
        assert_eq!(MuxCommand::from(40), MuxCommand::Unknown(40));
    }

    #[test]
    fn test_validate_limits() {
        let mut board = two_pin_board();
        assert!(board.validate().is_ok());
        board.uart_devs = vec![UartDev::default(); MAX_UART_DEVS + 1];
        assert_eq!(board.validate(), Err(XptError::NoResources));
    }

    #[test]
    fn test_adc_bits_without_aio() {
        let mut board = two_pin_board();
        board.adc_raw = 12;
        board.adc_supported = 10;
        assert_eq!(board.adc_raw_bits(), 0);
        board.aio_count = 1;
        assert_eq!(board.adc_raw_bits(), 12);
        assert_eq!(board.adc_supported_bits(), 10);
    }
}
