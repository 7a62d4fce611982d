//! Platform identifiers and pin addressing.
//!
//! A pin or bus number with bit [`SUB_PLATFORM_BIT_SHIFT`] set addresses the
//! sub-platform (an expander board stacked on the primary one); the
//! remaining bits are the index on that board.

use core::fmt;

/// Bit that selects the sub-platform in a pin or bus id.
pub const SUB_PLATFORM_BIT_SHIFT: u32 = 9;
pub const SUB_PLATFORM_MASK: u32 = 1 << SUB_PLATFORM_BIT_SHIFT;

/// Whether `id` addresses the sub-platform.
pub const fn is_sub_platform_id(id: u32) -> bool {
    id & SUB_PLATFORM_MASK != 0
}

/// Mark `index` as a sub-platform id.
pub const fn sub_platform_id(index: u32) -> u32 {
    index | SUB_PLATFORM_MASK
}

/// Strip the sub-platform bit from `id`.
pub const fn sub_platform_index(id: u32) -> u32 {
    id & !SUB_PLATFORM_MASK
}

/// Known board families.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PlatformType {
    FtdiFt4222,
    GrovePi,
    GenericFirmata,
    AndroidPeripheralManager,
    Mock,
    Json,
    Null,
    Unknown,
    /// A board id without a named variant.
    Other(u32),
}

impl PlatformType {
    pub const fn id(self) -> u32 {
        match self {
            PlatformType::FtdiFt4222 => 256,
            PlatformType::GrovePi => 1024,
            PlatformType::GenericFirmata => 1280,
            PlatformType::AndroidPeripheralManager => 95,
            PlatformType::Mock => 96,
            PlatformType::Json => 97,
            PlatformType::Null => 98,
            PlatformType::Unknown => 99,
            PlatformType::Other(id) => id,
        }
    }

    pub const fn from_id(id: u32) -> Self {
        match id {
            256 => PlatformType::FtdiFt4222,
            1024 => PlatformType::GrovePi,
            1280 => PlatformType::GenericFirmata,
            95 => PlatformType::AndroidPeripheralManager,
            96 => PlatformType::Mock,
            97 => PlatformType::Json,
            98 => PlatformType::Null,
            99 => PlatformType::Unknown,
            other => PlatformType::Other(other),
        }
    }
}

/// Which of the two platform slots a query targets.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum PlatformOffset {
    #[default]
    Main = 0,
    Sub = 1,
}

/// Function a pin can be asked to perform.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PinMode {
    Valid = 0,
    Gpio = 1,
    Pwm = 2,
    FastGpio = 3,
    Spi = 4,
    I2c = 5,
    Aio = 6,
    Uart = 7,
}

impl fmt::Display for PinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PinMode::Valid => "valid",
            PinMode::Gpio => "gpio",
            PinMode::Pwm => "pwm",
            PinMode::FastGpio => "fast gpio",
            PinMode::Spi => "spi",
            PinMode::I2c => "i2c",
            PinMode::Aio => "aio",
            PinMode::Uart => "uart",
        };
        f.write_str(name)
    }
}
