//! I2C bus vocabulary.

/// Bus speed mode.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum I2cMode {
    /// Up to 100 kHz.
    Std = 0,
    /// Up to 400 kHz.
    Fast = 1,
    /// Up to 3.4 MHz.
    High = 2,
}

/// Largest SMBus block transfer.
pub const SMBUS_BLOCK_MAX: usize = 32;
