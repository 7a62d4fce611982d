//! SPI bus vocabulary.

/// Clock polarity / phase combination.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum SpiMode {
    /// CPOL = 0, CPHA = 0
    #[default]
    Mode0 = 0,
    /// CPOL = 0, CPHA = 1
    Mode1 = 1,
    /// CPOL = 1, CPHA = 0
    Mode2 = 2,
    /// CPOL = 1, CPHA = 1
    Mode3 = 3,
}

/// Clock used by a freshly opened SPI context.
pub const DEFAULT_CLOCK_HZ: u32 = 4_000_000;
/// Word size used by a freshly opened SPI context.
pub const DEFAULT_BITS_PER_WORD: u32 = 8;
