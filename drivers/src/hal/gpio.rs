//! GPIO (General Purpose Input/Output) Hardware Abstraction Layer.
//!
//! Value types shared by the GPIO driver, the mux engine and board hooks,
//! plus the pin traits implemented by [`crate::peripheral::gpio::Gpio`].

use xpt_common::{Result, XptError};

/// Pin logic level.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PinLevel {
    /// Logic low (0V or ground).
    Low,
    /// Logic high (VDD or 3.3V/5V depending on system).
    High,
}

impl From<bool> for PinLevel {
    fn from(value: bool) -> Self {
        if value { PinLevel::High } else { PinLevel::Low }
    }
}

impl From<PinLevel> for bool {
    fn from(level: PinLevel) -> bool {
        matches!(level, PinLevel::High)
    }
}

impl From<PinLevel> for i32 {
    fn from(level: PinLevel) -> i32 {
        match level {
            PinLevel::Low => 0,
            PinLevel::High => 1,
        }
    }
}

/// Pin direction.
///
/// `OutHigh` and `OutLow` switch to output with a glitch-free initial level.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    Out = 0,
    In = 1,
    OutHigh = 2,
    OutLow = 3,
}

impl Direction {
    /// Text accepted by the sysfs `direction` attribute.
    pub const fn sysfs_str(self) -> &'static str {
        match self {
            Direction::Out => "out",
            Direction::In => "in",
            Direction::OutHigh => "high",
            Direction::OutLow => "low",
        }
    }
}

impl TryFrom<u32> for Direction {
    type Error = XptError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Direction::Out),
            1 => Ok(Direction::In),
            2 => Ok(Direction::OutHigh),
            3 => Ok(Direction::OutLow),
            _ => Err(XptError::InvalidParameter),
        }
    }
}

/// Interrupt edge selection.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Edge {
    None = 0,
    Both = 1,
    Rising = 2,
    Falling = 3,
}

impl Edge {
    /// Text accepted by the sysfs `edge` attribute.
    pub const fn sysfs_str(self) -> &'static str {
        match self {
            Edge::None => "none",
            Edge::Both => "both",
            Edge::Rising => "rising",
            Edge::Falling => "falling",
        }
    }

    /// Whether a level change `from` -> `to` is an edge of this kind.
    pub fn matches(self, from: i32, to: i32) -> bool {
        match self {
            Edge::None => false,
            Edge::Both => from != to,
            Edge::Rising => from == 0 && to != 0,
            Edge::Falling => from != 0 && to == 0,
        }
    }
}

/// Output drive / bias configuration.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DriveMode {
    Strong = 0,
    PullUp = 1,
    PullDown = 2,
    HiZ = 3,
}

impl DriveMode {
    /// Text accepted by the sysfs `drive` attribute.
    pub const fn sysfs_str(self) -> &'static str {
        match self {
            DriveMode::Strong => "strong",
            DriveMode::PullUp => "pullup",
            DriveMode::PullDown => "pulldown",
            DriveMode::HiZ => "hiz",
        }
    }
}

impl TryFrom<u32> for DriveMode {
    type Error = XptError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(DriveMode::Strong),
            1 => Ok(DriveMode::PullUp),
            2 => Ok(DriveMode::PullDown),
            3 => Ok(DriveMode::HiZ),
            _ => Err(XptError::InvalidParameter),
        }
    }
}

/// Input polarity.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InputMode {
    ActiveHigh = 0,
    ActiveLow = 1,
}

/// Output stage type.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OutputDriverMode {
    OpenDrain = 0,
    PushPull = 1,
}

/// Input pin trait.
///
/// Reads go through the driver's dispatch table, so they need `&mut self`.
pub trait InputPin {
    /// Error type for read operations.
    type Error: core::fmt::Debug;

    /// Read the pin state.
    fn read_level(&mut self) -> core::result::Result<PinLevel, Self::Error>;

    /// Check if the pin is currently high.
    fn is_high(&mut self) -> core::result::Result<bool, Self::Error> {
        Ok(self.read_level()? == PinLevel::High)
    }

    /// Check if the pin is currently low.
    fn is_low(&mut self) -> core::result::Result<bool, Self::Error> {
        Ok(self.read_level()? == PinLevel::Low)
    }
}

/// Output pin trait.
pub trait OutputPin {
    /// Error type for write operations.
    type Error: core::fmt::Debug;

    /// Set the pin to logic high.
    fn set_high(&mut self) -> core::result::Result<(), Self::Error>;

    /// Set the pin to logic low.
    fn set_low(&mut self) -> core::result::Result<(), Self::Error>;

    /// Set the pin to a specific level.
    fn set_level(&mut self, level: PinLevel) -> core::result::Result<(), Self::Error> {
        match level {
            PinLevel::High => self.set_high(),
            PinLevel::Low => self.set_low(),
        }
    }

    /// Set the pin state based on a boolean value.
    fn set_state(&mut self, state: bool) -> core::result::Result<(), Self::Error> {
        self.set_level(state.into())
    }
}

/// Stateful output pin that can be toggled.
pub trait StatefulOutputPin: OutputPin {
    /// Read back the current output state.
    fn read_output(&mut self) -> core::result::Result<PinLevel, Self::Error>;

    /// Toggle the output state.
    fn toggle(&mut self) -> core::result::Result<(), Self::Error> {
        let level = self.read_output()?;
        self.set_level(if level == PinLevel::High {
            PinLevel::Low
        } else {
            PinLevel::High
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_from_code() {
        assert_eq!(Direction::try_from(2), Ok(Direction::OutHigh));
        assert_eq!(Direction::try_from(9), Err(XptError::InvalidParameter));
        assert_eq!(Direction::OutLow.sysfs_str(), "low");
    }

    #[test]
    fn test_edge_matches() {
        assert!(Edge::Rising.matches(0, 1));
        assert!(!Edge::Rising.matches(1, 0));
        assert!(Edge::Falling.matches(1, 0));
        assert!(Edge::Both.matches(1, 0));
        assert!(!Edge::Both.matches(1, 1));
        assert!(!Edge::None.matches(0, 1));
    }
}
