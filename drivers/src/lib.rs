//! Board Abstraction Layer for Single-Board Computers
//!
//! Portable access to GPIO, ADC, I2C, SPI, UART, PWM, LED and IIO devices.
//! A board is described once as data (a pin capability table plus bus
//! tables) together with a dispatch table of optional hooks; the same driver
//! code then runs on every board.
//!
//! # Module Organization
//!
//! - [`hal`]: platform-independent value types (directions, edges, modes)
//! - [`board`]: pin capability table and bus tables
//! - [`dispatch`]: per-board pre/replace/post override hooks
//! - [`mux`]: pin multiplexer recipes
//! - [`registry`]: the session holding the primary board and sub-platform
//! - [`peripheral`]: driver contexts
//! - [`platform`]: built-in boards
//!
//! # Usage Example
//!
//! ```no_run
//! use xpt_drivers::hal::gpio::Direction;
//! use xpt_drivers::peripheral::gpio::Gpio;
//!
//! let session = xpt_drivers::init()?;
//! let mut led = Gpio::init(&session, 7)?;
//! led.dir(Direction::Out)?;
//! led.write(1)?;
//! # Ok::<(), xpt_drivers::XptError>(())
//! ```

pub mod board;
pub mod config;
pub mod dispatch;
pub mod hal;
pub mod mux;
pub mod peripheral;
pub mod platform;
pub mod registry;

// Re-export commonly used types
pub use board::{Board, Capabilities, PinInfo, Routing};
pub use config::Config;
pub use dispatch::AdvanceFunc;
pub use registry::{Io, Session, deinit, init, init_board, init_with, session};
pub use xpt_common::{PinMode, PlatformOffset, PlatformType, Result, XptError};

use log::LevelFilter;

/// Set the highest level of messages the library emits.
///
/// Takes a syslog level: 0..=3 keep errors only, 4 adds warnings, 5 and 6
/// add informational messages and 7 enables debug output.
pub fn set_log_level(level: i32) -> Result<()> {
    let filter = match level {
        0..=3 => LevelFilter::Error,
        4 => LevelFilter::Warn,
        5 | 6 => LevelFilter::Info,
        7 => LevelFilter::Debug,
        _ => {
            log::error!("set_log_level: invalid level {}", level);
            return Err(XptError::InvalidParameter);
        }
    };
    log::set_max_level(filter);
    log::debug!("set_log_level: {}", filter);
    Ok(())
}

/// Library version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_log_level() {
        assert_eq!(set_log_level(8), Err(XptError::InvalidParameter));
        assert_eq!(set_log_level(-1), Err(XptError::InvalidParameter));
        set_log_level(4).unwrap();
        assert_eq!(log::max_level(), LevelFilter::Warn);
        set_log_level(7).unwrap();
        assert_eq!(log::max_level(), LevelFilter::Debug);
    }

    #[test]
    fn test_version() {
        assert_eq!(version(), "0.1.0");
    }
}
