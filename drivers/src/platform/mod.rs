//! Platform Abstraction Layer
//!
//! Each built-in board implements [`Platform`] and produces a [`Board`]
//! description with its dispatch table. The board used by
//! [`Session::detect`](crate::registry::Session::detect) is selected at
//! compile time by cargo feature.
//!
//! # Usage
//!
//! ```no_run
//! use xpt_drivers::platform::{CurrentPlatform, Platform};
//!
//! let board = CurrentPlatform::board();
//! println!("{} with {} pins", CurrentPlatform::name(), board.phy_pin_count());
//! ```

use crate::board::Board;

pub mod grovepi;
pub mod mock;

/// Platform trait - implemented by each built-in board.
pub trait Platform {
    /// Platform name for logging.
    fn name() -> &'static str;

    /// Build the board description.
    fn board() -> Board;
}

/// Fallback board with no pins.
pub struct NullPlatform;

impl Platform for NullPlatform {
    fn name() -> &'static str {
        "Unknown platform"
    }

    fn board() -> Board {
        Board::null()
    }
}

// Platform selection based on Cargo features
cfg_if::cfg_if! {
    if #[cfg(feature = "mock")] {
        pub use mock::MockPlatform as CurrentPlatform;
    } else {
        pub use NullPlatform as CurrentPlatform;
    }
}

/// Board description of the platform this library was built for.
pub fn detect() -> Board {
    let board = CurrentPlatform::board();
    log::info!("platform: detected {}", CurrentPlatform::name());
    board
}
