//! Shared vocabulary for the board abstraction layer.
//!
//! # Module Organization
//!
//! - [`error`]: result-code taxonomy returned by every operation
//! - [`platform`]: platform identifiers, sub-platform pin addressing and pin modes

pub mod error;
pub mod platform;

pub use error::{Result, SUCCESS, XptError, result_code};
pub use platform::{
    PinMode, PlatformOffset, PlatformType, SUB_PLATFORM_BIT_SHIFT, SUB_PLATFORM_MASK,
    is_sub_platform_id, sub_platform_id, sub_platform_index,
};
