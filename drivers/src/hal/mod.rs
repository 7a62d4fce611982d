//! Hardware Abstraction Layer (HAL) - Platform-Independent Vocabulary
//!
//! This module defines the value types and small traits shared by every
//! driver context. Boards and peripheral drivers speak in these types;
//! none of them reference a particular board.
//!
//! # Available Interfaces
//!
//! - [`gpio`]: directions, edges, drive modes and pin traits
//! - [`interrupt`]: interrupt worker lifecycle states
//! - [`i2c`]: bus speed modes
//! - [`spi`]: clock modes
//! - [`serial`]: UART framing

pub mod gpio;
pub mod i2c;
pub mod interrupt;
pub mod serial;
pub mod spi;
