//! Peripheral Drivers
//!
//! One driver context per peripheral class. Every context carries the
//! dispatch table of the board it was opened on and routes each primitive
//! operation through it before falling back to the default Linux backend.
//!
//! # Available Peripherals
//!
//! - [`gpio`]: sysfs GPIO with edge interrupts
//! - [`aio`]: ADC channels through the iio sysfs interface
//! - [`i2c`]: I2C / SMBus master
//! - [`spi`]: SPI master
//! - [`uart`]: serial ports
//! - [`pwm`]: sysfs PWM outputs
//! - [`led`]: sysfs LED class devices
//! - [`iio`]: Industrial I/O devices, buffers and events

pub mod aio;
pub mod gpio;
pub mod i2c;
pub mod iio;
pub mod led;
pub mod pwm;
pub mod spi;
pub mod uart;

mod sysfs;
mod worker;

pub use worker::WorkerShared;
