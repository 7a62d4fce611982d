//! Override dispatch table.
//!
//! A board customises any primitive operation by installing hooks in its
//! [`AdvanceFunc`]:
//!
//! - `*_replace`: runs instead of the default and its result is returned
//!   verbatim.
//! - `*_pre`: runs before the default; a failure is returned verbatim and
//!   nothing else runs.
//! - `*_post`: runs after a successful default; its failure becomes the
//!   operation's result.
//!
//! When a replace hook is installed, pre and post hooks for the same
//! operation are not run. Absent hooks cost nothing beyond the `Option`
//! check. Tables are immutable once a board is built and are shared by
//! every context opened on that board.

use crate::hal::gpio::{Direction, DriveMode, Edge, OutputDriverMode};
use crate::hal::i2c::I2cMode;
use crate::hal::serial::Parity;
use crate::hal::spi::SpiMode;
use crate::peripheral::aio::Aio;
use crate::peripheral::gpio::Gpio;
use crate::peripheral::gpio::isr::{IsrCallback, IsrWaiter};
use crate::peripheral::i2c::I2c;
use crate::peripheral::pwm::Pwm;
use crate::peripheral::spi::Spi;
use crate::peripheral::uart::Uart;
use core::fmt;
use std::path::Path;
use std::sync::Arc;
use xpt_common::Result;

/// Hook taking a context and one argument.
pub type Hook<C, A, T = ()> = Arc<dyn Fn(&mut C, A) -> Result<T> + Send + Sync>;
/// Hook taking only a context.
pub type CtxHook<C> = Arc<dyn Fn(&mut C) -> Result<()> + Send + Sync>;
/// Runs before a context exists, with the requested pin, bus or index.
pub type InitPreHook = Arc<dyn Fn(u32) -> Result<()> + Send + Sync>;
/// Fills a caller buffer; returns the number of bytes produced.
pub type ReadBufHook<C> = Arc<dyn Fn(&mut C, &mut [u8]) -> Result<usize> + Send + Sync>;
/// Consumes a caller buffer.
pub type WriteBufHook<C, T = ()> = Arc<dyn Fn(&mut C, &[u8]) -> Result<T> + Send + Sync>;
/// Full-duplex transfer of `tx` into `rx`.
pub type TransferHook<C, W> = Arc<dyn Fn(&mut C, &[W], &mut [W]) -> Result<()> + Send + Sync>;
/// Runs on the interrupt worker; blocks until the next edge.
pub type IsrWaitHook = Arc<dyn Fn(&IsrWaiter) -> Result<()> + Send + Sync>;
/// Replaces the whole arm sequence.
pub type IsrReplaceHook = Arc<dyn Fn(&mut Gpio, Edge, IsrCallback) -> Result<()> + Send + Sync>;

/// Pre, replace and post hooks of one operation.
pub struct OpHooks<C, A, T = ()> {
    pub pre: Option<Hook<C, A>>,
    pub replace: Option<Hook<C, A, T>>,
    pub post: Option<Hook<C, A>>,
}

impl<C, A, T> Default for OpHooks<C, A, T> {
    fn default() -> Self {
        Self {
            pre: None,
            replace: None,
            post: None,
        }
    }
}

impl<C, A, T> Clone for OpHooks<C, A, T> {
    fn clone(&self) -> Self {
        Self {
            pre: self.pre.clone(),
            replace: self.replace.clone(),
            post: self.post.clone(),
        }
    }
}

impl<C, A: Copy, T> OpHooks<C, A, T> {
    pub fn is_empty(&self) -> bool {
        self.pre.is_none() && self.replace.is_none() && self.post.is_none()
    }

    /// Run the operation through its hooks, falling back to `default`.
    pub fn run(
        &self,
        ctx: &mut C,
        arg: A,
        default: impl FnOnce(&mut C, A) -> Result<T>,
    ) -> Result<T> {
        if let Some(replace) = &self.replace {
            return replace(ctx, arg);
        }
        if let Some(pre) = &self.pre {
            pre(ctx, arg)?;
        }
        let value = default(ctx, arg)?;
        if let Some(post) = &self.post {
            post(ctx, arg)?;
        }
        Ok(value)
    }
}

#[derive(Default, Clone)]
pub struct GpioHooks {
    /// Fills a fresh context for the raw pin instead of exporting it.
    pub init_internal_replace: Option<Hook<Gpio, u32>>,
    pub init_pre: Option<InitPreHook>,
    pub init_post: Option<CtxHook<Gpio>>,
    pub close_pre: Option<CtxHook<Gpio>>,
    pub close_replace: Option<CtxHook<Gpio>>,
    pub mode: OpHooks<Gpio, DriveMode>,
    pub edge_mode_replace: Option<Hook<Gpio, Edge>>,
    pub dir: OpHooks<Gpio, Direction>,
    pub read_dir_replace: Option<Hook<Gpio, (), Direction>>,
    pub read_replace: Option<Hook<Gpio, (), i32>>,
    pub write: OpHooks<Gpio, i32>,
    pub mmap_setup: Option<Hook<Gpio, bool>>,
    /// Runs before the worker starts, in place of opening the value file.
    pub interrupt_handler_init_replace: Option<Arc<dyn Fn(&mut IsrWaiter) -> Result<()> + Send + Sync>>,
    pub wait_interrupt_replace: Option<IsrWaitHook>,
    pub isr_replace: Option<IsrReplaceHook>,
    pub isr_exit_replace: Option<CtxHook<Gpio>>,
    pub out_driver_mode_replace: Option<Hook<Gpio, OutputDriverMode>>,
}

#[derive(Default, Clone)]
pub struct I2cHooks {
    pub init_pre: Option<InitPreHook>,
    /// Opens the bus instead of the kernel device node.
    pub init_bus_replace: Option<CtxHook<I2c>>,
    pub init_post: Option<CtxHook<I2c>>,
    pub set_frequency_replace: Option<Hook<I2c, I2cMode>>,
    pub address_replace: Option<Hook<I2c, u8>>,
    pub read_replace: Option<ReadBufHook<I2c>>,
    pub read_byte_replace: Option<Hook<I2c, (), u8>>,
    pub read_byte_data_replace: Option<Hook<I2c, u8, u8>>,
    pub read_word_data_replace: Option<Hook<I2c, u8, u16>>,
    pub read_bytes_data_replace:
        Option<Arc<dyn Fn(&mut I2c, u8, &mut [u8]) -> Result<usize> + Send + Sync>>,
    pub write_replace: Option<WriteBufHook<I2c>>,
    pub write_byte_replace: Option<Hook<I2c, u8>>,
    /// Argument is `(data, command)`.
    pub write_byte_data_replace: Option<Hook<I2c, (u8, u8)>>,
    /// Argument is `(data, command)`.
    pub write_word_data_replace: Option<Hook<I2c, (u16, u8)>>,
    pub stop_replace: Option<CtxHook<I2c>>,
}

#[derive(Default, Clone)]
pub struct AioHooks {
    pub init_internal_replace: Option<Hook<Aio, u32>>,
    pub init_pre: Option<InitPreHook>,
    pub init_post: Option<CtxHook<Aio>>,
    pub close_replace: Option<CtxHook<Aio>>,
    pub read_replace: Option<Hook<Aio, (), u32>>,
    /// Opens the channel's value source instead of the iio sysfs file.
    pub get_valid_fp: Option<CtxHook<Aio>>,
}

#[derive(Default, Clone)]
pub struct PwmHooks {
    /// Takes over `Pwm::init` once the capability check passes; gets the board-local pin.
    pub init_replace: Option<Hook<Pwm, u32>>,
    /// Fills the context after the capability check and muxing.
    pub init_internal_replace: Option<Hook<Pwm, u32>>,
    pub init_raw_replace: Option<Hook<Pwm, u32>>,
    pub init_pre: Option<InitPreHook>,
    pub init_post: Option<CtxHook<Pwm>>,
    /// Argument is the period in nanoseconds.
    pub period_replace: Option<Hook<Pwm, u32>>,
    pub read_replace: Option<Hook<Pwm, (), f32>>,
    pub write: OpHooks<Pwm, f32>,
    pub enable: OpHooks<Pwm, bool>,
}

#[derive(Default, Clone)]
pub struct SpiHooks {
    pub init_pre: Option<InitPreHook>,
    pub init_post: Option<CtxHook<Spi>>,
    /// Argument is `(bus, chip select)`.
    pub init_raw_replace: Option<Hook<Spi, (u32, u32)>>,
    pub lsbmode_replace: Option<Hook<Spi, bool>>,
    pub mode_replace: Option<Hook<Spi, SpiMode>>,
    pub bit_per_word_replace: Option<Hook<Spi, u32>>,
    pub frequency_replace: Option<Hook<Spi, u32>>,
    pub write_replace: Option<Hook<Spi, u8, u8>>,
    pub write_word_replace: Option<Hook<Spi, u16, u16>>,
    pub transfer_buf_replace: Option<TransferHook<Spi, u8>>,
    pub transfer_buf_word_replace: Option<TransferHook<Spi, u16>>,
    pub stop_replace: Option<CtxHook<Spi>>,
}

#[derive(Default, Clone)]
pub struct UartHooks {
    pub init_pre: Option<InitPreHook>,
    pub init_post: Option<CtxHook<Uart>>,
    pub init_raw_replace: Option<Arc<dyn Fn(&mut Uart, &Path) -> Result<()> + Send + Sync>>,
    pub flush_replace: Option<CtxHook<Uart>>,
    /// Argument is the break duration in milliseconds.
    pub sendbreak_replace: Option<Hook<Uart, u32>>,
    pub set_baudrate_replace: Option<Hook<Uart, u32>>,
    /// Argument is `(data bits, parity, stop bits)`.
    pub set_mode_replace: Option<Hook<Uart, (u8, Parity, u8)>>,
    /// Argument is `(xon/xoff, rts/cts)`.
    pub set_flowcontrol_replace: Option<Hook<Uart, (bool, bool)>>,
    /// Argument is `(read, write, interchar)` in milliseconds.
    pub set_timeout_replace: Option<Hook<Uart, (u32, u32, u32)>>,
    pub set_non_blocking_replace: Option<Hook<Uart, bool>>,
    pub read_replace: Option<ReadBufHook<Uart>>,
    pub write_replace: Option<WriteBufHook<Uart, usize>>,
    pub data_available_replace: Option<Hook<Uart, u32, bool>>,
}

/// Per-board override dispatch table.
#[derive(Default, Clone)]
pub struct AdvanceFunc {
    pub gpio: GpioHooks,
    pub i2c: I2cHooks,
    pub aio: AioHooks,
    pub pwm: PwmHooks,
    pub spi: SpiHooks,
    pub uart: UartHooks,
}

impl fmt::Debug for AdvanceFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdvanceFunc").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use xpt_common::XptError;

    #[derive(Default)]
    struct Ctx {
        trace: Vec<&'static str>,
    }

    fn push(tag: &'static str) -> Hook<Ctx, u8> {
        Arc::new(move |ctx: &mut Ctx, _: u8| -> Result<()> {
            ctx.trace.push(tag);
            Ok(())
        })
    }

    fn default_op(ctx: &mut Ctx, arg: u8) -> Result<u8> {
        ctx.trace.push("default");
        Ok(arg * 2)
    }

    #[test]
    fn test_no_hooks_runs_default() {
        let hooks: OpHooks<Ctx, u8, u8> = OpHooks::default();
        assert!(hooks.is_empty());
        let mut ctx = Ctx::default();
        assert_eq!(hooks.run(&mut ctx, 4, default_op), Ok(8));
        assert_eq!(ctx.trace, ["default"]);
    }

    #[test]
    fn test_pre_and_post_wrap_default() {
        let hooks = OpHooks::<Ctx, u8, u8> {
            pre: Some(push("pre")),
            replace: None,
            post: Some(push("post")),
        };
        let mut ctx = Ctx::default();
        assert_eq!(hooks.run(&mut ctx, 1, default_op), Ok(2));
        assert_eq!(ctx.trace, ["pre", "default", "post"]);
    }

    #[test]
    fn test_replace_skips_default_and_wrappers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let hooks = OpHooks::<Ctx, u8, u8> {
            pre: Some(push("pre")),
            replace: Some(Arc::new(move |_: &mut Ctx, arg: u8| -> Result<u8> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(arg + 100)
            })),
            post: Some(push("post")),
        };
        let mut ctx = Ctx::default();
        assert_eq!(hooks.run(&mut ctx, 1, default_op), Ok(101));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(ctx.trace.is_empty());
    }

    #[test]
    fn test_failing_pre_short_circuits() {
        let hooks = OpHooks::<Ctx, u8, u8> {
            pre: Some(Arc::new(|_: &mut Ctx, _: u8| -> Result<()> {
                Err(XptError::NoResources)
            })),
            replace: None,
            post: Some(push("post")),
        };
        let mut ctx = Ctx::default();
        assert_eq!(hooks.run(&mut ctx, 1, default_op), Err(XptError::NoResources));
        assert!(ctx.trace.is_empty());
    }

    #[test]
    fn test_failing_post_is_the_result() {
        let hooks = OpHooks::<Ctx, u8, u8> {
            pre: None,
            replace: None,
            post: Some(Arc::new(|_: &mut Ctx, _: u8| -> Result<()> {
                Err(XptError::InvalidResource)
            })),
        };
        let mut ctx = Ctx::default();
        assert_eq!(hooks.run(&mut ctx, 1, default_op), Err(XptError::InvalidResource));
        assert_eq!(ctx.trace, ["default"]);
    }
}
