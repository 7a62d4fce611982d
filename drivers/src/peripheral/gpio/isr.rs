//! GPIO edge interrupts.
//!
//! Arming spawns one worker thread per context. The worker waits for an
//! edge (by default `poll(2)` for `POLLPRI` on the sysfs value file) and
//! delivers it to a callback or a channel. Disarming is synchronous: it
//! returns after the worker has exited.

use super::Gpio;
use crate::dispatch::IsrWaitHook;
use crate::hal::gpio::Edge;
use crate::hal::interrupt::IsrState;
use crate::peripheral::worker::{self, Wake, Worker, WorkerShared};
use log::{debug, error};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Instant;
use xpt_common::{Result, XptError};

/// Edge callback; runs on the worker thread.
pub type IsrCallback = Box<dyn FnMut() + Send + 'static>;

/// One delivered edge.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct IsrEvent {
    pub pin: u32,
    pub at: Instant,
}

/// Worker-side view handed to the interrupt hooks.
pub struct IsrWaiter {
    pin: u32,
    value: Option<File>,
    control: UnixStream,
    shared: Arc<WorkerShared>,
}

impl IsrWaiter {
    /// Backend GPIO number.
    pub fn pin(&self) -> u32 {
        self.pin
    }

    /// A wait hook must return once this turns true.
    pub fn is_terminating(&self) -> bool {
        self.shared.is_terminating()
    }

    /// Becomes readable when a disarm is requested; add it to any poll set.
    pub fn control_fd(&self) -> RawFd {
        self.control.as_raw_fd()
    }

    pub fn value_file(&self) -> Option<&File> {
        self.value.as_ref()
    }

    /// Install the descriptor the default wait polls.
    pub fn set_value_file(&mut self, file: File) {
        self.value = Some(file);
    }
}

pub(super) struct IsrHandle {
    worker: Worker,
}

enum IsrSink {
    Callback(IsrCallback),
    Channel(Sender<IsrEvent>),
}

impl IsrSink {
    /// Returns false once nobody is listening.
    fn deliver(&mut self, pin: u32) -> bool {
        match self {
            IsrSink::Callback(callback) => {
                callback();
                true
            }
            IsrSink::Channel(tx) => tx
                .send(IsrEvent {
                    pin,
                    at: Instant::now(),
                })
                .is_ok(),
        }
    }
}

impl Gpio {
    /// Call `callback` on every `edge`.
    ///
    /// Fails with `NoResources` if an interrupt is already armed.
    pub fn isr(&mut self, edge: Edge, callback: IsrCallback) -> Result<()> {
        let table = Arc::clone(&self.table);
        if let Some(replace) = &table.gpio.isr_replace {
            return replace(self, edge, callback);
        }
        self.arm(edge, IsrSink::Callback(callback))
    }

    /// Deliver every `edge` as an [`IsrEvent`]; dropping the receiver stops delivery.
    pub fn isr_events(&mut self, edge: Edge) -> Result<Receiver<IsrEvent>> {
        let (tx, rx) = mpsc::channel();
        let table = Arc::clone(&self.table);
        if let Some(replace) = &table.gpio.isr_replace {
            let pin = self.pin;
            let forward: IsrCallback = Box::new(move || {
                let _ = tx.send(IsrEvent {
                    pin,
                    at: Instant::now(),
                });
            });
            replace(self, edge, forward)?;
        } else {
            self.arm(edge, IsrSink::Channel(tx))?;
        }
        Ok(rx)
    }

    fn arm(&mut self, edge: Edge, sink: IsrSink) -> Result<()> {
        if self.isr.is_some() {
            error!("gpio{}: isr: interrupt already armed", self.pin);
            return Err(XptError::NoResources);
        }
        self.edge_mode(edge)?;
        match self.start_worker(sink) {
            Ok(worker) => {
                debug!("gpio{}: interrupt armed on {:?} edge", self.pin, edge);
                self.isr = Some(IsrHandle { worker });
                Ok(())
            }
            Err(err) => {
                if let Err(reset) = self.edge_mode(Edge::None) {
                    debug!("gpio{}: isr: edge reset failed: {}", self.pin, reset);
                }
                Err(err)
            }
        }
    }

    fn start_worker(&mut self, sink: IsrSink) -> Result<Worker> {
        let (wake, control) = worker::control_pair()?;
        let shared = WorkerShared::new();
        let mut waiter = IsrWaiter {
            pin: self.pin,
            value: None,
            control,
            shared: Arc::clone(&shared),
        };
        let table = Arc::clone(&self.table);
        match &table.gpio.interrupt_handler_init_replace {
            Some(init) => init(&mut waiter)?,
            None => {
                let file = File::open(self.attr("value")).map_err(|err| {
                    error!("gpio{}: isr: failed to open 'value': {}", self.pin, err);
                    XptError::InvalidResource
                })?;
                waiter.set_value_file(file);
            }
        }

        let wait = table.gpio.wait_interrupt_replace.clone();
        Worker::spawn(format!("gpio{}-isr", self.pin), shared, wake, move || {
            run(waiter, wait, sink)
        })
    }

    /// Disarm the interrupt and wait for the worker to exit.
    ///
    /// Succeeds without effect when nothing is armed.
    pub fn isr_exit(&mut self) -> Result<()> {
        let table = Arc::clone(&self.table);
        if let Some(replace) = &table.gpio.isr_exit_replace {
            return replace(self);
        }
        let Some(handle) = self.isr.take() else {
            return Ok(());
        };

        handle.worker.request_stop();
        let edge_reset = self.edge_mode(Edge::None);
        handle.worker.join()?;
        debug!("gpio{}: interrupt disarmed", self.pin);
        edge_reset
    }

    pub fn isr_state(&self) -> IsrState {
        self.isr
            .as_ref()
            .map_or(IsrState::Idle, |handle| handle.worker.state())
    }
}

fn run(mut waiter: IsrWaiter, wait: Option<IsrWaitHook>, mut sink: IsrSink) {
    loop {
        let woke = match &wait {
            Some(hook) => hook(&waiter),
            None => wait_edge(&waiter),
        };
        if woke.is_err() || waiter.is_terminating() {
            break;
        }
        if !waiter.shared.begin_delivery() {
            break;
        }
        let listening = sink.deliver(waiter.pin);
        waiter.shared.end_delivery();
        if !listening {
            debug!("gpio{}: event receiver dropped", waiter.pin);
            break;
        }
    }
    waiter.shared.finished();
    waiter.value = None;
}

fn wait_edge(waiter: &IsrWaiter) -> Result<()> {
    let Some(mut file) = waiter.value.as_ref() else {
        return Err(XptError::InvalidResource);
    };
    let mut buf = [0u8; 2];
    // Reading clears the pending edge state.
    file.seek(SeekFrom::Start(0)).map_err(|_| XptError::Unspecified)?;
    let _ = file.read(&mut buf);

    match worker::wait_readable(file.as_raw_fd(), libc::POLLPRI, waiter.control_fd())? {
        Wake::Control => Err(XptError::NoDataAvailable),
        Wake::Ready => {
            file.seek(SeekFrom::Start(0)).map_err(|_| XptError::Unspecified)?;
            let _ = file.read(&mut buf);
            Ok(())
        }
    }
}
