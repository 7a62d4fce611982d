//! Background worker threads for interrupt and buffer delivery.
//!
//! A worker blocks in `poll(2)` on its data descriptor plus the read end of
//! a control socket. Stopping a worker sets the terminating flag and shuts
//! the socket down, which wakes the poll deterministically; the thread is
//! then joined.

use crate::hal::interrupt::{AtomicIsrState, IsrState};
use log::{debug, error};
use std::io;
use std::net::Shutdown;
use std::os::fd::RawFd;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use xpt_common::{Result, XptError};

/// State shared between a context and its worker thread.
#[derive(Debug)]
pub struct WorkerShared {
    terminating: AtomicBool,
    state: AtomicIsrState,
}

impl WorkerShared {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            terminating: AtomicBool::new(false),
            state: AtomicIsrState::new(IsrState::Idle),
        })
    }

    /// Set once a stop has been requested.
    pub fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::Acquire)
    }

    pub fn state(&self) -> IsrState {
        self.state.load()
    }

    pub(crate) fn begin_delivery(&self) -> bool {
        self.state.transition(IsrState::Armed, IsrState::Triggering)
    }

    pub(crate) fn end_delivery(&self) {
        self.state.transition(IsrState::Triggering, IsrState::Armed);
    }

    /// Worker left its loop on its own.
    pub(crate) fn finished(&self) {
        self.state.transition(IsrState::Armed, IsrState::Idle);
    }
}

/// Socket pair: the first end stays with the context, the second goes to the worker.
pub(crate) fn control_pair() -> Result<(UnixStream, UnixStream)> {
    UnixStream::pair().map_err(|err| {
        error!("worker: failed to create control socket: {}", err);
        XptError::NoResources
    })
}

/// Handle to a running worker thread.
pub(crate) struct Worker {
    shared: Arc<WorkerShared>,
    wake: Option<UnixStream>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub(crate) fn spawn<F>(
        name: String,
        shared: Arc<WorkerShared>,
        wake: UnixStream,
        body: F,
    ) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        shared.state.store(IsrState::Armed);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(body)
            .map_err(|err| {
                error!("{}: failed to spawn worker: {}", name, err);
                shared.state.store(IsrState::Idle);
                XptError::NoResources
            })?;
        Ok(Self {
            shared,
            wake: Some(wake),
            handle: Some(handle),
        })
    }

    pub(crate) fn state(&self) -> IsrState {
        self.shared.state()
    }

    /// Flag the worker and wake it; does not wait.
    pub(crate) fn request_stop(&self) {
        self.shared.terminating.store(true, Ordering::Release);
        self.shared.state.store(IsrState::Terminating);
        if let Some(wake) = &self.wake {
            let _ = wake.shutdown(Shutdown::Both);
        }
    }

    /// Stop the worker and wait for it to exit.
    pub(crate) fn join(mut self) -> Result<()> {
        self.request_stop();
        self.wake = None;
        let result = match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| {
                error!("worker: thread panicked");
                XptError::InvalidResource
            }),
            None => Ok(()),
        };
        self.shared.state.store(IsrState::Idle);
        result
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.request_stop();
            self.wake = None;
            if handle.join().is_err() {
                debug!("worker: thread panicked during drop");
            }
        }
    }
}

/// Why [`wait_readable`] returned.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Wake {
    /// The data descriptor reported `events`.
    Ready,
    /// The control socket was signalled.
    Control,
}

/// Block until `fd` reports `events` or `control` becomes readable.
pub(crate) fn wait_readable(fd: RawFd, events: libc::c_short, control: RawFd) -> Result<Wake> {
    let mut fds = [
        libc::pollfd {
            fd,
            events,
            revents: 0,
        },
        libc::pollfd {
            fd: control,
            events: libc::POLLIN,
            revents: 0,
        },
    ];
    loop {
        // SAFETY: `fds` is a valid array of two pollfd entries for the call's duration.
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            error!("worker: poll failed: {}", err);
            return Err(XptError::Unspecified);
        }
        if fds[1].revents != 0 {
            return Ok(Wake::Control);
        }
        if fds[0].revents != 0 {
            return Ok(Wake::Ready);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;

    #[test]
    fn test_control_socket_wakes_poll() {
        let (data_tx, data_rx) = UnixStream::pair().unwrap();
        let (wake, control) = control_pair().unwrap();
        let shared = WorkerShared::new();
        let (tx, rx) = std::sync::mpsc::channel();
        let worker = Worker::spawn("test-worker".into(), shared.clone(), wake, move || {
            let woke = wait_readable(data_rx.as_raw_fd(), libc::POLLIN, control.as_raw_fd());
            tx.send(woke).unwrap();
        })
        .unwrap();
        assert_eq!(worker.state(), IsrState::Armed);
        worker.join().unwrap();
        assert_eq!(rx.recv().unwrap(), Ok(Wake::Control));
        assert!(shared.is_terminating());
        assert_eq!(shared.state(), IsrState::Idle);
        drop(data_tx);
    }
}
