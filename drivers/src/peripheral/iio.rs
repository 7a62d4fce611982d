//! Industrial I/O devices.
//!
//! Devices are discovered under `bus/iio/devices/iio:device<N>`. A context
//! scans the device's buffer channels (`scan_elements`) and events, gives
//! access to its sysfs attributes, and can run one worker thread that
//! delivers either triggered buffer records or events from
//! `/dev/iio:device<N>`.

use crate::config::Config;
use crate::hal::interrupt::IsrState;
use crate::peripheral::sysfs;
use crate::peripheral::worker::{self, Wake, Worker, WorkerShared};
use crate::registry::Session;
use log::{debug, error, warn};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::os::fd::{AsRawFd, FromRawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use xpt_common::{Result, XptError};

const DEVICE_PREFIX: &str = "iio:device";
/// `_IOR('i', 0x90, int)`
const IIO_GET_EVENT_FD_IOCTL: u32 = 0x8004_6990;
/// Largest chunk read from a buffer in one go.
const BUFFER_READ_MAX: usize = 128 * 100;

/// A device found at detection time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IioDeviceInfo {
    pub num: u32,
    /// Contents of the device's `name` attribute, if readable.
    pub name: Option<String>,
}

/// List `iio:device*` entries, ordered by device number.
pub fn detect(config: &Config) -> Vec<IioDeviceInfo> {
    let root = config.iio_devices();
    let Ok(entries) = fs::read_dir(&root) else {
        debug!("iio: no devices under {}", root.display());
        return Vec::new();
    };
    let mut devices: Vec<IioDeviceInfo> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let file_name = entry.file_name();
            let num = file_name.to_str()?.strip_prefix(DEVICE_PREFIX)?.parse().ok()?;
            let name = sysfs::read_attr(&entry.path().join("name"))
                .ok()
                .filter(|name| !name.is_empty());
            Some(IioDeviceInfo { num, name })
        })
        .collect();
    devices.sort_by_key(|dev| dev.num);
    devices
}

/// One buffer channel, decoded from `scan_elements/<chan>_{index,type,en}`.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct IioChannel {
    pub index: u32,
    pub enabled: bool,
    pub lendian: bool,
    pub signed: bool,
    pub mask: u64,
    pub bits_used: u32,
    /// Storage size in bytes.
    pub bytes: u32,
    pub shift: u32,
    /// Byte offset inside one buffer record.
    pub location: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IioEvent {
    pub name: String,
    pub enabled: bool,
}

/// Raw `struct iio_event_data`.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct IioEventData {
    pub id: u64,
    pub timestamp: i64,
}

impl IioEventData {
    const SIZE: usize = 16;

    fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let mut id = [0u8; 8];
        let mut timestamp = [0u8; 8];
        id.copy_from_slice(&bytes[..8]);
        timestamp.copy_from_slice(&bytes[8..]);
        Self {
            id: u64::from_ne_bytes(id),
            timestamp: i64::from_ne_bytes(timestamp),
        }
    }
}

/// Bit fields of an IIO event code.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct IioEventCode {
    pub chan_type: u32,
    pub modifier: u32,
    pub kind: u32,
    pub direction: u32,
    pub channel: i16,
    pub channel2: i16,
    pub differential: bool,
}

pub fn extract_event(event: &IioEventData) -> IioEventCode {
    let id = event.id;
    IioEventCode {
        chan_type: ((id >> 32) & 0xff) as u32,
        modifier: ((id >> 40) & 0xff) as u32,
        kind: ((id >> 56) & 0xff) as u32,
        direction: ((id >> 48) & 0x7f) as u32,
        channel: (id & 0xffff) as u16 as i16,
        channel2: ((id >> 16) & 0xffff) as u16 as i16,
        differential: (id >> 55) & 0x1 == 1,
    }
}

/// Buffer record callback; receives one record of `read_size()` bytes.
pub type BufferCallback = Box<dyn FnMut(&[u8]) + Send + 'static>;
/// Event callback; runs on the worker thread.
pub type EventCallback = Box<dyn FnMut(IioEventData) + Send + 'static>;

/// Parse a scan element type such as `le:s12/16>>4`.
///
/// Returns `(little endian, signed, bits used, storage bits, shift)`.
fn parse_scan_type(text: &str) -> Option<(bool, bool, u32, u32, u32)> {
    let (endian, rest) = text.trim().split_once(':')?;
    let lendian = endian.starts_with('l');
    let mut chars = rest.chars();
    let signed = chars.next()? == 's';
    let rest = chars.as_str();
    let (bits, rest) = rest.split_once('/')?;
    let (storage, shift) = match rest.split_once(">>") {
        Some((storage, shift)) => (storage, shift.parse().ok()?),
        None => (rest, 0),
    };
    // Repeat counts (`16X2`) are not used for layout.
    let storage = storage.split(['X', 'x']).next()?;
    Some((lendian, signed, bits.parse().ok()?, storage.parse().ok()?, shift))
}

/// An open IIO device.
pub struct Iio {
    num: u32,
    name: Option<String>,
    channels: Vec<IioChannel>,
    events: Vec<IioEvent>,
    datasize: u32,
    config: Arc<Config>,
    worker: Option<Worker>,
}

impl Iio {
    /// Open detected device number `device` and scan its channels and events.
    pub fn init(session: &Session, device: u32) -> Result<Self> {
        let Some(info) = session.iio_devices().iter().find(|dev| dev.num == device) else {
            error!("iio: device {} not detected", device);
            return Err(XptError::InvalidResource);
        };
        let mut dev = Self {
            num: info.num,
            name: info.name.clone(),
            channels: Vec::new(),
            events: Vec::new(),
            datasize: 0,
            config: Arc::clone(session.config()),
            worker: None,
        };
        dev.scan_channels()?;
        dev.scan_events();
        debug!(
            "iio{}: {} channels, {} events",
            dev.num,
            dev.channels.len(),
            dev.events.len()
        );
        Ok(dev)
    }

    fn device_dir(&self) -> PathBuf {
        self.config.iio_devices().join(format!("{}{}", DEVICE_PREFIX, self.num))
    }

    fn scan_dir(&self) -> PathBuf {
        self.device_dir().join("scan_elements")
    }

    fn dev_node(&self) -> PathBuf {
        self.config.dev_node(format!("{}{}", DEVICE_PREFIX, self.num))
    }

    /// `(index, attribute prefix)` of every `*_index` scan element.
    fn scan_indices(&self) -> Result<Vec<(u32, String)>> {
        let dir = self.scan_dir();
        let entries = fs::read_dir(&dir).map_err(|_| XptError::InvalidHandle)?;
        let mut found = Vec::new();
        for entry in entries.filter_map(|entry| entry.ok()) {
            let Ok(file_name) = entry.file_name().into_string() else { continue };
            let Some(prefix) = file_name.strip_suffix("index") else { continue };
            if !prefix.ends_with('_') {
                continue;
            }
            let text = sysfs::read_attr(&entry.path()).map_err(|_| XptError::Unspecified)?;
            let index = sysfs::parse(&text).ok_or_else(|| {
                error!("iio{}: bad scan index in {}", self.num, file_name);
                XptError::Unspecified
            })?;
            found.push((index, prefix.to_string()));
        }
        Ok(found)
    }

    fn read_enable(&self, prefix: &str) -> Result<Option<bool>> {
        match sysfs::read_attr(&self.scan_dir().join(format!("{}en", prefix))) {
            Ok(text) => sysfs::parse::<u32>(&text)
                .map(|flag| Some(flag != 0))
                .ok_or_else(|| {
                    error!("iio{}: failed to read a sensible value from sysfs", self.num);
                    XptError::Unspecified
                }),
            Err(_) => Ok(None),
        }
    }

    fn scan_channels(&mut self) -> Result<()> {
        self.datasize = 0;
        self.channels.clear();
        let dir = self.scan_dir();
        let Ok(entries) = fs::read_dir(&dir) else {
            return Ok(());
        };
        let count = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with("_en"))
            .count();
        if count == 0 {
            return Ok(());
        }
        self.channels = vec![IioChannel::default(); count];

        for (index, prefix) in self.scan_indices()? {
            let Some(slot) = self.channels.get(index as usize).copied() else {
                warn!("iio{}: scan index {} beyond {} channels", self.num, index, count);
                continue;
            };
            let mut chan = IioChannel { index, ..slot };
            if let Ok(text) = sysfs::read_attr(&dir.join(format!("{}type", prefix))) {
                let (lendian, signed, bits_used, storage, shift) =
                    parse_scan_type(&text).ok_or_else(|| {
                        error!("iio{}: unparsable scan type '{}'", self.num, text);
                        XptError::Unspecified
                    })?;
                chan.lendian = lendian;
                chan.signed = signed;
                chan.bits_used = bits_used;
                chan.bytes = storage / 8;
                chan.shift = shift;
                chan.mask = if bits_used >= 64 { !0 } else { (1u64 << bits_used) - 1 };
            }
            if let Some(enabled) = self.read_enable(&prefix)? {
                chan.enabled = enabled;
                if enabled {
                    self.datasize += chan.bytes;
                }
            }
            self.channels[index as usize] = chan;
        }

        // Records are laid out in index order with each channel naturally aligned.
        let mut offset = 0;
        for chan in &mut self.channels {
            chan.location = match chan.bytes {
                0 => offset,
                bytes if offset % bytes == 0 => offset,
                bytes => offset - offset % bytes + bytes,
            };
            offset = chan.location + chan.bytes;
        }
        Ok(())
    }

    fn scan_events(&mut self) {
        let dir = self.device_dir().join("events");
        let Ok(entries) = fs::read_dir(&dir) else {
            return;
        };
        let mut events: Vec<IioEvent> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                if !name.ends_with("_en") {
                    return None;
                }
                let enabled = sysfs::read_attr(&entry.path())
                    .ok()
                    .and_then(|text| sysfs::parse::<u32>(&text))
                    .is_some_and(|flag| flag != 0);
                Some(IioEvent { name, enabled })
            })
            .collect();
        events.sort_by(|a, b| a.name.cmp(&b.name));
        self.events = events;
    }

    /// Re-read the enable flags and the record size.
    pub fn update_channels(&mut self) -> Result<()> {
        let indices = self.scan_indices()?;
        self.datasize = 0;
        for (index, prefix) in indices {
            let Some(chan) = self.channels.get(index as usize) else { continue };
            let bytes = chan.bytes;
            if let Some(enabled) = self.read_enable(&prefix)? {
                self.channels[index as usize].enabled = enabled;
                if enabled {
                    self.datasize += bytes;
                }
            }
        }
        Ok(())
    }

    pub fn num(&self) -> u32 {
        self.num
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Bytes in one buffer record (sum of enabled channel sizes).
    pub fn read_size(&self) -> u32 {
        self.datasize
    }

    pub fn channels(&self) -> &[IioChannel] {
        &self.channels
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn events(&self) -> &[IioEvent] {
        &self.events
    }

    pub fn read_string(&self, attr: &str) -> Result<String> {
        let text = fs::read_to_string(self.device_dir().join(attr)).map_err(|err| {
            debug!("iio{}: failed to read '{}': {}", self.num, attr, err);
            XptError::Unspecified
        })?;
        if text.is_empty() {
            return Err(XptError::Unspecified);
        }
        Ok(text)
    }

    pub fn read_float(&self, attr: &str) -> Result<f32> {
        let text = self.read_string(attr)?;
        text.split_whitespace()
            .next()
            .and_then(|token| token.parse().ok())
            .ok_or(XptError::Unspecified)
    }

    pub fn read_int(&self, attr: &str) -> Result<i32> {
        let text = self.read_string(attr)?;
        text.split_whitespace()
            .next()
            .and_then(|token| token.parse().ok())
            .ok_or(XptError::Unspecified)
    }

    pub fn write_string(&self, attr: &str, value: &str) -> Result<()> {
        sysfs::write_attr(&self.device_dir().join(attr), value).map_err(|err| {
            error!("iio{}: failed to write '{}': {}", self.num, attr, err);
            XptError::Unspecified
        })
    }

    pub fn write_float(&self, attr: &str, value: f32) -> Result<()> {
        self.write_string(attr, &format!("{:.6}", value))
    }

    pub fn write_int(&self, attr: &str, value: i32) -> Result<()> {
        self.write_string(attr, &value.to_string())
    }

    /// Parse a mount matrix attribute (`a, b, c; d, e, f; g, h, i`).
    pub fn mount_matrix(&self, attr: &str) -> Result<[f32; 9]> {
        let text = self.read_string(attr)?;
        let values: Vec<f32> = text
            .split([',', ';'])
            .map(|value| value.trim().parse::<f32>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| XptError::Unspecified)?;
        values.try_into().map_err(|_| XptError::Unspecified)
    }

    /// Create a configfs software trigger; an existing trigger counts as success.
    pub fn create_trigger(&self, trigger: &str) -> Result<()> {
        let root = self.config.iio_triggers();
        if !root.is_dir() {
            error!("iio: configfs triggers not available at {}", root.display());
            return Err(XptError::FeatureNotSupported);
        }
        match fs::create_dir(root.join(trigger)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(err) => {
                error!("iio: failed to create trigger '{}': {}", trigger, err);
                Err(XptError::Unspecified)
            }
        }
    }

    fn event_fd(&self) -> Result<File> {
        let node = File::open(self.dev_node()).map_err(|err| {
            error!("iio{}: failed to open device node: {}", self.num, err);
            XptError::InvalidResource
        })?;
        let mut event_fd: libc::c_int = -1;
        // SAFETY: the request writes one c_int through the valid pointer.
        let rc = unsafe {
            libc::ioctl(
                node.as_raw_fd(),
                IIO_GET_EVENT_FD_IOCTL as _,
                &mut event_fd as *mut libc::c_int,
            )
        };
        if rc == -1 || event_fd < 0 {
            error!("iio{}: event fd ioctl failed: {}", self.num, io::Error::last_os_error());
            return Err(XptError::Unspecified);
        }
        // SAFETY: the kernel handed us a fresh descriptor that nothing else owns.
        Ok(unsafe { File::from_raw_fd(event_fd) })
    }

    /// Block until the next event and return it.
    pub fn event_poll(&self) -> Result<IioEventData> {
        let mut file = self.event_fd()?;
        read_event(&mut file)
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.worker.is_some() {
            error!("iio{}: a worker is already running", self.num);
            return Err(XptError::NoResources);
        }
        Ok(())
    }

    /// Deliver every buffer record to `callback` on a worker thread.
    pub fn trigger_buffer(&mut self, mut callback: BufferCallback) -> Result<()> {
        self.ensure_idle()?;
        if self.datasize == 0 {
            error!("iio{}: no enabled channels to buffer", self.num);
            return Err(XptError::InvalidResource);
        }
        let mut file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(self.dev_node())
            .map_err(|err| {
                error!("iio{}: failed to open buffer: {}", self.num, err);
                XptError::InvalidResource
            })?;

        let record = self.datasize as usize;
        let num = self.num;
        let (wake, control) = worker::control_pair()?;
        let shared = WorkerShared::new();
        let state = Arc::clone(&shared);
        let worker = Worker::spawn(format!("iio{}-buffer", num), shared, wake, move || {
            let mut data = vec![0u8; BUFFER_READ_MAX];
            loop {
                match worker::wait_readable(file.as_raw_fd(), libc::POLLIN, control.as_raw_fd()) {
                    Ok(Wake::Ready) => {}
                    _ => break,
                }
                if state.is_terminating() {
                    break;
                }
                let len = match file.read(&mut data) {
                    Ok(0) => break,
                    Ok(len) => len,
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => continue,
                    Err(err) => {
                        error!("iio{}: buffer read failed: {}", num, err);
                        break;
                    }
                };
                if !state.begin_delivery() {
                    break;
                }
                for chunk in data[..len].chunks_exact(record) {
                    callback(chunk);
                }
                state.end_delivery();
            }
            state.finished();
        })?;
        self.worker = Some(worker);
        Ok(())
    }

    /// Deliver every event to `callback` on a worker thread.
    pub fn event_setup_callback(&mut self, mut callback: EventCallback) -> Result<()> {
        self.ensure_idle()?;
        let mut file = self.event_fd()?;
        let (wake, control) = worker::control_pair()?;
        let shared = WorkerShared::new();
        let state = Arc::clone(&shared);
        let worker = Worker::spawn(format!("iio{}-event", self.num), shared, wake, move || {
            loop {
                match worker::wait_readable(file.as_raw_fd(), libc::POLLIN, control.as_raw_fd()) {
                    Ok(Wake::Ready) => {}
                    _ => break,
                }
                if state.is_terminating() {
                    break;
                }
                let Ok(event) = read_event(&mut file) else { break };
                if !state.begin_delivery() {
                    break;
                }
                callback(event);
                state.end_delivery();
            }
            state.finished();
        })?;
        self.worker = Some(worker);
        Ok(())
    }

    pub fn worker_state(&self) -> IsrState {
        self.worker.as_ref().map_or(IsrState::Idle, Worker::state)
    }

    /// Stop the worker, if any, and wait for it.
    pub fn stop_worker(&mut self) -> Result<()> {
        match self.worker.take() {
            Some(worker) => worker.join(),
            None => Ok(()),
        }
    }

    pub fn close(mut self) -> Result<()> {
        self.stop_worker()
    }
}

fn read_event(file: &mut File) -> Result<IioEventData> {
    let mut buf = [0u8; IioEventData::SIZE];
    file.read_exact(&mut buf).map_err(|err| {
        error!("iio: failed to read event: {}", err);
        XptError::Unspecified
    })?;
    Ok(IioEventData::from_bytes(&buf))
}

impl fmt::Debug for Iio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iio")
            .field("num", &self.num)
            .field("name", &self.name)
            .field("channels", &self.channels.len())
            .field("datasize", &self.datasize)
            .field("worker", &self.worker_state())
            .finish_non_exhaustive()
    }
}
