//! LED class driver (`/sys/class/leds/<name>`).

use crate::registry::Session;
use log::{error, info};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use xpt_common::{Result, XptError};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Attr {
    Brightness,
    MaxBrightness,
    Trigger,
}

impl Attr {
    fn file_name(self) -> &'static str {
        match self {
            Attr::Brightness => "brightness",
            Attr::MaxBrightness => "max_brightness",
            Attr::Trigger => "trigger",
        }
    }
}

/// An LED under the sysfs LED class.
///
/// At most one attribute file is held open; switching between brightness,
/// max brightness and trigger access closes the previous one.
pub struct Led {
    name: String,
    path: PathBuf,
    open: Option<(Attr, File)>,
}

impl Led {
    /// Open the first LED (in name order) whose directory name contains `name`.
    pub fn init(session: &Session, name: &str) -> Result<Self> {
        if name.is_empty() {
            error!("led: init: invalid device specified");
            return Err(XptError::InvalidParameter);
        }
        let class = session.config().leds_class();
        let mut names: Vec<String> = fs::read_dir(&class)
            .map(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .filter_map(|entry| entry.file_name().into_string().ok())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        let Some(found) = names.into_iter().find(|entry| entry.contains(name)) else {
            error!("led: init: unknown device '{}'", name);
            return Err(XptError::InvalidResource);
        };
        let path = class.join(&found);
        info!("led: init: using {}", path.display());
        Ok(Self {
            name: found,
            path,
            open: None,
        })
    }

    /// Directory name of the LED under the class.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn file(&mut self, attr: Attr) -> Result<&mut File> {
        if !matches!(&self.open, Some((current, _)) if *current == attr) {
            self.open = None;
            let file = OpenOptions::new()
                .read(true)
                .write(attr != Attr::MaxBrightness)
                .open(self.path.join(attr.file_name()))
                .map_err(|err| {
                    error!("led: failed to open '{}': {}", attr.file_name(), err);
                    XptError::InvalidResource
                })?;
            self.open = Some((attr, file));
        }
        let (_, file) = self.open.as_mut().ok_or(XptError::InvalidResource)?;
        file.seek(SeekFrom::Start(0)).map_err(|err| {
            error!("led: failed to seek '{}': {}", attr.file_name(), err);
            XptError::Unspecified
        })?;
        Ok(file)
    }

    fn write_attr(&mut self, attr: Attr, value: &str) -> Result<()> {
        let file = self.file(attr)?;
        // sysfs attributes ignore truncation; plain files need it
        let _ = file.set_len(0);
        file.write_all(value.as_bytes()).map_err(|err| {
            error!("led: failed to write '{}': {}", attr.file_name(), err);
            XptError::Unspecified
        })
    }

    fn read_number(&mut self, attr: Attr) -> Result<i32> {
        let file = self.file(attr)?;
        let mut text = String::new();
        file.read_to_string(&mut text).map_err(|err| {
            error!("led: failed to read '{}': {}", attr.file_name(), err);
            XptError::Unspecified
        })?;
        let digits: String = text.trim().chars().take_while(char::is_ascii_digit).collect();
        digits.parse().map_err(|_| XptError::Unspecified)
    }

    pub fn set_brightness(&mut self, value: i32) -> Result<()> {
        self.write_attr(Attr::Brightness, &value.to_string())
    }

    pub fn read_brightness(&mut self) -> Result<i32> {
        self.read_number(Attr::Brightness)
    }

    pub fn read_max_brightness(&mut self) -> Result<i32> {
        self.read_number(Attr::MaxBrightness)
    }

    /// Hand the LED to a kernel trigger such as `heartbeat` or `timer`.
    pub fn set_trigger(&mut self, trigger: &str) -> Result<()> {
        if trigger.is_empty() {
            error!("led: set_trigger: invalid trigger specified");
            return Err(XptError::InvalidResource);
        }
        self.write_attr(Attr::Trigger, trigger)
    }

    /// Writing zero brightness detaches any trigger.
    pub fn clear_trigger(&mut self) -> Result<()> {
        self.write_attr(Attr::Brightness, "0")
    }

    pub fn close(self) -> Result<()> {
        Ok(())
    }
}

impl fmt::Debug for Led {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Led")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::Board;
    use crate::config::Config;
    use std::path::Path;

    fn fake_led(root: &Path, name: &str) -> PathBuf {
        let dir = root.join("class/leds").join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("brightness"), "0\n").unwrap();
        fs::write(dir.join("max_brightness"), "255\n").unwrap();
        fs::write(dir.join("trigger"), "none\n").unwrap();
        dir
    }

    #[test]
    fn test_substring_match_and_brightness() {
        let root = tempfile::tempdir().unwrap();
        let dir = fake_led(root.path(), "beaglebone:green:usr0");
        let session = Session::new(Config::default().with_sysfs_root(root.path()), Board::null()).unwrap();

        let mut led = Led::init(&session, "usr0").unwrap();
        assert_eq!(led.name(), "beaglebone:green:usr0");
        assert_eq!(led.read_max_brightness(), Ok(255));
        led.set_brightness(128).unwrap();
        assert_eq!(led.read_brightness(), Ok(128));
        led.set_trigger("heartbeat").unwrap();
        assert_eq!(fs::read_to_string(dir.join("trigger")).unwrap(), "heartbeat");
        led.clear_trigger().unwrap();
        assert_eq!(fs::read_to_string(dir.join("brightness")).unwrap(), "0");
        led.close().unwrap();
    }

    #[test]
    fn test_unknown_led() {
        let root = tempfile::tempdir().unwrap();
        fake_led(root.path(), "led0");
        let session = Session::new(Config::default().with_sysfs_root(root.path()), Board::null()).unwrap();
        assert_eq!(Led::init(&session, "usr3").err(), Some(XptError::InvalidResource));
        assert_eq!(Led::init(&session, "").err(), Some(XptError::InvalidParameter));
    }
}
