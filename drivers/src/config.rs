//! Filesystem roots used by the default drivers.
//!
//! Every sysfs or device-node path the drivers touch is derived from a
//! [`Config`], so a whole session can be pointed at a scratch tree.

use std::env;
use std::path::{Path, PathBuf};

/// Names a platform-description file to load instead of detection.
pub const JSON_PLATFORM_ENV: &str = "XPT_JSON_PLATFORM";
/// Overrides the sysfs mount point.
pub const SYSFS_ROOT_ENV: &str = "XPT_SYSFS_ROOT";
/// Overrides the device-node directory.
pub const DEV_ROOT_ENV: &str = "XPT_DEV_ROOT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub sysfs_root: PathBuf,
    pub dev_root: PathBuf,
    pub json_platform: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys"),
            dev_root: PathBuf::from("/dev"),
            json_platform: None,
        }
    }
}

impl Config {
    /// Defaults overridden by the `XPT_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(root) = env::var_os(SYSFS_ROOT_ENV) {
            config.sysfs_root = root.into();
        }
        if let Some(root) = env::var_os(DEV_ROOT_ENV) {
            config.dev_root = root.into();
        }
        config.json_platform = env::var_os(JSON_PLATFORM_ENV)
            .filter(|path| !path.is_empty())
            .map(PathBuf::from);
        config
    }

    pub fn with_sysfs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sysfs_root = root.into();
        self
    }

    pub fn with_dev_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.dev_root = root.into();
        self
    }

    pub fn gpio_class(&self) -> PathBuf {
        self.sysfs_root.join("class/gpio")
    }

    pub fn pwm_class(&self) -> PathBuf {
        self.sysfs_root.join("class/pwm")
    }

    pub fn leds_class(&self) -> PathBuf {
        self.sysfs_root.join("class/leds")
    }

    pub fn iio_devices(&self) -> PathBuf {
        self.sysfs_root.join("bus/iio/devices")
    }

    pub fn iio_triggers(&self) -> PathBuf {
        self.sysfs_root.join("kernel/config/iio/triggers")
    }

    pub fn dev_node(&self, name: impl AsRef<Path>) -> PathBuf {
        self.dev_root.join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_follow_roots() {
        let config = Config::default()
            .with_sysfs_root("/tmp/sys")
            .with_dev_root("/tmp/dev");
        assert_eq!(config.gpio_class(), PathBuf::from("/tmp/sys/class/gpio"));
        assert_eq!(
            config.iio_devices(),
            PathBuf::from("/tmp/sys/bus/iio/devices")
        );
        assert_eq!(
            config.dev_node("iio:device0"),
            PathBuf::from("/tmp/dev/iio:device0")
        );
    }
}
