//! Small helpers for sysfs attribute files.

use std::fmt::Display;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::str::FromStr;

/// Write `value` to an attribute in a single `write(2)`.
pub(crate) fn write_attr(path: &Path, value: impl Display) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).truncate(true).open(path)?;
    file.write_all(value.to_string().as_bytes())
}

/// Attribute contents with the trailing newline removed.
pub(crate) fn read_attr(path: &Path) -> io::Result<String> {
    let text = fs::read_to_string(path)?;
    Ok(text.trim_end_matches(['\n', '\r']).to_string())
}

/// Strict numeric parse of attribute text; surrounding whitespace is allowed.
pub(crate) fn parse<T: FromStr>(text: &str) -> Option<T> {
    text.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attr_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("value");
        fs::write(&path, "").unwrap();
        write_attr(&path, 42).unwrap();
        assert_eq!(read_attr(&path).unwrap(), "42");
    }

    #[test]
    fn test_parse_is_strict() {
        assert_eq!(parse::<i32>(" 17\n"), Some(17));
        assert_eq!(parse::<i32>("17abc"), None);
        assert_eq!(parse::<i32>(""), None);
    }
}
