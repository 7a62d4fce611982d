//! Result codes.
//!
//! Every fallible operation in the workspace returns [`Result`]. The numeric
//! codes are stable and are what [`XptError::code`] reports across a process
//! or language boundary; `0` is success and has no variant.

use thiserror::Error;

/// Numeric code reported for a successful operation.
pub const SUCCESS: i32 = 0;

pub type Result<T> = core::result::Result<T, XptError>;

/// Failure classes shared by all drivers.
#[derive(Debug, Error, Copy, Clone, PartialEq, Eq, Hash)]
pub enum XptError {
    #[error("Feature not implemented.")]
    FeatureNotImplemented,
    #[error("Feature not supported by Hardware.")]
    FeatureNotSupported,
    #[error("Invalid verbosity level.")]
    InvalidVerbosityLevel,
    #[error("Invalid parameter.")]
    InvalidParameter,
    #[error("Invalid Handle.")]
    InvalidHandle,
    #[error("No resources.")]
    NoResources,
    #[error("Invalid resource.")]
    InvalidResource,
    #[error("Invalid queue type.")]
    InvalidQueueType,
    #[error("No data available.")]
    NoDataAvailable,
    #[error("Platform not recognised.")]
    InvalidPlatform,
    #[error("Platform not initialised.")]
    PlatformNotInitialised,
    #[error("UART OW: Bus short detected.")]
    UartOwShorted,
    #[error("UART OW: No devices detected on bus.")]
    UartOwNoDevices,
    #[error("UART OW: Data or Bus error detected.")]
    UartOwDataError,
    #[error("Unknown Error.")]
    Unspecified,
}

impl XptError {
    /// Stable numeric code of this error.
    pub const fn code(self) -> i32 {
        match self {
            XptError::FeatureNotImplemented => 1,
            XptError::FeatureNotSupported => 2,
            XptError::InvalidVerbosityLevel => 3,
            XptError::InvalidParameter => 4,
            XptError::InvalidHandle => 5,
            XptError::NoResources => 6,
            XptError::InvalidResource => 7,
            XptError::InvalidQueueType => 8,
            XptError::NoDataAvailable => 9,
            XptError::InvalidPlatform => 10,
            XptError::PlatformNotInitialised => 11,
            XptError::UartOwShorted => 12,
            XptError::UartOwNoDevices => 13,
            XptError::UartOwDataError => 14,
            XptError::Unspecified => 99,
        }
    }

    /// Decode a numeric code.
    ///
    /// `0` decodes to `None`; codes outside the table fold into
    /// [`XptError::Unspecified`].
    pub const fn from_code(code: i32) -> Option<Self> {
        let err = match code {
            SUCCESS => return None,
            1 => XptError::FeatureNotImplemented,
            2 => XptError::FeatureNotSupported,
            3 => XptError::InvalidVerbosityLevel,
            4 => XptError::InvalidParameter,
            5 => XptError::InvalidHandle,
            6 => XptError::NoResources,
            7 => XptError::InvalidResource,
            8 => XptError::InvalidQueueType,
            9 => XptError::NoDataAvailable,
            10 => XptError::InvalidPlatform,
            11 => XptError::PlatformNotInitialised,
            12 => XptError::UartOwShorted,
            13 => XptError::UartOwNoDevices,
            14 => XptError::UartOwDataError,
            _ => XptError::Unspecified,
        };
        Some(err)
    }
}

/// Numeric code of an operation outcome, `0` on success.
pub fn result_code<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => SUCCESS,
        Err(err) => err.code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(XptError::FeatureNotImplemented.code(), 1);
        assert_eq!(XptError::InvalidHandle.code(), 5);
        assert_eq!(XptError::PlatformNotInitialised.code(), 11);
        assert_eq!(XptError::UartOwDataError.code(), 14);
        assert_eq!(XptError::Unspecified.code(), 99);
    }

    #[test]
    fn test_from_code() {
        assert_eq!(XptError::from_code(0), None);
        assert_eq!(XptError::from_code(7), Some(XptError::InvalidResource));
        // Anything outside the table is unspecified
        assert_eq!(XptError::from_code(42), Some(XptError::Unspecified));
        assert_eq!(XptError::from_code(-1), Some(XptError::Unspecified));
    }

    #[test]
    fn test_result_code() {
        assert_eq!(result_code(&Ok::<u8, XptError>(3)), SUCCESS);
        assert_eq!(result_code::<()>(&Err(XptError::NoResources)), 6);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            XptError::FeatureNotSupported.to_string(),
            "Feature not supported by Hardware."
        );
        assert_eq!(XptError::InvalidPlatform.to_string(), "Platform not recognised.");
    }
}
