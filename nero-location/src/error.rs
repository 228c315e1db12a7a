use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error codes the platform geolocation API can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, specta::Type)]
pub enum PlatformErrorCode {
    PermissionDenied,
    PositionUnavailable,
    Timeout,
    Unknown,
}

/// An error as reported by the platform, before translation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code:?}: {message}")]
pub struct PlatformError {
    pub code: PlatformErrorCode,
    pub message: String,
}

impl PlatformError {
    pub fn new(code: PlatformErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Every way acquiring a location can fail
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize, specta::Type)]
#[serde(tag = "kind", content = "detail")]
pub enum LocationError {
    #[error("Geolocation is not supported on this device")]
    Unsupported,
    #[error("Location access requires a secure connection (HTTPS)")]
    InsecureContext,
    #[error("Location access denied. Please allow location access in your settings.")]
    PermissionDenied,
    #[error("Location unavailable. Please check your device location settings.")]
    PositionUnavailable,
    #[error("Location request timeout. Please try again.")]
    Timeout,
    #[error("Unknown location error occurred.")]
    Unknown,
    #[error("Invalid location change threshold: {0}")]
    InvalidThreshold(String),
}

impl LocationError {
    /// Whether an automatic retry can reasonably succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::PositionUnavailable)
    }
}

impl From<PlatformErrorCode> for LocationError {
    fn from(code: PlatformErrorCode) -> Self {
        match code {
            PlatformErrorCode::PermissionDenied => Self::PermissionDenied,
            PlatformErrorCode::PositionUnavailable => Self::PositionUnavailable,
            PlatformErrorCode::Timeout => Self::Timeout,
            PlatformErrorCode::Unknown => Self::Unknown,
        }
    }
}

impl From<PlatformError> for LocationError {
    fn from(err: PlatformError) -> Self {
        err.code.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_platform_codes() {
        let cases = [
            (PlatformErrorCode::PermissionDenied, LocationError::PermissionDenied),
            (
                PlatformErrorCode::PositionUnavailable,
                LocationError::PositionUnavailable,
            ),
            (PlatformErrorCode::Timeout, LocationError::Timeout),
            (PlatformErrorCode::Unknown, LocationError::Unknown),
        ];

        for (code, expected) in cases {
            let err = PlatformError::new(code, "from platform");
            assert_eq!(LocationError::from(err), expected);
        }
    }

    #[test]
    fn test_only_timeout_and_unavailable_are_transient() {
        assert!(LocationError::Timeout.is_transient());
        assert!(LocationError::PositionUnavailable.is_transient());
        assert!(!LocationError::PermissionDenied.is_transient());
        assert!(!LocationError::Unknown.is_transient());
        assert!(!LocationError::InsecureContext.is_transient());
    }
}
