//! Error types for the capture engine.
//!
//! `ParseError` is the per-frame outcome of header discovery; it never leaves
//! the classification path. `AppError` is what the host-facing surface returns.
//! It serializes as `{ "kind": "...", "message": "..." }` so a host can
//! programmatically distinguish error categories.

use serde::ser::SerializeStruct;

/// Why a frame could not be interpreted as IPv4. The frame is still forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("frame shorter than a minimal IPv4 header")]
    TooShort,

    #[error("no IPv4 version byte found in the scanned prefix")]
    NotIpv4,

    #[error("IPv4 header length runs past the end of the frame")]
    HeaderLengthExceedsFrame,
}

/// Host-facing error returned by session control and configuration calls.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Session establishment or capture thread failures.
    #[error("{0}")]
    Capture(String),

    /// I/O and OS-level errors on the tunnel descriptor.
    #[error("{0}")]
    Io(String),

    /// Invalid configuration or a call made in the wrong session state.
    #[error("{0}")]
    InvalidInput(String),
}

impl AppError {
    /// Returns the error kind as a string matching the variant name.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Capture(_) => "Capture",
            AppError::Io(_) => "Io",
            AppError::InvalidInput(_) => "InvalidInput",
        }
    }
}

/// Custom Serialize: produces `{ "kind": "Variant", "message": "..." }`.
impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut s = serializer.serialize_struct("AppError", 2)?;
        s.serialize_field("kind", self.kind())?;
        s.serialize_field("message", &self.to_string())?;
        s.end()
    }
}

// ---- From implementations for ergonomic error conversion ----

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Capture(format!("{err:#}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidInput(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_returns_correct_variant_name() {
        assert_eq!(AppError::Capture("cap fail".into()).kind(), "Capture");
        assert_eq!(AppError::Io("io fail".into()).kind(), "Io");
        assert_eq!(
            AppError::InvalidInput("bad input".into()).kind(),
            "InvalidInput"
        );
    }

    #[test]
    fn test_error_serializes_as_kind_and_message() {
        let err = AppError::Capture("descriptor not readable".into());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "Capture");
        assert_eq!(json["message"], "descriptor not readable");
        assert_eq!(json.as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_from_anyhow_keeps_context_chain() {
        let err = anyhow::anyhow!("pipe failed").context("opening tunnel");
        let app_err: AppError = err.into();
        assert_eq!(app_err.kind(), "Capture");
        assert!(app_err.to_string().contains("opening tunnel"));
        assert!(app_err.to_string().contains("pipe failed"));
    }

    #[test]
    fn test_from_io_error_produces_io_variant() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "tun gone");
        let app_err: AppError = io_err.into();
        assert_eq!(app_err.kind(), "Io");
        assert!(app_err.to_string().contains("tun gone"));
    }

    #[test]
    fn test_parse_error_display() {
        assert_eq!(
            ParseError::TooShort.to_string(),
            "frame shorter than a minimal IPv4 header"
        );
        assert_ne!(ParseError::NotIpv4, ParseError::HeaderLengthExceedsFrame);
    }
}
