//! Image pipeline error types.

use thiserror::Error;

/// Errors produced while acquiring an image.
///
/// `Clone` so a single fetch result can be delivered to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    /// The server answered with a status outside `200..400`.
    #[error("unacceptable HTTP status: {0}")]
    UnacceptableStatus(u16),

    /// Connectivity, timeout, TLS or body read failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Bytes or video could not be turned into an image.
    #[error("decode error: {0}")]
    Decode(String),

    /// The media host could not produce a usable request or asset.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// This caller's subscription was withdrawn before a result existed.
    #[error("request cancelled")]
    Cancelled,

    /// Filesystem failure in a cache tier.
    #[error("IO error: {0}")]
    Io(String),
}

impl ImageError {
    /// Creates a transport error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Creates a decode error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Creates an authentication error.
    #[must_use]
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication(message.into())
    }

    /// Creates an IO error.
    #[must_use]
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    /// Returns whether the caller cancelled.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns whether the error came from the network.
    #[must_use]
    pub const fn is_network_error(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::UnacceptableStatus(_))
    }
}

impl From<reqwest::Error> for ImageError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<image::ImageError> for ImageError {
    fn from(e: image::ImageError) -> Self {
        Self::Decode(e.to_string())
    }
}

/// Result alias for the image pipeline.
pub type ImageResult<T> = std::result::Result<T, ImageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_errors() {
        assert!(ImageError::transport("reset").is_network_error());
        assert!(ImageError::UnacceptableStatus(503).is_network_error());
        assert!(!ImageError::decode("bad png").is_network_error());
        assert!(!ImageError::authentication("expired").is_network_error());
        assert!(!ImageError::io("disk full").is_network_error());
        assert!(!ImageError::Cancelled.is_network_error());
    }

    #[test]
    fn test_cancelled() {
        assert!(ImageError::Cancelled.is_cancelled());
        assert!(!ImageError::transport("reset").is_cancelled());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            ImageError::UnacceptableStatus(404).to_string(),
            "unacceptable HTTP status: 404"
        );
        assert_eq!(ImageError::Cancelled.to_string(), "request cancelled");
    }
}
