// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/homeguard-rs

//! Error taxonomy
//!
//! Transient failures (frame, classifier, notification) are logged and the
//! current cycle degrades. Configuration errors are fatal at startup only.

use std::time::Duration;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid or missing configuration values
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Frame source could not deliver a frame
    #[error("Frame unavailable: {0}")]
    FrameUnavailable(String),

    /// Classification exceeded its latency budget
    #[error("Classification timed out after {0:?}")]
    ClassificationTimeout(Duration),

    /// Classification model failed
    #[error("Classifier error: {0}")]
    Classifier(String),

    /// Notification channel failure
    #[error("Notification failed: {0}")]
    Notify(String),

    /// Command issued while the engine is stopping
    #[error("System is shutting down")]
    ShuttingDown,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error
    #[error("Config parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// TOML write error
    #[error("Config write error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Alert log error
    #[cfg(feature = "alert-log")]
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl Error {
    /// Transient errors degrade a single cycle and never stop the engine
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::FrameUnavailable(_)
                | Error::ClassificationTimeout(_)
                | Error::Classifier(_)
                | Error::Notify(_)
                | Error::Http(_)
        )
    }
}
