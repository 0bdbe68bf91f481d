//! Error types for dyson-core.
//!
//! This module defines the errors a device client can report while talking to
//! Dyson Link devices over their local MQTT broker.
//!
//! # Recovery
//!
//! | Error Type | Strategy |
//! |------------|----------|
//! | [`Error::DeviceUnreachable`] | Keep stale values, try again next poll |
//! | [`Error::Timeout`] | Keep stale values, try again next poll |
//! | [`Error::PushStreamClosed`] | Re-subscribe with backoff |
//! | [`Error::Discovery`] | Re-subscribe with backoff (device may be booting) |
//! | [`Error::Mqtt`] | Re-subscribe with backoff |
//! | [`Error::InvalidMessage`] | Drop the message, keep the connection |
//! | [`Error::NotConfigured`] | Do not retry, fix configuration |
//! | [`Error::InvalidConfig`] | Do not retry, fix configuration |

use std::time::Duration;

use thiserror::Error;

use dyson_types::ParseError;

/// Errors that can occur when communicating with Dyson devices.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The device could not be reached (not connected, refused, reset).
    #[error("Device {serial} unreachable: {reason}")]
    DeviceUnreachable {
        /// Serial of the device.
        serial: String,
        /// What went wrong.
        reason: String,
    },

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// The push subscription for a device ended.
    #[error("Push stream closed for {0}")]
    PushStreamClosed(String),

    /// The device is not part of this client's configuration.
    #[error("Device {0} is not configured")]
    NotConfigured(String),

    /// mDNS discovery failed or found nothing.
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// MQTT client error.
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// A message from the device could not be decoded.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// JSON encoding/decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Field or product classification error.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Invalid client configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Shorthand for [`Error::DeviceUnreachable`].
    pub fn unreachable(serial: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::DeviceUnreachable {
            serial: serial.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`Error::Timeout`].
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Error::Timeout {
            operation: operation.into(),
            duration,
        }
    }
}

/// Result type alias using dyson-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
