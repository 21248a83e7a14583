//! Wire protocols spoken with the playback service.
//!
//! # Submodules
//!
//! * [`socketio`] - Engine.IO v3 / Socket.IO v2 text packet codec
//!
//! # Shared Functionality
//!
//! * JSON parsing with consistent error handling
//! * Structured logging of payloads for protocol analysis

pub mod socketio;

use crate::error::Result;
use serde::Deserialize;
use std::fmt::Debug;

/// Parses and logs a JSON payload.
///
/// # Arguments
///
/// * `body` - Payload text to parse
/// * `origin` - Description of the payload for logging
///
/// # Errors
///
/// Returns error if `body` is not valid JSON or does not match type `T`.
///
/// # Logging
///
/// * Success: Logs parsed structure at TRACE level
/// * Parse Error: Logs raw JSON at TRACE level if valid JSON
/// * Invalid JSON: Logs error and raw text at ERROR level
pub fn json<T>(body: &str, origin: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Debug,
{
    match serde_json::from_str(body) {
        Ok(result) => {
            trace!("{origin}: {result:#?}");
            Ok(result)
        }
        Err(e) => {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
                trace!("{origin}: {json:#?}");
            } else {
                error!("{origin}: failed parsing payload ({e:?})");
                trace!("{body}");
            }
            Err(e.into())
        }
    }
}
