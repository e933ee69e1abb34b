//! # tether-cli - command-line front end
//!
//! Drives a [`tether_core::Client`] from the terminal and ships an echo
//! peer for manual testing of either binding.

pub mod config;
pub mod echo;

use serde_json::Value;
use tether_core::{Params, TetherError};

/// Parse a `--params` argument. Absent means empty; anything but a JSON
/// object is rejected.
pub fn parse_params(raw: Option<&str>) -> Result<Params, TetherError> {
    let Some(raw) = raw else {
        return Ok(Params::new());
    };
    match serde_json::from_str(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(TetherError::Other(format!(
            "params must be a JSON object, got {other}"
        ))),
        Err(e) => Err(TetherError::Other(format!("invalid params: {e}"))),
    }
}
