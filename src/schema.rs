// SPDX-License-Identifier: Apache-2.0

//! Load-time schema registry for envelope payloads.
//!
//! The registry maps an envelope schema version to a payload validator.  It
//! is populated once at startup; asking for a version that is not registered
//! is a configuration error surfaced before the receive loop starts, never a
//! per-message failure.

use serde_json::Value;
use std::collections::HashMap;

/// Validates a payload against a sub-schema.  Returns the first violation.
pub type Validator = fn(&Value) -> Result<(), String>;

/// Registry of known envelope schema versions.
pub struct SchemaRegistry {
    versions: HashMap<String, Validator>,
}

impl SchemaRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            versions: HashMap::new(),
        }
    }

    /// Create a registry with the built-in schema versions registered.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("0.1.0", validate_lidar_v0);
        registry
    }

    /// Register a validator for a schema version.
    pub fn register(&mut self, version: &str, validator: Validator) {
        self.versions.insert(version.to_string(), validator);
    }

    /// Look up the validator for a schema version.
    pub fn validator_for(&self, version: &str) -> Option<Validator> {
        self.versions.get(version).copied()
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

/// Validator for the version 0.1.0 LiDAR sub-schema.
///
/// Checks structure only; measurement values are unconstrained because
/// out-of-window readings are a valid condition.
fn validate_lidar_v0(payload: &Value) -> Result<(), String> {
    let object = payload
        .as_object()
        .ok_or_else(|| "payload is not an object".to_string())?;

    for field in ["startAzimuth", "endAzimuth"] {
        if !object.get(field).is_some_and(Value::is_number) {
            return Err(format!("missing or non-numeric field: {}", field));
        }
    }
    for field in ["deviceTimestamp", "sequence", "outOfRange"] {
        if !object.get(field).is_some_and(Value::is_u64) {
            return Err(format!("missing or non-integer field: {}", field));
        }
    }

    let points = object
        .get("points")
        .and_then(Value::as_array)
        .ok_or_else(|| "missing or non-array field: points".to_string())?;

    for (i, point) in points.iter().enumerate() {
        let coords = point
            .as_array()
            .ok_or_else(|| format!("point {} is not an array", i))?;
        if coords.len() != 3 || !coords.iter().all(Value::is_number) {
            return Err(format!("point {} is not a numeric [x, y, z] triple", i));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::{LidarPayload, Scan};
    use serde_json::json;

    #[test]
    fn test_builtin_version_registered() {
        let registry = SchemaRegistry::with_builtin();
        assert!(registry.validator_for("0.1.0").is_some());
        assert!(registry.validator_for("9.9.9").is_none());
    }

    #[test]
    fn test_decoded_payload_validates() {
        let scan = Scan::new(0.0, 90.0, 4, 123, vec![100, 200, 300, 400]);
        let payload = LidarPayload::from_scans(&[scan], 7);
        let value = serde_json::to_value(&payload).unwrap();

        let validator = SchemaRegistry::with_builtin()
            .validator_for("0.1.0")
            .unwrap();
        assert_eq!(validator(&value), Ok(()));
    }

    #[test]
    fn test_empty_scan_payload_validates() {
        let payload = LidarPayload::from_scans(&[Scan::new(0.0, 0.0, 16, 0, Vec::new())], 0);
        let value = serde_json::to_value(&payload).unwrap();

        let validator = SchemaRegistry::with_builtin()
            .validator_for("0.1.0")
            .unwrap();
        assert_eq!(validator(&value), Ok(()));
    }

    #[test]
    fn test_rejects_malformed_payloads() {
        let validator = SchemaRegistry::with_builtin()
            .validator_for("0.1.0")
            .unwrap();

        assert!(validator(&json!([])).is_err());
        assert!(validator(&json!({})).is_err());
        assert!(validator(&json!({
            "startAzimuth": 0.0,
            "endAzimuth": "ninety",
            "deviceTimestamp": 0,
            "sequence": 0,
            "outOfRange": 0,
            "points": []
        }))
        .is_err());
        assert!(validator(&json!({
            "startAzimuth": 0.0,
            "endAzimuth": 90.0,
            "deviceTimestamp": 0,
            "sequence": 0,
            "outOfRange": 0,
            "points": [[1.0, 2.0]]
        }))
        .is_err());
    }

    #[test]
    fn test_custom_registration() {
        fn accept_all(_: &Value) -> Result<(), String> {
            Ok(())
        }

        let mut registry = SchemaRegistry::new();
        registry.register("experimental", accept_all);
        let validator = registry.validator_for("experimental").unwrap();
        assert_eq!(validator(&json!(null)), Ok(()));
    }
}
