//! Vdev Labels
//!
//! Pool-membership metadata embedded on a device. The storage layer hands the
//! label over as structured key/value data; this module turns it into a
//! standalone `Vdev` so its GUIDs and encoded state can be inspected.

use crate::domain::guid::{parse_guid, PoolGuid, VdevGuid};
use crate::error::{Error, Result};
use crate::vdev::state::VdevState;
use crate::vdev::tree::Vdev;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw label data read from a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(Value);

impl Label {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Pool GUID recorded in the label
    pub fn pool_guid(&self) -> Result<PoolGuid> {
        read_guid(&self.0["pool_guid"])
            .map(PoolGuid)
            .ok_or_else(|| {
                Error::LabelParse("Unable to extract pool GUID from vdev label data.".into())
            })
    }

    /// Vdev GUID recorded in the label
    pub fn vdev_guid(&self) -> Result<VdevGuid> {
        read_guid(&self.0["guid"])
            .map(VdevGuid)
            .ok_or_else(|| {
                Error::LabelParse("Unable to extract vdev GUID from vdev label data.".into())
            })
    }

    /// State encoded in the label.
    ///
    /// Labels read from a device carry no live statistics in most cases, so
    /// the state is synthesized from the faulted/degraded flags when
    /// `vdev_stats` is missing.
    pub fn state(&self) -> VdevState {
        if let Some(state) = read_state(&self.0["vdev_stats"]["state"]) {
            return state;
        }
        if read_flag(&self.0["faulted"]) {
            VdevState::Faulted
        } else if read_flag(&self.0["degraded"]) {
            VdevState::Degraded
        } else {
            VdevState::Healthy
        }
    }

    /// Build a standalone vdev from the label
    pub fn to_vdev(&self) -> Result<Vdev> {
        if !self.0.is_object() {
            return Err(Error::LabelParse("vdev label is not a key/value list.".into()));
        }
        let pool_guid = self.pool_guid()?;
        let guid = self.vdev_guid()?;

        Ok(Vdev {
            guid,
            pool_guid,
            vdev_type: self.0["type"].as_str().unwrap_or("disk").to_string(),
            state: self.state(),
            path: self.0["path"].as_str().map(str::to_string),
            phys_path: self.0["phys_path"].as_str().map(str::to_string),
            is_spare: read_flag(&self.0["is_spare"]),
        })
    }
}

impl From<Value> for Label {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

fn read_guid(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().filter(|v| *v != 0),
        Value::String(s) => parse_guid(s),
        _ => None,
    }
}

fn read_state(value: &Value) -> Option<VdevState> {
    match value {
        Value::Number(n) => n.as_u64().map(VdevState::from_raw),
        Value::String(s) => VdevState::from_name(s),
        _ => None,
    }
}

fn read_flag(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_u64().map(|v| v != 0).unwrap_or(false),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_label_to_vdev() {
        let label = Label::new(json!({
            "pool_guid": 42,
            "guid": "7",
            "path": "/dev/da1",
            "phys_path": "enc@0/bay3",
        }));
        let vdev = label.to_vdev().unwrap();
        assert_eq!(vdev.pool_guid, PoolGuid(42));
        assert_eq!(vdev.guid, VdevGuid(7));
        assert_eq!(vdev.state, VdevState::Healthy);
        assert_eq!(vdev.path.as_deref(), Some("/dev/da1"));
        assert_eq!(vdev.phys_path.as_deref(), Some("enc@0/bay3"));
        assert!(!vdev.is_spare);
    }

    #[test]
    fn test_label_state_synthesis() {
        let faulted = Label::new(json!({"pool_guid": 1, "guid": 2, "faulted": 1}));
        assert_eq!(faulted.state(), VdevState::Faulted);

        let degraded = Label::new(json!({"pool_guid": 1, "guid": 2, "degraded": true}));
        assert_eq!(degraded.state(), VdevState::Degraded);

        let stats = Label::new(json!({
            "pool_guid": 1,
            "guid": 2,
            "faulted": 1,
            "vdev_stats": { "state": 7 },
        }));
        assert_eq!(stats.state(), VdevState::Healthy);
    }

    #[test]
    fn test_label_missing_guids() {
        let no_pool = Label::new(json!({"guid": 7}));
        let err = no_pool.to_vdev().unwrap_err();
        assert!(err.to_string().contains("pool GUID"));

        let no_vdev = Label::new(json!({"pool_guid": 42, "guid": 0}));
        let err = no_vdev.to_vdev().unwrap_err();
        assert!(err.to_string().contains("vdev GUID"));

        let not_object = Label::new(json!([1, 2, 3]));
        assert!(not_object.to_vdev().is_err());
    }
}
