//! Background condition-monitor record.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bookkeeping for one long-running condition poll loop.
///
/// The loop itself lives in the subagent manager; this record is the
/// inspectable snapshot of it. A monitor ends when its condition fires, its
/// own timeout elapses, or it is explicitly stopped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundMonitor {
    pub monitor_id: Uuid,
    /// Worker-defined condition tag (e.g. `window_appeared`, `file_exists`).
    pub condition_type: String,
    /// What the condition is evaluated against.
    pub target: String,
    #[serde(with = "duration_secs")]
    pub check_interval: Duration,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    pub started_at: DateTime<Utc>,
}

impl BackgroundMonitor {
    pub fn new(
        condition_type: impl Into<String>,
        target: impl Into<String>,
        check_interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            monitor_id: Uuid::new_v4(),
            condition_type: condition_type.into(),
            target: target.into(),
            check_interval,
            timeout,
            started_at: Utc::now(),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(v.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
