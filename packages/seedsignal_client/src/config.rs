use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_WRITE_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(3000);

/// Session timing. Durations are (de)serialized as integer milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Quiet period after the last local fragment before the record is written.
    #[serde(rename = "write_delay_ms", with = "millis")]
    pub write_delay: Duration,
    /// Delay between the end of one remote read and the start of the next.
    #[serde(rename = "poll_interval_ms", with = "millis")]
    pub poll_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            write_delay: DEFAULT_WRITE_DELAY,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
