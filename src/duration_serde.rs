//! `Duration` as integer nanoseconds in JSON output
//!
//! Consumers of the JSON report compare runs numerically, so durations are
//! written as a single nanosecond count instead of serde's default
//! `{secs, nanos}` pair.

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    // u64 nanoseconds covers ~584 years
    let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
    serializer.serialize_u64(nanos)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let nanos = u64::deserialize(deserializer)?;
    Ok(Duration::from_nanos(nanos))
}
