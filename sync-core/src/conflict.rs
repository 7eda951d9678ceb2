//! Conflict detection between the local and remote payloads.
//!
//! Detection is diagnostic only: the automatic sync path always proceeds
//! to [`crate::merge`]. A detected [`Conflict`] is reported to listeners
//! and can be settled by hand with [`resolve_conflict`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use minutes_sync_types::{Dataset, DeviceId, SyncPayload, Timestamp};

use crate::merge::merge;

/// Default window within which two payloads are considered simultaneous.
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(10);

/// Two payloads written by different devices at meaningfully different
/// times with different content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    /// When the local payload was produced.
    pub local_timestamp: Timestamp,
    /// When the remote payload was produced.
    pub remote_timestamp: Timestamp,
    /// Device that produced the local payload.
    pub local_device: DeviceId,
    /// Device that produced the remote payload.
    pub remote_device: DeviceId,
    /// Absolute difference between the two timestamps.
    pub time_difference_ms: i64,
}

/// How to settle a conflict by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Keep the local dataset, overwrite the remote one.
    UseLocal,
    /// Take the remote dataset, discard local changes.
    UseCloud,
    /// Run the regular merge.
    Merge,
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Resolution::UseLocal => "use_local",
            Resolution::UseCloud => "use_cloud",
            Resolution::Merge => "merge",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "use_local" | "local" => Ok(Resolution::UseLocal),
            "use_cloud" | "cloud" | "remote" => Ok(Resolution::UseCloud),
            "merge" => Ok(Resolution::Merge),
            other => Err(format!("unknown resolution: {other}")),
        }
    }
}

/// Decides whether two payloads conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictDetector {
    tolerance: Duration,
}

impl Default for ConflictDetector {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE)
    }
}

impl ConflictDetector {
    /// Create a detector with the given simultaneity window.
    pub fn new(tolerance: Duration) -> Self {
        Self { tolerance }
    }

    /// The simultaneity window.
    pub fn tolerance(&self) -> Duration {
        self.tolerance
    }

    /// Compare `local` against `remote`.
    ///
    /// Returns `None` when the timestamps are within the tolerance, when
    /// both payloads come from the same device, or when their checksums
    /// (exact or order-independent) match.
    pub fn detect(&self, local: &SyncPayload, remote: &SyncPayload) -> Option<Conflict> {
        let (l, r) = (&local.metadata, &remote.metadata);

        let difference = (l.timestamp - r.timestamp).num_milliseconds().abs();
        let tolerance_ms = i64::try_from(self.tolerance.as_millis()).unwrap_or(i64::MAX);
        if difference <= tolerance_ms {
            return None;
        }
        if l.device_id == r.device_id {
            return None;
        }
        if l.checksum == r.checksum || l.version == r.version {
            return None;
        }

        Some(Conflict {
            local_timestamp: l.timestamp,
            remote_timestamp: r.timestamp,
            local_device: l.device_id,
            remote_device: r.device_id,
            time_difference_ms: difference,
        })
    }
}

/// Produce the dataset a manual resolution settles on.
pub fn resolve_conflict(resolution: Resolution, local: &Dataset, remote: &Dataset) -> Dataset {
    match resolution {
        Resolution::UseLocal => local.clone(),
        Resolution::UseCloud => remote.clone(),
        Resolution::Merge => merge(local, remote),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::build_payload;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use minutes_sync_types::Meeting;

    fn at_secs(secs: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap() + ChronoDuration::seconds(secs)
    }

    fn payload(title: &str, device: DeviceId, secs: i64) -> SyncPayload {
        let data = Dataset::new().with_meeting(Meeting::new("m1", title, at_secs(0)));
        build_payload(data, device, "Device", at_secs(secs)).unwrap()
    }

    #[test]
    fn within_tolerance_is_not_a_conflict() {
        let detector = ConflictDetector::default();
        let local = payload("A", DeviceId::random(), 0);
        let remote = payload("B", DeviceId::random(), 10);
        assert!(detector.detect(&local, &remote).is_none());
    }

    #[test]
    fn same_device_is_not_a_conflict() {
        let device = DeviceId::random();
        let detector = ConflictDetector::default();
        assert!(detector
            .detect(&payload("A", device, 0), &payload("B", device, 600))
            .is_none());
    }

    #[test]
    fn equal_content_is_not_a_conflict() {
        let detector = ConflictDetector::default();
        let local = payload("Same", DeviceId::random(), 0);
        let remote = payload("Same", DeviceId::random(), 600);
        assert!(detector.detect(&local, &remote).is_none());
    }

    #[test]
    fn distinct_devices_far_apart_conflict() {
        let detector = ConflictDetector::default();
        let local = payload("A", DeviceId::random(), 0);
        let remote = payload("B", DeviceId::random(), 11);

        let conflict = detector.detect(&local, &remote).unwrap();
        assert_eq!(conflict.time_difference_ms, 11_000);
        assert_eq!(conflict.local_device, local.metadata.device_id);
        assert_eq!(conflict.remote_device, remote.metadata.device_id);
    }

    #[test]
    fn time_difference_is_absolute() {
        let detector = ConflictDetector::new(Duration::from_secs(1));
        let local = payload("A", DeviceId::random(), 30);
        let remote = payload("B", DeviceId::random(), 0);
        assert_eq!(detector.detect(&local, &remote).unwrap().time_difference_ms, 30_000);
    }

    #[test]
    fn resolutions_pick_expected_dataset() {
        let local = Dataset::new().with_meeting(Meeting::new("m1", "Local", at_secs(0)));
        let remote = Dataset::new().with_meeting(Meeting::new("m2", "Remote", at_secs(0)));

        assert_eq!(resolve_conflict(Resolution::UseLocal, &local, &remote), local);
        assert_eq!(resolve_conflict(Resolution::UseCloud, &local, &remote), remote);
        assert_eq!(resolve_conflict(Resolution::Merge, &local, &remote).meetings.len(), 2);
    }

    #[test]
    fn resolution_parses_and_serializes_snake_case() {
        assert_eq!("use-local".parse::<Resolution>().unwrap(), Resolution::UseLocal);
        assert_eq!("cloud".parse::<Resolution>().unwrap(), Resolution::UseCloud);
        assert!("overwrite".parse::<Resolution>().is_err());
        assert_eq!(
            serde_json::to_string(&Resolution::UseCloud).unwrap(),
            "\"use_cloud\""
        );
        assert_eq!(Resolution::Merge.to_string(), "merge");
    }
}
