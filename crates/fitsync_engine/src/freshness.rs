//! Version and staleness classification.
//!
//! Freshness is derived on every read from `(now, last_modified)` and is
//! never stored. Thresholds are strict upper bounds: a record exactly
//! fifteen minutes old is already stale.

use crate::config::FreshnessThresholds;
use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use fitsync_protocol::{latest_entry, Record, RecordId, VersionEntry};
use parking_lot::Mutex;
use std::fmt;
use std::time::Duration;

/// How recently a record's authoritative copy was confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Freshness {
    /// Younger than the fresh threshold.
    Fresh,
    /// Younger than the stale threshold.
    Stale,
    /// Everything older.
    Expired,
}

impl Freshness {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Freshness::Fresh => "fresh",
            Freshness::Stale => "stale",
            Freshness::Expired => "expired",
        }
    }
}

impl fmt::Display for Freshness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Creates a clock frozen at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Sets the time.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    /// Moves the time forward.
    pub fn advance(&self, by: Duration) {
        let Ok(by) = ChronoDuration::from_std(by) else {
            return;
        };
        let mut now = self.now.lock();
        if let Some(next) = now.checked_add_signed(by) {
            *now = next;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Version summary for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    /// Record id.
    pub record_id: RecordId,
    /// Version held locally.
    pub current_version: u64,
    /// Highest version in the server history.
    pub latest_version: u64,
    /// Whether the local copy is the latest.
    pub is_latest_version: bool,
    /// Freshness of the local copy.
    pub freshness: Freshness,
    /// Whether the record changed within the recent-changes window.
    pub has_recent_changes: bool,
    /// Set when no local record backed this summary.
    pub degraded: bool,
}

/// Classifies records against a set of thresholds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Classifier {
    thresholds: FreshnessThresholds,
}

fn age(last_modified: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - last_modified).to_std().unwrap_or(Duration::ZERO)
}

impl Classifier {
    /// Creates a classifier.
    pub fn new(thresholds: FreshnessThresholds) -> Self {
        Self { thresholds }
    }

    /// The thresholds in use.
    pub fn thresholds(&self) -> &FreshnessThresholds {
        &self.thresholds
    }

    /// Classifies an age.
    pub fn classify_age(&self, age: Duration) -> Freshness {
        if age < self.thresholds.fresh {
            Freshness::Fresh
        } else if age < self.thresholds.stale {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }

    /// Classifies a record. A `last_modified` in the future counts as age zero.
    pub fn classify(&self, record: &Record, now: DateTime<Utc>) -> Freshness {
        self.classify_age(age(record.last_modified, now))
    }

    /// Returns true when the record changed within the recent-changes window.
    pub fn has_recent_changes(&self, record: &Record, now: DateTime<Utc>) -> bool {
        age(record.last_modified, now) < self.thresholds.recent_changes
    }

    /// Summarizes a record's version state from its server history.
    ///
    /// Entry order does not matter; the highest version wins. Without a
    /// local record the summary is degraded: version 1, expired, never
    /// reported as latest.
    pub fn version_info(
        &self,
        record_id: &RecordId,
        local: Option<&Record>,
        history: &[VersionEntry],
        now: DateTime<Utc>,
    ) -> SyncResult<VersionInfo> {
        let latest = latest_entry(history).ok_or_else(|| SyncError::NoVersionHistory {
            record_id: record_id.clone(),
        })?;

        let Some(record) = local else {
            return Ok(VersionInfo {
                record_id: record_id.clone(),
                current_version: 1,
                latest_version: latest.version,
                is_latest_version: false,
                freshness: Freshness::Expired,
                has_recent_changes: false,
                degraded: true,
            });
        };

        Ok(VersionInfo {
            record_id: record_id.clone(),
            current_version: record.version,
            latest_version: latest.version,
            is_latest_version: record.version >= latest.version,
            freshness: self.classify(record, now),
            has_recent_changes: self.has_recent_changes(record, now),
            degraded: false,
        })
    }
}

/// Classifies a record with the default thresholds.
pub fn classify(record: &Record, now: DateTime<Utc>) -> Freshness {
    Classifier::default().classify(record, now)
}

/// Recent-changes check with the default thresholds.
pub fn has_recent_changes(record: &Record, now: DateTime<Utc>) -> bool {
    Classifier::default().has_recent_changes(record, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use fitsync_protocol::ChangeType;
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn aged(minutes: i64) -> Record {
        Record::new("w1", "Leg day", 3, now() - ChronoDuration::minutes(minutes))
    }

    #[test]
    fn classification_bands() {
        assert_eq!(classify(&aged(5), now()), Freshness::Fresh);
        assert_eq!(classify(&aged(30), now()), Freshness::Stale);
        assert_eq!(classify(&aged(90), now()), Freshness::Expired);
    }

    #[test]
    fn boundaries_are_exclusive() {
        assert_eq!(classify(&aged(15), now()), Freshness::Stale);
        assert_eq!(classify(&aged(60), now()), Freshness::Expired);

        let just_under = Record::new(
            "w1",
            "x",
            1,
            now() - ChronoDuration::minutes(15) + ChronoDuration::milliseconds(1),
        );
        assert_eq!(classify(&just_under, now()), Freshness::Fresh);
    }

    #[test]
    fn future_timestamps_are_fresh() {
        assert_eq!(classify(&aged(-10), now()), Freshness::Fresh);
        assert!(has_recent_changes(&aged(-10), now()));
    }

    #[test]
    fn recent_changes_window() {
        assert!(has_recent_changes(&aged(23 * 60), now()));
        assert!(!has_recent_changes(&aged(24 * 60), now()));
    }

    #[test]
    fn custom_thresholds() {
        let classifier = Classifier::new(FreshnessThresholds {
            fresh: Duration::from_secs(60),
            stale: Duration::from_secs(120),
            recent_changes: Duration::from_secs(3600),
        });
        assert_eq!(classifier.classify(&aged(1), now()), Freshness::Stale);
        assert_eq!(classifier.classify(&aged(2), now()), Freshness::Expired);
    }

    #[test]
    fn manual_clock_moves() {
        let clock = ManualClock::new(now());
        clock.advance(Duration::from_secs(16 * 60));
        assert_eq!(classify(&aged(0), clock.now()), Freshness::Stale);
        clock.set(now());
        assert_eq!(clock.now(), now());
    }

    #[test]
    fn version_info_uses_highest_entry() {
        let history = vec![
            VersionEntry::new(4, ChangeType::Update, now()),
            VersionEntry::new(2, ChangeType::Create, now()),
            VersionEntry::new(3, ChangeType::Field, now()),
        ];
        let info = Classifier::default()
            .version_info(&RecordId::from("w1"), Some(&aged(5)), &history, now())
            .unwrap();

        assert_eq!(info.current_version, 3);
        assert_eq!(info.latest_version, 4);
        assert!(!info.is_latest_version);
        assert_eq!(info.freshness, Freshness::Fresh);
        assert!(!info.degraded);
    }

    #[test]
    fn empty_history_is_an_error() {
        let err = Classifier::default()
            .version_info(&RecordId::from("w1"), Some(&aged(5)), &[], now())
            .unwrap_err();
        assert!(matches!(err, SyncError::NoVersionHistory { .. }));
    }

    #[test]
    fn unmatched_record_is_degraded() {
        let history = vec![VersionEntry::new(7, ChangeType::Update, now())];
        let info = Classifier::default()
            .version_info(&RecordId::from("w9"), None, &history, now())
            .unwrap();

        assert!(info.degraded);
        assert_eq!(info.current_version, 1);
        assert_eq!(info.freshness, Freshness::Expired);
        assert!(!info.is_latest_version);
    }

    proptest! {
        #[test]
        fn classify_is_a_function_of_age(age_secs in 0i64..200_000, offset in 0i64..1_000_000) {
            let base = now() + ChronoDuration::seconds(offset);
            let a = Record::new("a", "x", 1, base - ChronoDuration::seconds(age_secs));
            let b = Record::new("b", "y", 9, now() - ChronoDuration::seconds(age_secs));
            prop_assert_eq!(classify(&a, base), classify(&b, now()));
            prop_assert_eq!(classify(&a, base), classify(&a, base));
        }
    }
}
