//! Migration and cleanup accounting
//!
//! Every examined record lands in exactly one bucket: migrated or failed.
//! Records a cancelled run never started are counted as skipped and are not
//! part of `total_records`.

use serde::{Serialize, Serializer};
use std::time::Duration;

fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationStats {
    /// Eligible records examined
    pub total_records: u64,
    /// Written to primary and backup, then removed from staging
    pub migrated_records: u64,
    /// Left in staging for the next run
    pub failed_records: u64,
    /// Not started because the run was cancelled
    pub skipped_records: u64,
    /// Primary documents copied into the backup by mirror reconciliation
    pub mirrored_records: u64,
    /// Backup documents with no primary counterpart (reported, not removed)
    pub backup_only_records: u64,
    pub errors: Vec<String>,
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
    pub cancelled: bool,
}

impl MigrationStats {
    pub fn record_success(&mut self) {
        self.total_records += 1;
        self.migrated_records += 1;
    }

    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.total_records += 1;
        self.failed_records += 1;
        self.errors.push(error.into());
    }

    /// Fold another run's numbers into this one
    pub fn merge(&mut self, other: MigrationStats) {
        self.total_records += other.total_records;
        self.migrated_records += other.migrated_records;
        self.failed_records += other.failed_records;
        self.skipped_records += other.skipped_records;
        self.mirrored_records += other.mirrored_records;
        self.backup_only_records += other.backup_only_records;
        self.errors.extend(other.errors);
        self.duration = self.duration.max(other.duration);
        self.cancelled |= other.cancelled;
    }

    /// Every examined record is accounted for exactly once
    pub fn is_consistent(&self) -> bool {
        self.migrated_records + self.failed_records == self.total_records
    }
}

/// Outcome of a cleanup sweep
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    /// Staged documents removed (late migrations plus expired external records)
    pub documents_removed: u64,
    /// `<database>/<collection>` entries where something was removed
    pub collections_cleaned: Vec<String>,
    /// Records that still could not be migrated, and sweep-level failures
    pub errors: Vec<String>,
    /// Leftovers found in only one of primary/backup and repaired
    pub drift_repaired: u64,
    /// Anonymous external records purged after the retention window
    pub expired_external: u64,
    /// Databases the sweep could not reach
    pub unavailable: Vec<String>,
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
}

impl CleanupReport {
    pub fn note_cleaned(&mut self, database: &str, collection: &str) {
        let entry = format!("{}/{}", database, collection);
        if !self.collections_cleaned.contains(&entry) {
            self.collections_cleaned.push(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buckets_stay_consistent() {
        let mut stats = MigrationStats::default();
        stats.record_success();
        stats.record_failure("write failed");
        stats.record_success();

        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.failed_records, 1);
        assert!(stats.is_consistent());
    }

    #[test]
    fn test_merge_sums_counts() {
        let mut a = MigrationStats::default();
        a.record_success();
        let mut b = MigrationStats::default();
        b.record_failure("boom");
        b.cancelled = true;
        b.skipped_records = 4;

        a.merge(b);
        assert_eq!(a.total_records, 2);
        assert_eq!(a.skipped_records, 4);
        assert_eq!(a.errors, vec!["boom".to_string()]);
        assert!(a.cancelled);
        assert!(a.is_consistent());
    }

    #[test]
    fn test_serializes_duration_in_millis() {
        let stats = MigrationStats {
            duration: Duration::from_millis(1500),
            ..Default::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["duration_ms"], 1500);
    }

    #[test]
    fn test_note_cleaned_deduplicates() {
        let mut report = CleanupReport::default();
        report.note_cleaned("internal-staging", "internal_repos");
        report.note_cleaned("internal-staging", "internal_repos");
        assert_eq!(report.collections_cleaned.len(), 1);
    }
}
