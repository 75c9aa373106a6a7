//! Per-document migration states
//!
//! `Scanning -> WritingPrimary -> WritingBackup -> DeletingFromStaging -> Done`.
//! A failure at any write stage moves that document to `Failed` and leaves
//! it in staging; the run continues with the next document.

use bson::DateTime;
use std::fmt;

use crate::db::RecordFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStage {
    Scanning,
    WritingPrimary,
    WritingBackup,
    DeletingFromStaging,
    Done,
    Failed,
}

impl fmt::Display for MigrationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Scanning => "scanning",
            Self::WritingPrimary => "writing-primary",
            Self::WritingBackup => "writing-backup",
            Self::DeletingFromStaging => "deleting-from-staging",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Age condition a run applies to staged records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// Records created strictly before the cutoff
    OlderThan(DateTime),
    /// Every record found (HR records have no TTL)
    Unconditional,
}

/// Which staged records belong to a route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Records not tagged `is_hr: true`
    Standard,
    /// Only records tagged `is_hr: true`
    HrTagged,
    /// Every record (a dedicated HR staging database)
    Everything,
}

impl Eligibility {
    pub fn filter(&self, selection: Selection) -> RecordFilter {
        let age = match self {
            Self::OlderThan(cutoff) => Some(RecordFilter::CreatedBefore(*cutoff)),
            Self::Unconditional => None,
        };
        let scope = match selection {
            Selection::Standard => Some(RecordFilter::Not(Box::new(RecordFilter::HrTagged))),
            Selection::HrTagged => Some(RecordFilter::HrTagged),
            Selection::Everything => None,
        };

        match (age, scope) {
            (None, None) => RecordFilter::All,
            (Some(filter), None) | (None, Some(filter)) => filter,
            (Some(age), Some(scope)) => RecordFilter::And(vec![age, scope]),
        }
    }
}

/// Where a leftover staged record already exists in the permanent pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftState {
    InSync,
    PrimaryOnly,
    BackupOnly,
    Missing,
}

impl DriftState {
    pub fn from_presence(in_primary: bool, in_backup: bool) -> Self {
        match (in_primary, in_backup) {
            (true, true) => Self::InSync,
            (true, false) => Self::PrimaryOnly,
            (false, true) => Self::BackupOnly,
            (false, false) => Self::Missing,
        }
    }

    /// The two permanent stores disagree
    pub fn is_drift(&self) -> bool {
        matches!(self, Self::PrimaryOnly | Self::BackupOnly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_standard_runs_skip_hr_records() {
        let cutoff = DateTime::now();
        let old = DateTime::from_millis(cutoff.timestamp_millis() - 60_000);
        let filter = Eligibility::OlderThan(cutoff).filter(Selection::Standard);

        assert!(filter.matches(&doc! { "created_at": old }));
        assert!(!filter.matches(&doc! { "created_at": old, "is_hr": true }));
    }

    #[test]
    fn test_hr_runs_ignore_age() {
        let recent = doc! { "created_at": DateTime::now(), "is_hr": true };
        let filter = Eligibility::Unconditional.filter(Selection::HrTagged);

        assert!(filter.matches(&recent));
        assert!(!filter.matches(&doc! { "created_at": DateTime::now() }));
        assert_eq!(
            Eligibility::Unconditional.filter(Selection::Everything),
            RecordFilter::All
        );
    }

    #[test]
    fn test_drift_classification() {
        assert!(!DriftState::from_presence(true, true).is_drift());
        assert!(DriftState::from_presence(true, false).is_drift());
        assert!(DriftState::from_presence(false, true).is_drift());
        assert_eq!(DriftState::from_presence(false, false), DriftState::Missing);
    }
}
