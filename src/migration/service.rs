//! Migration service
//!
//! Promotes staged records into a primary store and its mirror, then removes
//! them from staging. The unit of work is a single document: it is written to
//! primary, then to backup, and deleted from staging only after both writes
//! succeed. Writes upsert on the record's natural key, so re-running over the
//! same data never duplicates it.
//!
//! Records tagged `is_hr: true` never enter the internal pair. Wherever they
//! are staged, the HR run moves them into `hr_` collections of the HR pair
//! with no age condition.
//!
//! Documents within one collection are processed sequentially in staging
//! order; separate collections run concurrently.

use bson::DateTime;
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::stage::{DriftState, Eligibility, MigrationStage, Selection};
use super::stats::{CleanupReport, MigrationStats};
use crate::connection::{ConnectionManager, DatabaseHandle, DatabaseRole, Scope};
use crate::db::{RecordFilter, StagedRecord};
use crate::types::{CancelFlag, DatastoreError, Result};

/// Retention window applied when nothing else is configured
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Age at which a staged record becomes eligible
    pub retention: Duration,
    /// Business-key fields used as the upsert filter
    pub key_fields: Vec<String>,
    /// Purge anonymous external records once they outlive retention
    pub purge_expired_external: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            key_fields: vec!["record_key".to_string()],
            purge_expired_external: true,
        }
    }
}

/// A staging database, the records it owns, and the permanent pair they
/// drain into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationRoute {
    pub staging: DatabaseRole,
    pub primary: DatabaseRole,
    pub backup: DatabaseRole,
    pub selection: Selection,
}

pub const INTERNAL_ROUTE: MigrationRoute = MigrationRoute {
    staging: DatabaseRole::InternalStaging,
    primary: DatabaseRole::InternalPrimary,
    backup: DatabaseRole::InternalBackup,
    selection: Selection::Standard,
};

pub const HR_ROUTE: MigrationRoute = MigrationRoute {
    staging: DatabaseRole::HrStaging,
    primary: DatabaseRole::HrPrimary,
    backup: DatabaseRole::HrBackup,
    selection: Selection::Everything,
};

/// HR-tagged records written to internal staging
pub const INTERNAL_HR_ROUTE: MigrationRoute = MigrationRoute {
    staging: DatabaseRole::InternalStaging,
    primary: DatabaseRole::HrPrimary,
    backup: DatabaseRole::HrBackup,
    selection: Selection::HrTagged,
};

/// HR-tagged records written to external staging
pub const EXTERNAL_HR_ROUTE: MigrationRoute = MigrationRoute {
    staging: DatabaseRole::ExternalStaging,
    primary: DatabaseRole::HrPrimary,
    backup: DatabaseRole::HrBackup,
    selection: Selection::HrTagged,
};

impl MigrationRoute {
    /// Collection the permanent copies land in
    pub fn target_collection(&self, source: &str) -> String {
        if self.primary.scope() == Scope::Hr {
            hr_collection_name(source)
        } else {
            source.to_string()
        }
    }
}

/// `internal_notes` and `external_notes` become `hr_notes`; `hr_` names are kept
pub fn hr_collection_name(collection: &str) -> String {
    let base = [Scope::Hr, Scope::Internal, Scope::External]
        .iter()
        .find_map(|scope| collection.strip_prefix(scope.prefix()))
        .unwrap_or(collection);
    format!("{}{}", Scope::Hr.prefix(), base)
}

struct RouteHandles {
    staging: DatabaseHandle,
    primary: DatabaseHandle,
    backup: DatabaseHandle,
}

/// Where one collection's records come from and go to
struct Transfer<'a> {
    staging: &'a DatabaseHandle,
    primary: &'a DatabaseHandle,
    backup: &'a DatabaseHandle,
    source: &'a str,
    target: &'a str,
}

pub struct MigrationService {
    manager: Arc<ConnectionManager>,
    config: MigrationConfig,
}

impl MigrationService {
    pub fn new(manager: Arc<ConnectionManager>, config: MigrationConfig) -> Self {
        Self { manager, config }
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// `now - retention`
    pub fn cutoff(&self, now: chrono::DateTime<Utc>) -> DateTime {
        let retention = chrono::Duration::from_std(self.config.retention)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        DateTime::from_chrono(now - retention)
    }

    /// Migrate non-HR records created before `cutoff` from one staging
    /// collection
    pub async fn migrate_collection(
        &self,
        staging: &DatabaseHandle,
        primary: &DatabaseHandle,
        backup: &DatabaseHandle,
        collection: &str,
        cutoff: DateTime,
        cancel: &CancelFlag,
    ) -> MigrationStats {
        let transfer = Transfer {
            staging,
            primary,
            backup,
            source: collection,
            target: collection,
        };
        self.migrate_records(
            &transfer,
            Eligibility::OlderThan(cutoff).filter(Selection::Standard),
            cancel,
        )
        .await
    }

    /// Migrate HR records regardless of age into the matching `hr_`
    /// collection. From HR staging every record moves; from any other
    /// staging database only records tagged `is_hr: true` do.
    pub async fn migrate_hr_collection(
        &self,
        staging: &DatabaseHandle,
        primary: &DatabaseHandle,
        backup: &DatabaseHandle,
        collection: &str,
        cancel: &CancelFlag,
    ) -> MigrationStats {
        let selection = if staging.role() == DatabaseRole::HrStaging {
            Selection::Everything
        } else {
            Selection::HrTagged
        };
        let target = hr_collection_name(collection);
        let transfer = Transfer {
            staging,
            primary,
            backup,
            source: collection,
            target: &target,
        };
        self.migrate_records(&transfer, Eligibility::Unconditional.filter(selection), cancel)
            .await
    }

    async fn migrate_records(
        &self,
        transfer: &Transfer<'_>,
        filter: RecordFilter,
        cancel: &CancelFlag,
    ) -> MigrationStats {
        let started = Instant::now();
        let mut stats = MigrationStats::default();
        let collection = transfer.source;

        debug!(collection, stage = %MigrationStage::Scanning, "Scanning staging");
        let documents = match transfer.staging.store().find(collection, filter).await {
            Ok(docs) => docs,
            Err(e) => {
                error!(collection, error = %e, "Failed to scan staging collection");
                stats.errors.push(format!(
                    "{}/{}: scan failed: {}",
                    transfer.staging.role(),
                    collection,
                    e
                ));
                stats.duration = started.elapsed();
                return stats;
            }
        };

        if documents.is_empty() {
            debug!(collection, stage = %MigrationStage::Done, "Nothing eligible");
            stats.duration = started.elapsed();
            return stats;
        }

        let total = documents.len();
        for (index, document) in documents.into_iter().enumerate() {
            if cancel.is_cancelled() {
                stats.cancelled = true;
                stats.skipped_records = (total - index) as u64;
                warn!(
                    collection,
                    skipped = stats.skipped_records,
                    "Migration cancelled before remaining documents"
                );
                break;
            }

            let record = StagedRecord::from_document(document);
            match self.migrate_one(&record, transfer).await {
                Ok(()) => stats.record_success(),
                Err(e) => {
                    warn!(
                        collection,
                        record = %record.label(),
                        stage = %MigrationStage::Failed,
                        error = %e,
                        "Record left in staging for retry"
                    );
                    stats.record_failure(format!("{} ({}): {}", collection, record.label(), e));
                }
            }
        }

        stats.duration = started.elapsed();
        info!(
            collection,
            target = transfer.target,
            total = stats.total_records,
            migrated = stats.migrated_records,
            failed = stats.failed_records,
            "Collection migration finished"
        );
        stats
    }

    /// Dual write then delete for one record. Any failure leaves the staged
    /// copy untouched.
    async fn migrate_one(&self, record: &StagedRecord, transfer: &Transfer<'_>) -> Result<()> {
        let source = transfer.source;
        let key = record.natural_key(&self.config.key_fields);
        let permanent = record.to_permanent(DateTime::now());

        transfer
            .primary
            .store()
            .upsert(transfer.target, key.clone(), permanent.clone())
            .await
            .map_err(|e| write_error(source, MigrationStage::WritingPrimary, e))?;

        transfer
            .backup
            .store()
            .upsert(transfer.target, key, permanent)
            .await
            .map_err(|e| write_error(source, MigrationStage::WritingBackup, e))?;

        let id = record.id().ok_or_else(|| DatastoreError::MigrationWrite {
            collection: source.to_string(),
            stage: MigrationStage::DeletingFromStaging.to_string(),
            message: "staged record has no _id".to_string(),
        })?;

        transfer
            .staging
            .store()
            .delete(source, id)
            .await
            .map_err(|e| write_error(source, MigrationStage::DeletingFromStaging, e))?;

        debug!(collection = source, record = %record.label(), stage = %MigrationStage::Done, "Record migrated");
        Ok(())
    }

    async fn route_handles(&self, route: MigrationRoute) -> Result<RouteHandles> {
        let (staging, primary, backup) = tokio::join!(
            self.manager.handle(route.staging),
            self.manager.handle(route.primary),
            self.manager.handle(route.backup),
        );
        Ok(RouteHandles {
            staging: staging?,
            primary: primary?,
            backup: backup?,
        })
    }

    /// Drain every collection of a route's staging database. Collections run
    /// concurrently; documents inside one collection run in order.
    pub async fn run_route(
        &self,
        route: MigrationRoute,
        eligibility: Eligibility,
        cancel: &CancelFlag,
    ) -> Result<MigrationStats> {
        let started = Instant::now();
        let handles = self.route_handles(route).await?;
        let collections = handles.staging.store().list_collections().await?;
        let targets: Vec<String> = collections
            .iter()
            .map(|c| route.target_collection(c))
            .collect();

        info!(
            staging = %route.staging,
            primary = %route.primary,
            collections = collections.len(),
            "Starting migration run"
        );

        let runs = collections.iter().zip(&targets).map(|(source, target)| {
            let transfer = Transfer {
                staging: &handles.staging,
                primary: &handles.primary,
                backup: &handles.backup,
                source,
                target,
            };
            async move {
                self.migrate_records(&transfer, eligibility.filter(route.selection), cancel)
                    .await
            }
        });

        let mut stats = MigrationStats::default();
        for collection_stats in join_all(runs).await {
            stats.merge(collection_stats);
        }
        stats.duration = started.elapsed();
        Ok(stats)
    }

    /// Daily promotion of internal staging into the internal primary/backup.
    /// HR-tagged records are left for the HR run.
    pub async fn run_full_migration(&self, cancel: &CancelFlag) -> Result<MigrationStats> {
        let cutoff = self.cutoff(Utc::now());
        let stats = self
            .run_route(INTERNAL_ROUTE, Eligibility::OlderThan(cutoff), cancel)
            .await?;

        info!(
            total = stats.total_records,
            migrated = stats.migrated_records,
            failed = stats.failed_records,
            duration_ms = stats.duration.as_millis() as u64,
            "Full migration finished"
        );
        Ok(stats)
    }

    /// Routes the HR run drains: HR staging when configured, plus HR-tagged
    /// records in internal and external staging
    fn hr_routes(&self) -> Vec<MigrationRoute> {
        let mut routes = Vec::with_capacity(3);
        if self.manager.is_configured(HR_ROUTE.staging) {
            routes.push(HR_ROUTE);
        }
        routes.push(INTERNAL_HR_ROUTE);
        routes.push(EXTERNAL_HR_ROUTE);
        routes
    }

    /// HR promotion: move every HR record from staging into the HR pair with
    /// no age condition, then reconcile the HR backup against the HR primary
    pub async fn run_hr_migration(&self, cancel: &CancelFlag) -> Result<MigrationStats> {
        let started = Instant::now();
        let mut stats = MigrationStats::default();

        for route in self.hr_routes() {
            let run = self
                .run_route(route, Eligibility::Unconditional, cancel)
                .await?;
            stats.merge(run);
        }

        if !cancel.is_cancelled() {
            let primary = self.manager.handle(HR_ROUTE.primary).await?;
            let backup = self.manager.handle(HR_ROUTE.backup).await?;
            for collection in primary.store().list_collections().await? {
                let mirrored = self.reconcile_mirror(&primary, &backup, &collection, cancel).await;
                stats.merge(mirrored);
            }
        }

        stats.duration = started.elapsed();
        info!(
            migrated = stats.migrated_records,
            failed = stats.failed_records,
            mirrored = stats.mirrored_records,
            backup_only = stats.backup_only_records,
            "HR migration finished"
        );
        Ok(stats)
    }

    /// Make the backup field-identical to the primary for one collection.
    ///
    /// Primary documents missing from the backup, or present with different
    /// fields, are written to the backup and counted in `mirrored_records`.
    /// Backup documents with no primary counterpart are counted in
    /// `backup_only_records` and logged; they are never deleted.
    pub async fn reconcile_mirror(
        &self,
        primary: &DatabaseHandle,
        backup: &DatabaseHandle,
        collection: &str,
        cancel: &CancelFlag,
    ) -> MigrationStats {
        let started = Instant::now();
        let mut stats = MigrationStats::default();

        let (primary_docs, backup_docs) = tokio::join!(
            primary.store().find(collection, RecordFilter::All),
            backup.store().find(collection, RecordFilter::All),
        );
        let (primary_docs, backup_docs) = match (primary_docs, backup_docs) {
            (Ok(p), Ok(b)) => (p, b),
            (Err(e), _) | (_, Err(e)) => {
                stats
                    .errors
                    .push(format!("{}: mirror scan failed: {}", collection, e));
                return stats;
            }
        };

        let primary_records: Vec<StagedRecord> =
            primary_docs.into_iter().map(StagedRecord::from_document).collect();
        let backup_records: Vec<StagedRecord> =
            backup_docs.into_iter().map(StagedRecord::from_document).collect();

        for record in &primary_records {
            if cancel.is_cancelled() {
                stats.cancelled = true;
                break;
            }

            let key = record.natural_key(&self.config.key_fields);
            let filter = RecordFilter::Matches(key.clone());
            let in_sync = backup_records
                .iter()
                .any(|b| filter.matches(b.payload()) && b.payload() == record.payload());
            if in_sync {
                continue;
            }

            match backup.store().upsert(collection, key, record.payload().clone()).await {
                Ok(()) => stats.mirrored_records += 1,
                Err(e) => stats.errors.push(format!(
                    "{}/{} ({}): mirror write failed: {}",
                    backup.role(),
                    collection,
                    record.label(),
                    e
                )),
            }
        }

        stats.backup_only_records = backup_records
            .iter()
            .filter(|b| {
                let filter = RecordFilter::Matches(b.natural_key(&self.config.key_fields));
                !primary_records.iter().any(|p| filter.matches(p.payload()))
            })
            .count() as u64;

        if stats.mirrored_records > 0 {
            warn!(
                collection,
                mirrored = stats.mirrored_records,
                "Backup was missing or stale for primary documents, repaired"
            );
        }
        if stats.backup_only_records > 0 {
            warn!(
                collection,
                backup_only = stats.backup_only_records,
                "Backup holds documents the primary does not"
            );
        }
        stats.duration = started.elapsed();
        stats
    }

    /// Reconciliation sweep run after migration.
    ///
    /// Anything still in staging past the retention window should already
    /// have migrated. Each leftover is checked for primary/backup drift, then
    /// the dual write is retried; a record that still fails is reported as a
    /// persistent error and left in place. Expired anonymous external records
    /// are purged when configured; HR-tagged records are never purged.
    pub async fn cleanup_temp_data(&self, cancel: &CancelFlag) -> CleanupReport {
        let started = Instant::now();
        let mut report = CleanupReport::default();
        let cutoff = self.cutoff(Utc::now());

        let mut routes = vec![INTERNAL_ROUTE];
        routes.extend(self.hr_routes());

        for route in routes {
            match self.route_handles(route).await {
                Ok(handles) => {
                    self.sweep_route(route, &handles, cutoff, cancel, &mut report)
                        .await
                }
                Err(e) => {
                    error!(staging = %route.staging, primary = %route.primary, error = %e, "Cleanup could not reach databases");
                    let entry = format!("{} -> {}: {}", route.staging, route.primary, e);
                    report.unavailable.push(entry);
                }
            }
        }

        if self.config.purge_expired_external && !cancel.is_cancelled() {
            self.purge_external(cutoff, cancel, &mut report).await;
        }

        report.duration = started.elapsed();
        info!(
            removed = report.documents_removed,
            drift_repaired = report.drift_repaired,
            expired_external = report.expired_external,
            errors = report.errors.len(),
            "Cleanup finished"
        );
        report
    }

    async fn sweep_route(
        &self,
        route: MigrationRoute,
        handles: &RouteHandles,
        cutoff: DateTime,
        cancel: &CancelFlag,
        report: &mut CleanupReport,
    ) {
        let staging_role = handles.staging.role();
        let collections = match handles.staging.store().list_collections().await {
            Ok(c) => c,
            Err(e) => {
                report.errors.push(format!("{}: list collections failed: {}", staging_role, e));
                return;
            }
        };

        for collection in collections {
            let target = route.target_collection(&collection);
            let transfer = Transfer {
                staging: &handles.staging,
                primary: &handles.primary,
                backup: &handles.backup,
                source: &collection,
                target: &target,
            };
            let filter = Eligibility::OlderThan(cutoff).filter(route.selection);
            let leftovers = match handles.staging.store().find(&collection, filter).await {
                Ok(docs) => docs,
                Err(e) => {
                    report
                        .errors
                        .push(format!("{}/{}: scan failed: {}", staging_role, collection, e));
                    continue;
                }
            };

            for document in leftovers {
                if cancel.is_cancelled() {
                    return;
                }

                let record = StagedRecord::from_document(document);
                let drift = self.detect_drift(&record, &transfer).await;
                if drift.is_drift() {
                    warn!(
                        collection = %collection,
                        record = %record.label(),
                        drift = ?drift,
                        "Primary and backup disagree for leftover record"
                    );
                }

                match self.migrate_one(&record, &transfer).await {
                    Ok(()) => {
                        report.documents_removed += 1;
                        if drift.is_drift() {
                            report.drift_repaired += 1;
                        }
                        report.note_cleaned(staging_role.as_str(), &collection);
                    }
                    Err(e) => {
                        error!(
                            collection = %collection,
                            record = %record.label(),
                            error = %e,
                            "Persistent migration failure"
                        );
                        report.errors.push(format!(
                            "{}/{} ({}): persistent failure: {}",
                            staging_role,
                            collection,
                            record.label(),
                            e
                        ));
                    }
                }
            }
        }
    }

    async fn detect_drift(&self, record: &StagedRecord, transfer: &Transfer<'_>) -> DriftState {
        let key = record.natural_key(&self.config.key_fields);
        let (in_primary, in_backup) = tokio::join!(
            transfer
                .primary
                .store()
                .count(transfer.target, RecordFilter::Matches(key.clone())),
            transfer
                .backup
                .store()
                .count(transfer.target, RecordFilter::Matches(key)),
        );
        // A failed count is treated as absent; the repair write follows anyway
        DriftState::from_presence(
            in_primary.map(|n| n > 0).unwrap_or(false),
            in_backup.map(|n| n > 0).unwrap_or(false),
        )
    }

    async fn purge_external(&self, cutoff: DateTime, cancel: &CancelFlag, report: &mut CleanupReport) {
        let role = DatabaseRole::ExternalStaging;
        let external = match self.manager.handle(role).await {
            Ok(handle) => handle,
            Err(e) => {
                report.unavailable.push(format!("{}: {}", role, e));
                return;
            }
        };

        let collections = match external.store().list_collections().await {
            Ok(c) => c,
            Err(e) => {
                report.errors.push(format!("{}: list collections failed: {}", role, e));
                return;
            }
        };

        let filter = Eligibility::OlderThan(cutoff).filter(Selection::Standard);
        for collection in collections {
            let expired = match external.store().find(&collection, filter.clone()).await {
                Ok(docs) => docs,
                Err(e) => {
                    report.errors.push(format!("{}/{}: scan failed: {}", role, collection, e));
                    continue;
                }
            };

            for document in expired {
                if cancel.is_cancelled() {
                    return;
                }
                let record = StagedRecord::from_document(document);
                let Some(id) = record.id() else { continue };
                match external.store().delete(&collection, id).await {
                    Ok(n) if n > 0 => {
                        report.documents_removed += 1;
                        report.expired_external += 1;
                        report.note_cleaned(role.as_str(), &collection);
                    }
                    Ok(_) => {}
                    Err(e) => report.errors.push(format!(
                        "{}/{} ({}): purge failed: {}",
                        role,
                        collection,
                        record.label(),
                        e
                    )),
                }
            }
        }

        if report.expired_external > 0 {
            info!(purged = report.expired_external, "Purged expired external records");
        }
    }
}

fn write_error(collection: &str, stage: MigrationStage, err: DatastoreError) -> DatastoreError {
    DatastoreError::MigrationWrite {
        collection: collection.to_string(),
        stage: stage.to_string(),
        message: err.to_string(),
    }
}
