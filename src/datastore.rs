//! Core API consumed by collaborators
//!
//! [`Datastore`] ties the connection manager, identity router and migration
//! service together behind the four operations upstream layers use.

use bson::Document;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::connection::{ConnectionManager, DatabaseHandle, HealthReport};
use crate::migration::{CleanupReport, MigrationService, MigrationStats};
use crate::routing::{Identity, IdentityRouter, RequestContext};
use crate::types::{CancelFlag, DatastoreError, Result};

pub struct Datastore {
    manager: Arc<ConnectionManager>,
    router: IdentityRouter,
    migration: Arc<MigrationService>,
}

impl Datastore {
    pub fn new(
        manager: Arc<ConnectionManager>,
        router: IdentityRouter,
        migration: Arc<MigrationService>,
    ) -> Self {
        Self {
            manager,
            router,
            migration,
        }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn migration(&self) -> &Arc<MigrationService> {
        &self.migration
    }

    /// Handle and scoped collection name for a request.
    ///
    /// The handle's role is checked against the decision's scope before it
    /// is returned; a mismatch is a [`DatastoreError::RoutingViolation`].
    pub async fn get_database_for(
        &self,
        identity: &Identity,
        payload: &Document,
        context: &RequestContext,
    ) -> Result<(DatabaseHandle, String)> {
        let decision = self.router.route(identity, payload, context)?;
        let handle = self.manager.handle(decision.database_id).await?;

        if handle.role().scope() != decision.scope {
            error!(
                owner = %decision.owner_id,
                expected = ?decision.scope,
                handle = %handle.role(),
                "Handle scope does not match routing decision"
            );
            return Err(DatastoreError::RoutingViolation(format!(
                "{} handle resolved for {:?}-scoped request",
                handle.role(),
                decision.scope
            )));
        }

        Ok((handle, decision.collection_name))
    }

    pub async fn get_health_status(&self) -> HealthReport {
        self.manager.get_all_health().await
    }

    /// Run the internal and HR migrations once.
    ///
    /// Safe to call repeatedly. Configuration problems and routing
    /// violations propagate; an unreachable database is folded into the
    /// returned stats as an error entry.
    pub async fn trigger_migration(&self) -> Result<MigrationStats> {
        let cancel = CancelFlag::new();
        let mut stats = MigrationStats::default();

        for (name, result) in [
            ("full", self.migration.run_full_migration(&cancel).await),
            ("hr", self.migration.run_hr_migration(&cancel).await),
        ] {
            match result {
                Ok(run) => stats.merge(run),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(migration = name, error = %e, "Migration could not run");
                    stats.errors.push(format!("{} migration: {}", name, e));
                }
            }
        }

        info!(
            migrated = stats.migrated_records,
            failed = stats.failed_records,
            errors = stats.errors.len(),
            "Manual migration finished"
        );
        Ok(stats)
    }

    pub async fn trigger_cleanup(&self) -> CleanupReport {
        self.migration.cleanup_temp_data(&CancelFlag::new()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{DatabaseRole, OverallStatus, Scope};
    use crate::migration::MigrationConfig;
    use crate::routing::{AccountId, Username};
    use crate::testing::{hours_ago, staged, Fixture};
    use bson::doc;

    fn datastore(fixture: Fixture) -> Datastore {
        let (manager, _) = fixture.manager();
        let migration = Arc::new(MigrationService::new(manager.clone(), MigrationConfig::default()));
        Datastore::new(manager, IdentityRouter::default(), migration)
    }

    #[tokio::test]
    async fn test_external_request_gets_external_handle() {
        let store = datastore(Fixture::new());
        let identity = Identity::External(Username::new("octocat"));

        let (handle, collection) = store
            .get_database_for(&identity, &doc! {}, &RequestContext::new("repos", "score"))
            .await
            .unwrap();

        assert_eq!(handle.role(), DatabaseRole::ExternalStaging);
        assert_eq!(handle.role().scope(), Scope::External);
        assert_eq!(collection, "external_repos");
    }

    #[tokio::test]
    async fn test_hr_request_gets_hr_primary() {
        let store = datastore(Fixture::new());
        let identity = Identity::Internal(AccountId::new("acct-9"));

        let (handle, collection) = store
            .get_database_for(
                &identity,
                &doc! { "recruiter_email": "sam@talent.io" },
                &RequestContext::new("contacts", "save"),
            )
            .await
            .unwrap();

        assert_eq!(handle.role(), DatabaseRole::HrPrimary);
        assert_eq!(collection, "hr_contacts");
    }

    #[tokio::test]
    async fn test_unreachable_database_surfaces_as_error() {
        let store = datastore(Fixture::new().with_down(DatabaseRole::InternalStaging));
        let identity = Identity::Internal(AccountId::new("acct-1"));

        let err = store
            .get_database_for(&identity, &doc! {}, &RequestContext::new("repos", "score"))
            .await
            .unwrap_err();
        assert!(matches!(err, DatastoreError::Unreachable { .. }));
        assert_eq!(err.public_message(), "Service temporarily unavailable");
    }

    #[tokio::test]
    async fn test_trigger_migration_is_repeatable() {
        let fixture = Fixture::new();
        let staging = fixture.store(DatabaseRole::InternalStaging);
        staging.insert("internal_repos", staged("r1", hours_ago(30))).await;
        let store = datastore(fixture);

        let first = store.trigger_migration().await.unwrap();
        let second = store.trigger_migration().await.unwrap();

        assert_eq!(first.migrated_records, 1);
        assert_eq!(second.total_records, 0);
        assert!(second.errors.is_empty());
    }

    #[tokio::test]
    async fn test_trigger_migration_folds_outages_into_stats() {
        let store = datastore(Fixture::new().with_down(DatabaseRole::HrBackup));

        let stats = store.trigger_migration().await.unwrap();
        assert_eq!(stats.errors.len(), 1);
        assert!(stats.errors[0].starts_with("hr migration"));
    }

    #[tokio::test]
    async fn test_health_status_covers_configured_databases() {
        let report = datastore(Fixture::new()).get_health_status().await;
        assert_eq!(report.overall_status, OverallStatus::Healthy);
        assert_eq!(report.databases.len(), 6);
    }

    #[tokio::test]
    async fn test_trigger_cleanup_reports() {
        let fixture = Fixture::new();
        fixture
            .store(DatabaseRole::ExternalStaging)
            .insert("external_repos", staged("e1", hours_ago(48)))
            .await;
        let report = datastore(fixture).trigger_cleanup().await;
        assert_eq!(report.documents_removed, 1);
        assert_eq!(report.collections_cleaned, vec!["external-staging/external_repos"]);
    }
}
