//! Identity router
//!
//! Resolves where a request's data lives. The internal, external and HR
//! branches are separate functions that each accept only the identity type
//! they serve, so no code path can produce an internal-scoped decision for an
//! external identity or the reverse.

use bson::Document;
use serde::Serialize;

use super::hr::HrClassifier;
use super::identity::{compute_id, AccountId, Identity, Username};
use crate::connection::{DatabaseRole, Scope};
use crate::types::{DatastoreError, Result};

/// Operation context supplied by the caller
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Logical collection the caller wants, without any scope prefix
    pub collection: String,
    /// Free-form description of the operation, inspected for HR keywords
    pub operation: String,
}

impl RequestContext {
    pub fn new(collection: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            operation: operation.into(),
        }
    }
}

/// Where a request's data lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingDecision {
    pub database_id: DatabaseRole,
    /// Mirror written alongside the primary (HR pair only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirror_id: Option<DatabaseRole>,
    pub collection_name: String,
    pub storage_location_tag: &'static str,
    pub is_hr: bool,
    /// Prefixed identifier of the requesting identity
    pub owner_id: String,
    pub scope: Scope,
}

impl RoutingDecision {
    /// Re-check the scoping invariants. A failure is a programming error and
    /// is reported as a routing violation, never silently corrected.
    pub fn verify(&self) -> Result<()> {
        if self.database_id.scope() != self.scope {
            return Err(DatastoreError::RoutingViolation(format!(
                "{} decision points at {} database",
                scope_name(self.scope),
                self.database_id
            )));
        }
        if !self.collection_name.starts_with(self.scope.prefix()) {
            return Err(DatastoreError::RoutingViolation(format!(
                "collection '{}' lacks the {} prefix",
                self.collection_name,
                scope_name(self.scope)
            )));
        }
        if self.is_hr != (self.scope == Scope::Hr) {
            return Err(DatastoreError::RoutingViolation(format!(
                "HR flag disagrees with {} scope",
                scope_name(self.scope)
            )));
        }
        Ok(())
    }
}

fn scope_name(scope: Scope) -> &'static str {
    match scope {
        Scope::Internal => "internal",
        Scope::External => "external",
        Scope::Hr => "hr",
    }
}

#[derive(Debug, Clone, Default)]
pub struct IdentityRouter {
    classifier: HrClassifier,
}

impl IdentityRouter {
    pub fn new(classifier: HrClassifier) -> Self {
        Self { classifier }
    }

    pub fn classify_hr(&self, payload: &Document, context: &RequestContext) -> bool {
        self.classifier.classify(payload, &context.operation)
    }

    /// Resolve the database and collection for a request.
    ///
    /// HR-domain payloads go to the HR pair whatever the identity; everything
    /// else is dispatched on the identity variant.
    pub fn route(
        &self,
        identity: &Identity,
        payload: &Document,
        context: &RequestContext,
    ) -> Result<RoutingDecision> {
        validate_collection(&context.collection)?;

        let decision = if self.classify_hr(payload, context) {
            route_hr(identity, &context.collection)
        } else {
            match identity {
                Identity::Internal(account) => route_internal(account, &context.collection),
                Identity::External(user) => route_external(user, &context.collection),
            }
        };

        decision.verify()?;
        Ok(decision)
    }
}

fn route_internal(account: &AccountId, collection: &str) -> RoutingDecision {
    RoutingDecision {
        database_id: DatabaseRole::InternalStaging,
        mirror_id: None,
        collection_name: format!("{}{}", Scope::Internal.prefix(), collection),
        storage_location_tag: "internal_staging",
        is_hr: false,
        owner_id: compute_id(&Identity::Internal(account.clone())),
        scope: Scope::Internal,
    }
}

fn route_external(user: &Username, collection: &str) -> RoutingDecision {
    RoutingDecision {
        database_id: DatabaseRole::ExternalStaging,
        mirror_id: None,
        collection_name: format!("{}{}", Scope::External.prefix(), collection),
        storage_location_tag: "external_staging",
        is_hr: false,
        owner_id: compute_id(&Identity::External(user.clone())),
        scope: Scope::External,
    }
}

fn route_hr(identity: &Identity, collection: &str) -> RoutingDecision {
    RoutingDecision {
        database_id: DatabaseRole::HrPrimary,
        mirror_id: Some(DatabaseRole::HrBackup),
        collection_name: format!("{}{}", Scope::Hr.prefix(), collection),
        storage_location_tag: "hr_primary",
        is_hr: true,
        owner_id: compute_id(identity),
        scope: Scope::Hr,
    }
}

fn validate_collection(collection: &str) -> Result<()> {
    if collection.is_empty() {
        return Err(DatastoreError::BadRequest("collection name is empty".into()));
    }
    if collection.len() > 120 {
        return Err(DatastoreError::BadRequest("collection name is too long".into()));
    }
    if collection.starts_with("system.") || collection.contains(['$', '\0']) {
        return Err(DatastoreError::BadRequest(format!(
            "invalid collection name '{}'",
            collection
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn internal() -> Identity {
        Identity::Internal(AccountId::new("acct-1"))
    }

    fn external() -> Identity {
        Identity::External(Username::new("octocat"))
    }

    #[test]
    fn test_internal_routes_to_internal_staging() {
        let router = IdentityRouter::default();
        let decision = router
            .route(&internal(), &doc! { "score": 1 }, &RequestContext::new("repos", "score"))
            .unwrap();

        assert_eq!(decision.database_id, DatabaseRole::InternalStaging);
        assert_eq!(decision.collection_name, "internal_repos");
        assert_eq!(decision.owner_id, "internal_acct-1");
        assert!(!decision.is_hr);
    }

    #[test]
    fn test_external_routes_to_external_staging() {
        let router = IdentityRouter::default();
        let decision = router
            .route(&external(), &doc! { "score": 1 }, &RequestContext::new("repos", "score"))
            .unwrap();

        assert_eq!(decision.database_id, DatabaseRole::ExternalStaging);
        assert_eq!(decision.collection_name, "external_repos");
        assert_eq!(decision.owner_id, "external_octocat");
    }

    #[test]
    fn test_hr_payload_ignores_identity() {
        let router = IdentityRouter::default();
        let payload = doc! { "recruiter_email": "lee@hire.dev", "candidate": "octocat" };
        let context = RequestContext::new("shortlists", "save");

        for identity in [internal(), external()] {
            let decision = router.route(&identity, &payload, &context).unwrap();
            assert_eq!(decision.database_id, DatabaseRole::HrPrimary);
            assert_eq!(decision.mirror_id, Some(DatabaseRole::HrBackup));
            assert_eq!(decision.collection_name, "hr_shortlists");
            assert!(decision.is_hr);
        }
    }

    #[test]
    fn test_hr_context_routes_to_hr() {
        let router = IdentityRouter::default();
        let decision = router
            .route(&external(), &doc! {}, &RequestContext::new("notes", "hiring pipeline"))
            .unwrap();
        assert_eq!(decision.scope, Scope::Hr);
    }

    #[test]
    fn test_no_cross_scope_decisions() {
        let router = IdentityRouter::default();
        let context = RequestContext::new("profile", "update");

        let ext = router.route(&external(), &doc! {}, &context).unwrap();
        assert_eq!(ext.database_id.scope(), Scope::External);

        let int = router.route(&internal(), &doc! {}, &context).unwrap();
        assert_eq!(int.database_id.scope(), Scope::Internal);
    }

    #[test]
    fn test_verify_flags_tampered_decision() {
        let mut decision = route_external(&Username::new("octocat"), "repos");
        decision.database_id = DatabaseRole::InternalPrimary;
        assert!(matches!(decision.verify(), Err(DatastoreError::RoutingViolation(_))));

        let mut decision = route_internal(&AccountId::new("a"), "repos");
        decision.collection_name = "external_repos".into();
        assert!(matches!(decision.verify(), Err(DatastoreError::RoutingViolation(_))));
    }

    #[test]
    fn test_invalid_collections_rejected() {
        let router = IdentityRouter::default();
        for bad in ["", "system.users", "a$b"] {
            let err = router
                .route(&internal(), &doc! {}, &RequestContext::new(bad, "x"))
                .unwrap_err();
            assert!(matches!(err, DatastoreError::BadRequest(_)), "{}", bad);
        }
    }
}
