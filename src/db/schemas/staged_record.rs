//! Staged record schema
//!
//! Staged records are arbitrary payloads written by upstream services. The
//! only fields this crate relies on are `_id`, `created_at` and
//! `migrated_at`; everything else is carried through untouched.
//!
//! `migrated_at` is stamped on the permanent copies only. The staged copy is
//! deleted as it was read, so staging never holds a stamped record.

use bson::{Bson, DateTime, Document};

/// MongoDB primary key field
pub const ID_FIELD: &str = "_id";

/// Creation timestamp set by upstream writers
pub const CREATED_AT_FIELD: &str = "created_at";

/// Stamped on the permanent copies when a record is promoted
pub const MIGRATED_AT_FIELD: &str = "migrated_at";

/// Explicit HR marker some writers set on HR-domain payloads
pub const IS_HR_FIELD: &str = "is_hr";

/// A record read from a staging collection
#[derive(Debug, Clone, PartialEq)]
pub struct StagedRecord {
    /// Staging `_id`, used only for deleting the staged copy
    id: Option<Bson>,
    /// Everything except `_id`
    payload: Document,
}

impl StagedRecord {
    pub fn from_document(mut document: Document) -> Self {
        let id = document.remove(ID_FIELD);
        Self {
            id,
            payload: document,
        }
    }

    pub fn id(&self) -> Option<&Bson> {
        self.id.as_ref()
    }

    pub fn payload(&self) -> &Document {
        &self.payload
    }

    pub fn created_at(&self) -> Option<DateTime> {
        self.payload.get_datetime(CREATED_AT_FIELD).ok().copied()
    }

    /// Short identifier for log lines and error entries
    pub fn label(&self) -> String {
        match &self.id {
            Some(Bson::ObjectId(oid)) => oid.to_hex(),
            Some(other) => other.to_string(),
            None => "<no _id>".to_string(),
        }
    }

    /// Business key used as the upsert filter in the permanent stores.
    ///
    /// Uses the configured key fields when the record carries all of them;
    /// otherwise the whole payload (minus `migrated_at`) identifies it.
    pub fn natural_key(&self, key_fields: &[String]) -> Document {
        if !key_fields.is_empty() && key_fields.iter().all(|f| self.payload.contains_key(f)) {
            return key_fields
                .iter()
                .filter_map(|f| self.payload.get(f).map(|v| (f.clone(), v.clone())))
                .collect();
        }

        let mut key = self.payload.clone();
        key.remove(MIGRATED_AT_FIELD);
        key
    }

    /// Copy written to primary and backup: payload without the staging `_id`,
    /// stamped with `migrated_at`
    pub fn to_permanent(&self, migrated_at: DateTime) -> Document {
        let mut document = self.payload.clone();
        document.insert(MIGRATED_AT_FIELD, migrated_at);
        document
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, oid::ObjectId};

    #[test]
    fn test_id_is_split_from_payload() {
        let oid = ObjectId::new();
        let record = StagedRecord::from_document(doc! { "_id": oid, "record_key": "r1" });
        assert_eq!(record.id(), Some(&Bson::ObjectId(oid)));
        assert!(!record.payload().contains_key("_id"));
        assert_eq!(record.label(), oid.to_hex());
    }

    #[test]
    fn test_natural_key_prefers_configured_fields() {
        let record = StagedRecord::from_document(doc! {
            "_id": ObjectId::new(),
            "record_key": "repo:42",
            "score": 7,
        });
        let key = record.natural_key(&["record_key".to_string()]);
        assert_eq!(key, doc! { "record_key": "repo:42" });
    }

    #[test]
    fn test_natural_key_falls_back_to_payload() {
        let created = DateTime::now();
        let record = StagedRecord::from_document(doc! {
            "_id": ObjectId::new(),
            "username": "octocat",
            "created_at": created,
            "migrated_at": created,
        });
        let key = record.natural_key(&["record_key".to_string()]);
        assert_eq!(key, doc! { "username": "octocat", "created_at": created });
    }

    #[test]
    fn test_permanent_copy_is_stamped() {
        let created = DateTime::from_millis(1_000);
        let migrated = DateTime::from_millis(2_000);
        let record = StagedRecord::from_document(doc! {
            "_id": ObjectId::new(),
            "created_at": created,
        });
        let copy = record.to_permanent(migrated);
        assert!(!copy.contains_key("_id"));
        assert_eq!(record.created_at(), Some(created));
        assert_eq!(copy.get_datetime("migrated_at").unwrap(), &migrated);
    }

    #[test]
    fn test_staged_copy_is_never_stamped() {
        let record = StagedRecord::from_document(doc! {
            "_id": ObjectId::new(),
            "record_key": "r1",
        });
        let before = record.clone();
        let copy = record.to_permanent(DateTime::from_millis(2_000));
        assert!(copy.contains_key("migrated_at"));
        assert_eq!(record, before);
        assert!(!record.payload().contains_key("migrated_at"));
    }
}
