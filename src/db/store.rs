//! Document store abstraction
//!
//! Every logical database is reached through [`DocumentStore`], so the
//! connection manager, router and migration service never depend on a
//! concrete driver. MongoDB is the production backend; the in-memory store
//! backs `memory://` URLs and tests.

use async_trait::async_trait;
use bson::{doc, Bson, DateTime, Document};

use crate::db::schemas::{CREATED_AT_FIELD, IS_HR_FIELD};
use crate::types::Result;

/// Record selection understood by every backend
#[derive(Debug, Clone, PartialEq)]
pub enum RecordFilter {
    /// Every document in the collection
    All,
    /// Documents whose `created_at` is strictly before the cutoff
    CreatedBefore(DateTime),
    /// Documents whose fields equal every field of the given document
    Matches(Document),
    /// Documents explicitly tagged `is_hr: true`
    HrTagged,
    /// Documents the inner filter rejects
    Not(Box<RecordFilter>),
    /// Documents every inner filter accepts
    And(Vec<RecordFilter>),
}

impl RecordFilter {
    /// Render as a MongoDB query document
    pub fn to_document(&self) -> Document {
        match self {
            Self::All => Document::new(),
            Self::CreatedBefore(cutoff) => doc! { CREATED_AT_FIELD: { "$lt": *cutoff } },
            Self::Matches(fields) => fields.clone(),
            Self::HrTagged => doc! { IS_HR_FIELD: true },
            Self::Not(inner) => doc! { "$nor": [inner.to_document()] },
            Self::And(filters) if filters.is_empty() => Document::new(),
            Self::And(filters) => {
                let clauses: Vec<Bson> = filters
                    .iter()
                    .map(|f| Bson::Document(f.to_document()))
                    .collect();
                doc! { "$and": clauses }
            }
        }
    }

    /// Evaluate against a document held in memory
    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Self::All => true,
            Self::CreatedBefore(cutoff) => matches!(
                document.get(CREATED_AT_FIELD),
                Some(Bson::DateTime(created)) if created < cutoff
            ),
            Self::Matches(fields) => fields
                .iter()
                .all(|(key, value)| document.get(key) == Some(value)),
            Self::HrTagged => matches!(document.get(IS_HR_FIELD), Some(Bson::Boolean(true))),
            Self::Not(inner) => !inner.matches(document),
            Self::And(filters) => filters.iter().all(|f| f.matches(document)),
        }
    }
}

/// Minimal set of operations the core needs from a logical database
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Human-readable backend name for logs
    fn name(&self) -> &str;

    /// Lightweight round-trip used for health checks
    async fn ping(&self) -> Result<()>;

    /// User collections in this database (system collections excluded)
    async fn list_collections(&self) -> Result<Vec<String>>;

    /// Documents matching the filter, in insertion order
    async fn find(&self, collection: &str, filter: RecordFilter) -> Result<Vec<Document>>;

    /// Replace the document matching `key`, inserting it if absent
    async fn upsert(&self, collection: &str, key: Document, document: Document) -> Result<()>;

    /// Delete one document by `_id`, returning the number removed
    async fn delete(&self, collection: &str, id: &Bson) -> Result<u64>;

    /// Number of documents matching the filter
    async fn count(&self, collection: &str, filter: RecordFilter) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_created_before_filter() {
        let now = DateTime::now();
        let older = DateTime::from_millis(now.timestamp_millis() - 1_000);
        let filter = RecordFilter::CreatedBefore(now);

        assert!(filter.matches(&doc! { "created_at": older }));
        assert!(!filter.matches(&doc! { "created_at": now }));
        assert!(!filter.matches(&doc! { "name": "no timestamp" }));
        assert_eq!(
            filter.to_document(),
            doc! { "created_at": { "$lt": now } }
        );
    }

    #[test]
    fn test_matches_filter_requires_all_fields() {
        let filter = RecordFilter::Matches(doc! { "record_key": "a", "owner": "internal_7" });
        assert!(filter.matches(&doc! { "record_key": "a", "owner": "internal_7", "score": 3 }));
        assert!(!filter.matches(&doc! { "record_key": "a" }));
    }

    #[test]
    fn test_hr_filters_compose() {
        let cutoff = DateTime::now();
        let old = DateTime::from_millis(cutoff.timestamp_millis() - 1_000);
        let standard = RecordFilter::And(vec![
            RecordFilter::CreatedBefore(cutoff),
            RecordFilter::Not(Box::new(RecordFilter::HrTagged)),
        ]);

        assert!(standard.matches(&doc! { "created_at": old }));
        assert!(standard.matches(&doc! { "created_at": old, "is_hr": false }));
        assert!(!standard.matches(&doc! { "created_at": old, "is_hr": true }));
        assert!(RecordFilter::HrTagged.matches(&doc! { "is_hr": true }));
        assert!(!RecordFilter::HrTagged.matches(&doc! { "is_hr": "yes" }));
        assert_eq!(
            standard.to_document(),
            doc! { "$and": [
                { "created_at": { "$lt": cutoff } },
                { "$nor": [{ "is_hr": true }] },
            ] }
        );
        assert_eq!(RecordFilter::And(vec![]).to_document(), Document::new());
    }
}
