//! Document schemas
//!
//! Staged records are schemaless payloads; this module names the handful of
//! fields the migration pipeline depends on.

mod staged_record;

pub use staged_record::{
    StagedRecord, CREATED_AT_FIELD, ID_FIELD, IS_HR_FIELD, MIGRATED_AT_FIELD,
};
