//! Staging-to-permanent migration
//!
//! - `service` - the dual-write migration, mirror reconciliation and cleanup
//! - `stage` - per-document states and drift classification
//! - `stats` - run accounting

pub mod service;
pub mod stage;
pub mod stats;

pub use service::{
    hr_collection_name, MigrationConfig, MigrationRoute, MigrationService, EXTERNAL_HR_ROUTE, HR_ROUTE,
    INTERNAL_HR_ROUTE, INTERNAL_ROUTE,
};
pub use stage::{DriftState, Eligibility, MigrationStage, Selection};
pub use stats::{CleanupReport, MigrationStats};
