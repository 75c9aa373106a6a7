//! Configuration for raseen-vault
//!
//! CLI arguments and environment variable handling using clap. Every option
//! can be supplied through its environment variable; a `.env` file is loaded
//! first by the binary.

use clap::{Parser, ValueEnum};
use std::collections::HashMap;
use std::time::Duration;

use crate::connection::{DatabaseRole, ManagerConfig, RetryPolicy};
use crate::migration::MigrationConfig;
use crate::scheduler::JobSchedule;
use crate::types::{DatastoreError, Result};

/// URL schemes accepted for logical database connection strings
const ACCEPTED_SCHEMES: [&str; 3] = ["mongodb://", "mongodb+srv://", "memory://"];

/// Log output format
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// raseen-vault - identity-scoped routing and staged-record migration
#[derive(Parser, Debug, Clone)]
#[command(name = "raseen-vault")]
#[command(about = "Routes user data across identity-scoped databases and promotes staged records")]
pub struct Args {
    /// Logical database connection strings
    #[command(flatten)]
    pub databases: DatabaseArgs,

    /// Connection attempts per logical database before it is marked unreachable
    #[arg(long, env = "MAX_RETRIES", default_value = "5")]
    pub max_retries: u32,

    /// Base delay for exponential backoff between connection attempts
    #[arg(long, env = "RETRY_BASE_DELAY_MS", default_value = "1000")]
    pub retry_base_delay_ms: u64,

    /// Timeout for a single connection attempt
    #[arg(long, env = "CONNECT_TIMEOUT_MS", default_value = "5000")]
    pub connect_timeout_ms: u64,

    /// Timeout for a health-check ping
    #[arg(long, env = "HEALTH_TIMEOUT_MS", default_value = "2000")]
    pub health_timeout_ms: u64,

    /// How long a health-check result is served from cache
    #[arg(long, env = "HEALTH_CACHE_TTL_SECS", default_value = "60")]
    pub health_cache_ttl_secs: u64,

    /// Age after which a staged record becomes eligible for migration
    #[arg(long, env = "RETENTION_HOURS", default_value = "24")]
    pub retention_hours: u64,

    /// Comma-separated business-key fields used to upsert migrated records
    #[arg(long, env = "MIGRATION_KEY_FIELDS", default_value = "record_key")]
    pub migration_key_fields: String,

    /// Delete anonymous external-staging records once they outlive retention
    #[arg(long, env = "PURGE_EXPIRED_EXTERNAL", default_value_t = true, action = clap::ArgAction::Set)]
    pub purge_expired_external: bool,

    /// Full migration cadence
    #[arg(long, env = "MIGRATION_INTERVAL_SECS", default_value = "86400")]
    pub migration_interval_secs: u64,

    /// HR migration cadence
    #[arg(long, env = "HR_MIGRATION_INTERVAL_SECS", default_value = "21600")]
    pub hr_migration_interval_secs: u64,

    /// Cleanup cadence
    #[arg(long, env = "CLEANUP_INTERVAL_SECS", default_value = "86400")]
    pub cleanup_interval_secs: u64,

    /// Delay of the first cleanup so it runs after the migration
    #[arg(long, env = "CLEANUP_OFFSET_SECS", default_value = "3600")]
    pub cleanup_offset_secs: u64,

    /// Health check cadence
    #[arg(long, env = "HEALTH_INTERVAL_SECS", default_value = "3600")]
    pub health_interval_secs: u64,

    /// Attempts per scheduled job invocation
    #[arg(long, env = "JOB_MAX_RETRIES", default_value = "3")]
    pub job_max_retries: u32,

    /// Base delay for backoff between job attempts
    #[arg(long, env = "JOB_RETRY_BASE_DELAY_MS", default_value = "30000")]
    pub job_retry_base_delay_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "pretty")]
    pub log_format: LogFormat,
}

/// One connection string per logical database
#[derive(clap::Args, Debug, Clone, Default)]
pub struct DatabaseArgs {
    /// External (anonymous) users staging database
    #[arg(long, env = "EXTERNAL_USERS_DB_URL")]
    pub external_users_db_url: Option<String>,

    /// Internal users staging database
    #[arg(long, env = "RASEEN_TEMP_USER_DB_URL")]
    pub raseen_temp_user_db_url: Option<String>,

    /// Internal users primary database
    #[arg(long, env = "RASEEN_MAIN_USER_DB_URL")]
    pub raseen_main_user_db_url: Option<String>,

    /// Internal users backup database
    #[arg(long, env = "SRIE_MAIN_USER_DB_URL")]
    pub srie_main_user_db_url: Option<String>,

    /// HR primary database
    #[arg(long, env = "RASEEN_MAIN_HR_DB_URL")]
    pub raseen_main_hr_db_url: Option<String>,

    /// HR backup database
    #[arg(long, env = "SRIE_MAIN_HR_DB_URL")]
    pub srie_main_hr_db_url: Option<String>,

    /// HR staging database (optional)
    #[arg(long, env = "RASEEN_TEMP_HR_DB_URL")]
    pub raseen_temp_hr_db_url: Option<String>,
}

impl Args {
    pub fn database_urls(&self) -> DatabaseUrls {
        let d = &self.databases;
        let mut urls = DatabaseUrls::default();
        for (role, value) in [
            (DatabaseRole::ExternalStaging, &d.external_users_db_url),
            (DatabaseRole::InternalStaging, &d.raseen_temp_user_db_url),
            (DatabaseRole::InternalPrimary, &d.raseen_main_user_db_url),
            (DatabaseRole::InternalBackup, &d.srie_main_user_db_url),
            (DatabaseRole::HrPrimary, &d.raseen_main_hr_db_url),
            (DatabaseRole::HrBackup, &d.srie_main_hr_db_url),
            (DatabaseRole::HrStaging, &d.raseen_temp_hr_db_url),
        ] {
            if let Some(url) = value {
                urls = urls.with(role, url.clone());
            }
        }
        urls
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            retry: RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_base_delay_ms)),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            health_timeout: Duration::from_millis(self.health_timeout_ms),
            health_cache_ttl: Duration::from_secs(self.health_cache_ttl_secs),
        }
    }

    pub fn migration_config(&self) -> MigrationConfig {
        MigrationConfig {
            retention: Duration::from_secs(self.retention_hours * 3600),
            key_fields: self
                .migration_key_fields
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            purge_expired_external: self.purge_expired_external,
        }
    }

    fn job_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.job_max_retries,
            Duration::from_millis(self.job_retry_base_delay_ms),
        )
    }

    pub fn migration_schedule(&self) -> JobSchedule {
        JobSchedule::every(Duration::from_secs(self.migration_interval_secs)).with_retry(self.job_retry())
    }

    pub fn hr_migration_schedule(&self) -> JobSchedule {
        JobSchedule::every(Duration::from_secs(self.hr_migration_interval_secs))
            .with_retry(self.job_retry())
    }

    pub fn cleanup_schedule(&self) -> JobSchedule {
        JobSchedule::every(Duration::from_secs(self.cleanup_interval_secs))
            .with_offset(Duration::from_secs(self.cleanup_offset_secs))
            .with_retry(self.job_retry())
    }

    pub fn health_schedule(&self) -> JobSchedule {
        JobSchedule::every(Duration::from_secs(self.health_interval_secs)).with_retry(self.job_retry())
    }

    /// Validate settings that clap cannot check on its own.
    ///
    /// Database URLs are deliberately not validated here: a bad URL disables
    /// only its own database and is reported per role.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_retries == 0 {
            return Err("MAX_RETRIES must be at least 1".to_string());
        }
        if self.job_max_retries == 0 {
            return Err("JOB_MAX_RETRIES must be at least 1".to_string());
        }
        if self.retention_hours == 0 {
            return Err("RETENTION_HOURS must be at least 1".to_string());
        }
        for (name, secs) in [
            ("MIGRATION_INTERVAL_SECS", self.migration_interval_secs),
            ("HR_MIGRATION_INTERVAL_SECS", self.hr_migration_interval_secs),
            ("CLEANUP_INTERVAL_SECS", self.cleanup_interval_secs),
            ("HEALTH_INTERVAL_SECS", self.health_interval_secs),
        ] {
            if secs == 0 {
                return Err(format!("{} must be greater than zero", name));
            }
        }
        Ok(())
    }
}

/// Raw connection strings keyed by role
#[derive(Debug, Clone, Default)]
pub struct DatabaseUrls {
    urls: HashMap<DatabaseRole, String>,
}

impl DatabaseUrls {
    /// Read each role's variable through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let urls = DatabaseRole::ALL
            .iter()
            .filter_map(|role| lookup(role.env_var()).map(|url| (*role, url)))
            .collect();
        Self { urls }
    }

    pub fn with(mut self, role: DatabaseRole, url: impl Into<String>) -> Self {
        self.urls.insert(role, url.into());
        self
    }

    /// Whether a value was supplied at all (valid or not)
    pub fn is_set(&self, role: DatabaseRole) -> bool {
        self.urls.contains_key(&role)
    }

    /// Validated URL for a role, or a configuration error naming its variable
    pub fn get(&self, role: DatabaseRole) -> Result<&str> {
        let variable = role.env_var();
        let url = self
            .urls
            .get(&role)
            .ok_or_else(|| DatastoreError::missing_variable(variable))?;
        validate_url(variable, url)?;
        Ok(url.trim())
    }
}

/// Check that a connection string is well formed
pub fn validate_url(variable: &'static str, value: &str) -> Result<()> {
    let value = value.trim();
    if value.is_empty() {
        return Err(DatastoreError::Configuration {
            variable,
            reason: "is empty".to_string(),
        });
    }

    let Some(scheme) = ACCEPTED_SCHEMES.iter().find(|s| value.starts_with(*s)) else {
        return Err(DatastoreError::Configuration {
            variable,
            reason: format!(
                "has an unsupported scheme (expected one of {})",
                ACCEPTED_SCHEMES.join(", ")
            ),
        });
    };

    let host = value[scheme.len()..]
        .split(['/', '?'])
        .next()
        .unwrap_or_default();
    if host.is_empty() || host.ends_with('@') {
        return Err(DatastoreError::Configuration {
            variable,
            reason: "is missing a host".to_string(),
        });
    }

    Ok(())
}
