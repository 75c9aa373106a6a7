//! Logical database roles
//!
//! Each role is an independently addressed database with exactly one
//! connection URL. Roles carry their identity scope so a handle can never be
//! mistaken for one belonging to another scope.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity scope a database belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Internal,
    External,
    Hr,
}

impl Scope {
    /// Collection-name prefix used for records in this scope
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Internal => "internal_",
            Self::External => "external_",
            Self::Hr => "hr_",
        }
    }
}

/// The fixed set of logical databases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatabaseRole {
    /// Anonymous users' staging store
    ExternalStaging,
    /// Authenticated users' staging store
    InternalStaging,
    /// Permanent store for internal records
    InternalPrimary,
    /// Mirror of the internal primary
    InternalBackup,
    /// Permanent store for HR-domain records
    HrPrimary,
    /// Mirror of the HR primary
    HrBackup,
    /// Optional staging store for HR-domain records
    HrStaging,
}

impl DatabaseRole {
    pub const ALL: [DatabaseRole; 7] = [
        Self::ExternalStaging,
        Self::InternalStaging,
        Self::InternalPrimary,
        Self::InternalBackup,
        Self::HrPrimary,
        Self::HrBackup,
        Self::HrStaging,
    ];

    /// Environment variable holding this role's connection URL
    pub fn env_var(&self) -> &'static str {
        match self {
            Self::ExternalStaging => "EXTERNAL_USERS_DB_URL",
            Self::InternalStaging => "RASEEN_TEMP_USER_DB_URL",
            Self::InternalPrimary => "RASEEN_MAIN_USER_DB_URL",
            Self::InternalBackup => "SRIE_MAIN_USER_DB_URL",
            Self::HrPrimary => "RASEEN_MAIN_HR_DB_URL",
            Self::HrBackup => "SRIE_MAIN_HR_DB_URL",
            Self::HrStaging => "RASEEN_TEMP_HR_DB_URL",
        }
    }

    /// Database name used when the URL path does not name one
    pub fn default_db_name(&self) -> &'static str {
        match self {
            Self::ExternalStaging => "external_users",
            Self::InternalStaging => "raseen_temp_users",
            Self::InternalPrimary => "raseen_main_users",
            Self::InternalBackup => "srie_main_users",
            Self::HrPrimary => "raseen_main_hr",
            Self::HrBackup => "srie_main_hr",
            Self::HrStaging => "raseen_temp_hr",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExternalStaging => "external-staging",
            Self::InternalStaging => "internal-staging",
            Self::InternalPrimary => "internal-primary",
            Self::InternalBackup => "internal-backup",
            Self::HrPrimary => "hr-primary",
            Self::HrBackup => "hr-backup",
            Self::HrStaging => "hr-staging",
        }
    }

    pub fn scope(&self) -> Scope {
        match self {
            Self::ExternalStaging => Scope::External,
            Self::InternalStaging | Self::InternalPrimary | Self::InternalBackup => Scope::Internal,
            Self::HrPrimary | Self::HrBackup | Self::HrStaging => Scope::Hr,
        }
    }

    /// HR staging is the only role a deployment may leave unconfigured
    pub fn is_required(&self) -> bool {
        !matches!(self, Self::HrStaging)
    }
}

impl fmt::Display for DatabaseRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_env_vars_are_unique() {
        let vars: HashSet<_> = DatabaseRole::ALL.iter().map(|r| r.env_var()).collect();
        assert_eq!(vars.len(), DatabaseRole::ALL.len());
    }

    #[test]
    fn test_scopes() {
        assert_eq!(DatabaseRole::ExternalStaging.scope(), Scope::External);
        assert_eq!(DatabaseRole::InternalBackup.scope(), Scope::Internal);
        assert_eq!(DatabaseRole::HrBackup.scope(), Scope::Hr);
        assert_eq!(Scope::External.prefix(), "external_");
    }

    #[test]
    fn test_only_hr_staging_is_optional() {
        let optional: Vec<_> = DatabaseRole::ALL.iter().filter(|r| !r.is_required()).collect();
        assert_eq!(optional, vec![&DatabaseRole::HrStaging]);
    }
}
