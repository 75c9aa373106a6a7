//! HR-domain classifier
//!
//! Conservative by construction: only explicit markers count. A payload is
//! HR when it says so (`is_hr: true`), when it carries a recruiter-style
//! email field, or when the operation context names an HR keyword. Anything
//! uncertain is not HR.

use bson::{Bson, Document};

use crate::db::schemas::IS_HR_FIELD;

const DEFAULT_MARKER_FIELDS: [&str; 4] = [
    "recruiter_email",
    "hr_email",
    "hiring_manager_email",
    "recruiter_contact",
];

const DEFAULT_KEYWORDS: [&str; 6] = ["hr", "recruiter", "recruiting", "recruitment", "hiring", "talent"];

#[derive(Debug, Clone)]
pub struct HrClassifier {
    marker_fields: Vec<String>,
    keywords: Vec<String>,
}

impl Default for HrClassifier {
    fn default() -> Self {
        Self {
            marker_fields: DEFAULT_MARKER_FIELDS.iter().map(|s| s.to_string()).collect(),
            keywords: DEFAULT_KEYWORDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl HrClassifier {
    pub fn new(marker_fields: Vec<String>, keywords: Vec<String>) -> Self {
        Self {
            marker_fields,
            keywords: keywords.into_iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    pub fn classify(&self, payload: &Document, context: &str) -> bool {
        self.payload_is_hr(payload) || self.context_is_hr(context)
    }

    fn payload_is_hr(&self, payload: &Document) -> bool {
        if matches!(payload.get(IS_HR_FIELD), Some(Bson::Boolean(true))) {
            return true;
        }

        payload.iter().any(|(key, value)| {
            let marked = self.marker_fields.iter().any(|f| f == key) || key.contains("recruiter");
            marked && matches!(value, Bson::String(s) if is_email_shaped(s))
        })
    }

    /// Keywords match whole tokens only, so "three" or "chrome" never count
    fn context_is_hr(&self, context: &str) -> bool {
        context
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
            .any(|token| {
                let token = token.to_lowercase();
                self.keywords.iter().any(|k| *k == token)
            })
    }
}

fn is_email_shaped(value: &str) -> bool {
    let value = value.trim();
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !value.contains(char::is_whitespace)
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains('@')
}
