use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{FieldKey, SessionId};

/// Sierra CRM import header, in the exact order Sierra expects.
pub const SIERRA_COLUMNS: [&str; 16] = [
    "First Name",
    "Last Name",
    "Full Name",
    "Email",
    "Secondary Email",
    "Phone",
    "Secondary Phone",
    "Lead Source",
    "Assigned Agent",
    "Street Address",
    "City",
    "State",
    "Zip Code",
    "Tags",
    "Short Summary",
    "Add to Import Note",
];

/// One converted contact row. Field declaration order matches
/// [`SIERRA_COLUMNS`], which fixes both the CSV header order and the JSON key
/// order of preview rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SierraRecord {
    #[serde(rename = "First Name")]
    pub first_name: String,
    #[serde(rename = "Last Name")]
    pub last_name: String,
    #[serde(rename = "Full Name")]
    pub full_name: String,
    #[serde(rename = "Email")]
    pub email: String,
    #[serde(rename = "Secondary Email")]
    pub secondary_email: String,
    #[serde(rename = "Phone")]
    pub phone: String,
    #[serde(rename = "Secondary Phone")]
    pub secondary_phone: String,
    #[serde(rename = "Lead Source")]
    pub lead_source: String,
    #[serde(rename = "Assigned Agent")]
    pub assigned_agent: String,
    #[serde(rename = "Street Address")]
    pub street_address: String,
    #[serde(rename = "City")]
    pub city: String,
    #[serde(rename = "State")]
    pub state: String,
    #[serde(rename = "Zip Code")]
    pub zip_code: String,
    #[serde(rename = "Tags")]
    pub tags: String,
    #[serde(rename = "Short Summary")]
    pub short_summary: String,
    #[serde(rename = "Add to Import Note")]
    pub add_to_import_note: String,
}

/// User-confirmed association between target fields and source CSV columns.
/// Serializes as a flat JSON object, e.g. `{"first_name": "First Name"}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnMapping(pub BTreeMap<FieldKey, String>);

impl ColumnMapping {
    /// Every field key paired with its stock FUB column name.
    pub fn stock() -> Self {
        Self(
            FieldKey::ALL
                .iter()
                .map(|key| (*key, key.default_source_column().to_string()))
                .collect(),
        )
    }

    pub fn source_column(&self, key: FieldKey) -> Option<&str> {
        self.0.get(&key).map(String::as_str)
    }

    pub fn insert(&mut self, key: FieldKey, source_column: impl Into<String>) {
        self.0.insert(key, source_column.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// One downloadable conversion artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertedFile {
    pub filename: String,
    /// Server-side artifact name (`{session_id}_{filename}`), used as the
    /// download path segment.
    pub path: String,
    pub rows: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectColumnsResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DetectColumnsResponse {
    pub fn ok(columns: Vec<String>) -> Self {
        Self {
            success: true,
            columns: Some(columns),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            columns: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preview: Vec<SierraRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_rows: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<ConvertedFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ConvertResponse {
    pub fn failure(error: impl Into<String>, details: Option<String>) -> Self {
        Self {
            success: false,
            session_id: None,
            logs: Vec::new(),
            preview: Vec::new(),
            preview_note: None,
            total_rows: None,
            files: Vec::new(),
            error: Some(error.into()),
            details,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyPaymentResponse {
    pub payment_completed: bool,
    pub has_files: bool,
    #[serde(default)]
    pub files: Vec<ConvertedFile>,
}

impl VerifyPaymentResponse {
    pub fn inactive() -> Self {
        Self {
            payment_completed: false,
            has_files: false,
            files: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    pub success: bool,
}

impl AckResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}
