use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Server-side identity of one upload/convert/payment session. Minted per
/// upload; artifact names on disk are prefixed with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Target fields a FUB export column can be mapped onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKey {
    FirstName,
    LastName,
    Email,
    SecondaryEmail,
    Phone,
    SecondaryPhone,
    Source,
    AssignedTo,
    Street,
    City,
    State,
    Zip,
    Tags,
    Notes,
    SearchCriteria,
}

impl FieldKey {
    pub const ALL: [FieldKey; 15] = [
        FieldKey::FirstName,
        FieldKey::LastName,
        FieldKey::Email,
        FieldKey::SecondaryEmail,
        FieldKey::Phone,
        FieldKey::SecondaryPhone,
        FieldKey::Source,
        FieldKey::AssignedTo,
        FieldKey::Street,
        FieldKey::City,
        FieldKey::State,
        FieldKey::Zip,
        FieldKey::Tags,
        FieldKey::Notes,
        FieldKey::SearchCriteria,
    ];

    /// Column name this field carries in a stock FUB export.
    pub fn default_source_column(self) -> &'static str {
        match self {
            FieldKey::FirstName => "First Name",
            FieldKey::LastName => "Last Name",
            FieldKey::Email => "Email",
            FieldKey::SecondaryEmail => "Secondary Email",
            FieldKey::Phone => "Phone",
            FieldKey::SecondaryPhone => "Secondary Phone",
            FieldKey::Source => "Source",
            FieldKey::AssignedTo => "Assigned To",
            FieldKey::Street => "Street",
            FieldKey::City => "City",
            FieldKey::State => "State",
            FieldKey::Zip => "Zip",
            FieldKey::Tags => "Tags",
            FieldKey::Notes => "Notes",
            FieldKey::SearchCriteria => "Search Criteria",
        }
    }

    pub fn category(self) -> MappingCategory {
        match self {
            FieldKey::FirstName
            | FieldKey::LastName
            | FieldKey::Email
            | FieldKey::SecondaryEmail
            | FieldKey::Phone
            | FieldKey::SecondaryPhone
            | FieldKey::Source
            | FieldKey::AssignedTo => MappingCategory::Contact,
            FieldKey::Street | FieldKey::City | FieldKey::State | FieldKey::Zip => {
                MappingCategory::Location
            }
            FieldKey::Tags | FieldKey::Notes | FieldKey::SearchCriteria => MappingCategory::Notes,
        }
    }
}

/// Display grouping for mapping rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingCategory {
    Contact,
    Location,
    Notes,
}
