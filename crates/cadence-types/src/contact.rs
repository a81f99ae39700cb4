//! Contact and organization records as seen by the engine.
//!
//! The CRM store owns these records; the engine reads them to build merge
//! contexts and writes single fields back through the contact directory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A CRM contact, the subject of a workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: Uuid,
    pub organization_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Pipeline the contact currently sits in, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<String>,
    /// Stage within `pipeline`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default)]
    pub custom_fields: serde_json::Map<String, serde_json::Value>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    /// First and last name joined, skipping missing parts.
    pub fn full_name(&self) -> String {
        [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Names of the standard (non-custom) fields a mutation may target.
    pub const STANDARD_FIELDS: &'static [&'static str] = &[
        "first_name",
        "last_name",
        "email",
        "phone",
        "company",
        "pipeline",
        "stage",
    ];
}

/// The tenant that owns workflows and contacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact() -> Contact {
        Contact {
            id: Uuid::now_v7(),
            organization_id: Uuid::now_v7(),
            first_name: Some("Ada".to_string()),
            last_name: Some("Lovelace".to_string()),
            email: None,
            phone: None,
            company: None,
            tags: vec![],
            pipeline: None,
            stage: None,
            custom_fields: serde_json::Map::new(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_full_name_joins_parts() {
        assert_eq!(contact().full_name(), "Ada Lovelace");
    }

    #[test]
    fn test_full_name_with_missing_parts() {
        let mut c = contact();
        c.last_name = None;
        assert_eq!(c.full_name(), "Ada");
        c.first_name = None;
        assert_eq!(c.full_name(), "");
    }

    #[test]
    fn test_contact_deserialize_minimal() {
        let json = serde_json::json!({
            "id": Uuid::now_v7(),
            "organization_id": Uuid::now_v7(),
            "updated_at": Utc::now(),
        });
        let c: Contact = serde_json::from_value(json).unwrap();
        assert!(c.tags.is_empty());
        assert!(c.custom_fields.is_empty());
    }
}
