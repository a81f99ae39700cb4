//! SQLite-backed contact directory.
//!
//! Implements the engine's `ContactDirectory` seam over the `contacts` and
//! `organizations` tables, plus the upserts the CLI import and the REST
//! server use to load CRM records. Tags and custom fields are JSON columns.

use cadence_core::workflow::action::{ActionError, ContactDirectory, FieldUpdate};
use cadence_types::contact::{Contact, Organization};
use cadence_types::error::RepositoryError;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::workflow::format_datetime;

/// Fields a mutation may never touch.
const PROTECTED_FIELDS: &[&str] = &["id", "organization_id", "tags", "custom_fields", "updated_at"];

#[derive(Clone)]
pub struct SqliteContactDirectory {
    pool: DatabasePool,
}

impl SqliteContactDirectory {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Insert or replace a contact.
    pub async fn upsert_contact(&self, contact: &Contact) -> Result<(), RepositoryError> {
        let tags = serde_json::to_string(&contact.tags)
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        let custom = serde_json::to_string(&contact.custom_fields)
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO contacts
               (id, organization_id, first_name, last_name, email, phone, company, tags,
                pipeline, stage, custom_fields, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 organization_id = excluded.organization_id,
                 first_name = excluded.first_name,
                 last_name = excluded.last_name,
                 email = excluded.email,
                 phone = excluded.phone,
                 company = excluded.company,
                 tags = excluded.tags,
                 pipeline = excluded.pipeline,
                 stage = excluded.stage,
                 custom_fields = excluded.custom_fields,
                 updated_at = excluded.updated_at"#,
        )
        .bind(contact.id.to_string())
        .bind(contact.organization_id.to_string())
        .bind(&contact.first_name)
        .bind(&contact.last_name)
        .bind(&contact.email)
        .bind(&contact.phone)
        .bind(&contact.company)
        .bind(&tags)
        .bind(&contact.pipeline)
        .bind(&contact.stage)
        .bind(&custom)
        .bind(format_datetime(&contact.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(())
    }

    pub async fn upsert_organization(&self, org: &Organization) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO organizations (id, name, timezone, email, phone, website)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 timezone = excluded.timezone,
                 email = excluded.email,
                 phone = excluded.phone,
                 website = excluded.website"#,
        )
        .bind(org.id.to_string())
        .bind(&org.name)
        .bind(&org.timezone)
        .bind(&org.email)
        .bind(&org.phone)
        .bind(&org.website)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(())
    }

    /// Every contact of an organization; schedule ticks fan out over these.
    pub async fn list_contact_ids(&self, organization_id: &Uuid) -> Result<Vec<Uuid>, RepositoryError> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM contacts WHERE organization_id = ? ORDER BY id")
                .bind(organization_id.to_string())
                .fetch_all(&self.pool.reader)
                .await
                .map_err(|e| RepositoryError::Query(e.to_string()))?;

        ids.iter()
            .map(|id| {
                id.parse::<Uuid>()
                    .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn unavailable(e: impl std::fmt::Display) -> ActionError {
    ActionError::Unavailable(format!("contact store: {e}"))
}

fn contact_from_row(row: &SqliteRow) -> Result<Contact, ActionError> {
    let id: String = row.try_get("id").map_err(unavailable)?;
    let organization_id: String = row.try_get("organization_id").map_err(unavailable)?;
    let tags: String = row.try_get("tags").map_err(unavailable)?;
    let custom: String = row.try_get("custom_fields").map_err(unavailable)?;
    let updated_at: String = row.try_get("updated_at").map_err(unavailable)?;

    Ok(Contact {
        id: id.parse().map_err(unavailable)?,
        organization_id: organization_id.parse().map_err(unavailable)?,
        first_name: row.try_get("first_name").map_err(unavailable)?,
        last_name: row.try_get("last_name").map_err(unavailable)?,
        email: row.try_get("email").map_err(unavailable)?,
        phone: row.try_get("phone").map_err(unavailable)?,
        company: row.try_get("company").map_err(unavailable)?,
        tags: serde_json::from_str(&tags).map_err(unavailable)?,
        pipeline: row.try_get("pipeline").map_err(unavailable)?,
        stage: row.try_get("stage").map_err(unavailable)?,
        custom_fields: serde_json::from_str(&custom).map_err(unavailable)?,
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(unavailable)?,
    })
}

fn valid_custom_field(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

// ---------------------------------------------------------------------------
// ContactDirectory impl
// ---------------------------------------------------------------------------

impl ContactDirectory for SqliteContactDirectory {
    async fn get_contact(
        &self,
        organization_id: &Uuid,
        contact_id: &Uuid,
    ) -> Result<Option<Contact>, ActionError> {
        let row = sqlx::query("SELECT * FROM contacts WHERE id = ? AND organization_id = ?")
            .bind(contact_id.to_string())
            .bind(organization_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(unavailable)?;
        row.as_ref().map(contact_from_row).transpose()
    }

    async fn get_organization(
        &self,
        organization_id: &Uuid,
    ) -> Result<Option<Organization>, ActionError> {
        let row = sqlx::query("SELECT * FROM organizations WHERE id = ?")
            .bind(organization_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(unavailable)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let id: String = row.try_get("id").map_err(unavailable)?;
        Ok(Some(Organization {
            id: id.parse().map_err(unavailable)?,
            name: row.try_get("name").map_err(unavailable)?,
            timezone: row.try_get("timezone").map_err(unavailable)?,
            email: row.try_get("email").map_err(unavailable)?,
            phone: row.try_get("phone").map_err(unavailable)?,
            website: row.try_get("website").map_err(unavailable)?,
        }))
    }

    /// Standard fields map to their column; anything else is a custom field.
    /// Writing the same value twice is harmless, so redelivery is safe.
    async fn update_field(&self, update: &FieldUpdate) -> Result<(), ActionError> {
        let field = update.field.as_str();
        if PROTECTED_FIELDS.contains(&field) {
            return Err(ActionError::InvalidField(field.to_string()));
        }
        let now = format_datetime(&Utc::now());
        let contact_id = update.contact_id.to_string();
        let org_id = update.organization_id.to_string();

        let mut tx = self.pool.writer.begin().await.map_err(unavailable)?;

        let affected = if Contact::STANDARD_FIELDS.contains(&field) {
            // Column name comes from the fixed list above, never from input.
            let sql = format!(
                "UPDATE contacts SET {field} = ?, updated_at = ? WHERE id = ? AND organization_id = ?"
            );
            sqlx::query(&sql)
                .bind(&update.value)
                .bind(&now)
                .bind(&contact_id)
                .bind(&org_id)
                .execute(&mut *tx)
                .await
                .map_err(unavailable)?
                .rows_affected()
        } else {
            if !valid_custom_field(field) {
                return Err(ActionError::InvalidField(field.to_string()));
            }
            let current: Option<String> = sqlx::query_scalar(
                "SELECT custom_fields FROM contacts WHERE id = ? AND organization_id = ?",
            )
            .bind(&contact_id)
            .bind(&org_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(unavailable)?;
            let Some(current) = current else {
                return Err(ActionError::ContactNotFound);
            };

            let mut custom: serde_json::Map<String, serde_json::Value> =
                serde_json::from_str(&current).map_err(unavailable)?;
            custom.insert(
                field.to_string(),
                serde_json::Value::String(update.value.clone()),
            );
            let custom = serde_json::to_string(&custom).map_err(unavailable)?;

            sqlx::query("UPDATE contacts SET custom_fields = ?, updated_at = ? WHERE id = ?")
                .bind(&custom)
                .bind(&now)
                .bind(&contact_id)
                .execute(&mut *tx)
                .await
                .map_err(unavailable)?
                .rows_affected()
        };

        if affected == 0 {
            return Err(ActionError::ContactNotFound);
        }
        tx.commit().await.map_err(unavailable)?;

        tracing::debug!(
            contact_id = %update.contact_id,
            field = %update.field,
            key = %update.idempotency_key,
            "contact field updated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::sqlite::pool::tests::test_pool;

    fn contact(org: Uuid) -> Contact {
        let mut custom_fields = serde_json::Map::new();
        custom_fields.insert("plan".into(), json!("starter"));
        Contact {
            id: Uuid::now_v7(),
            organization_id: org,
            first_name: Some("Katherine".into()),
            last_name: Some("Johnson".into()),
            email: Some("kj@example.com".into()),
            phone: None,
            company: Some("NACA".into()),
            tags: vec!["lead".into()],
            pipeline: Some("Sales".into()),
            stage: Some("Qualified".into()),
            custom_fields,
            updated_at: Utc::now(),
        }
    }

    fn update(c: &Contact, field: &str, value: &str) -> FieldUpdate {
        FieldUpdate {
            organization_id: c.organization_id,
            contact_id: c.id,
            field: field.into(),
            value: value.into(),
            idempotency_key: "k-1".into(),
        }
    }

    #[tokio::test]
    async fn test_contact_roundtrip_is_tenant_scoped() {
        let dir = SqliteContactDirectory::new(test_pool().await);
        let org = Uuid::now_v7();
        let c = contact(org);
        dir.upsert_contact(&c).await.unwrap();

        let loaded = dir.get_contact(&org, &c.id).await.unwrap().unwrap();
        assert_eq!(loaded.tags, c.tags);
        assert_eq!(loaded.custom_fields["plan"], json!("starter"));
        assert!(dir.get_contact(&Uuid::now_v7(), &c.id).await.unwrap().is_none());

        assert_eq!(dir.list_contact_ids(&org).await.unwrap(), vec![c.id]);
    }

    #[tokio::test]
    async fn test_update_standard_and_custom_fields() {
        let dir = SqliteContactDirectory::new(test_pool().await);
        let c = contact(Uuid::now_v7());
        dir.upsert_contact(&c).await.unwrap();

        dir.update_field(&update(&c, "stage", "Won")).await.unwrap();
        dir.update_field(&update(&c, "plan", "pro")).await.unwrap();
        // Redelivery of the same update changes nothing.
        dir.update_field(&update(&c, "plan", "pro")).await.unwrap();

        let loaded = dir.get_contact(&c.organization_id, &c.id).await.unwrap().unwrap();
        assert_eq!(loaded.stage.as_deref(), Some("Won"));
        assert_eq!(loaded.custom_fields["plan"], json!("pro"));
    }

    #[tokio::test]
    async fn test_update_rejects_bad_fields_and_unknown_contacts() {
        let dir = SqliteContactDirectory::new(test_pool().await);
        let c = contact(Uuid::now_v7());
        dir.upsert_contact(&c).await.unwrap();

        let err = dir.update_field(&update(&c, "organization_id", "x")).await.unwrap_err();
        assert!(matches!(err, ActionError::InvalidField(_)));
        let err = dir.update_field(&update(&c, "a = 1; --", "x")).await.unwrap_err();
        assert!(matches!(err, ActionError::InvalidField(_)));
        assert!(!err.is_retryable());

        let ghost = contact(c.organization_id);
        let err = dir.update_field(&update(&ghost, "email", "x")).await.unwrap_err();
        assert_eq!(err, ActionError::ContactNotFound);
    }

    #[tokio::test]
    async fn test_organization_lookup() {
        let dir = SqliteContactDirectory::new(test_pool().await);
        let org = Organization {
            id: Uuid::now_v7(),
            name: "Langley".into(),
            timezone: Some("America/New_York".into()),
            email: None,
            phone: None,
            website: Some("https://example.org".into()),
        };
        dir.upsert_organization(&org).await.unwrap();
        assert_eq!(dir.get_organization(&org.id).await.unwrap(), Some(org));
        assert!(dir.get_organization(&Uuid::now_v7()).await.unwrap().is_none());
    }
}
