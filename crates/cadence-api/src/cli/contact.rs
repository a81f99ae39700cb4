//! `cadence contacts import`: load CRM records from a JSON file.
//!
//! ```json
//! {
//!   "organizations": [{ "id": "...", "name": "Acme" }],
//!   "contacts": [{ "id": "...", "organization_id": "...", "first_name": "Ada", ... }]
//! }
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use console::style;
use serde::Deserialize;

use cadence_types::contact::{Contact, Organization};

use crate::state::AppState;

#[derive(Subcommand)]
pub enum ContactCommand {
    /// Insert or update contacts and organizations from a JSON file.
    Import {
        file: PathBuf,
    },
}

#[derive(Debug, Default, Deserialize)]
struct ImportFile {
    #[serde(default)]
    organizations: Vec<Organization>,
    #[serde(default)]
    contacts: Vec<Contact>,
}

pub async fn handle_contact_command(
    cmd: ContactCommand,
    state: &AppState,
    json: bool,
) -> Result<()> {
    match cmd {
        ContactCommand::Import { file } => {
            let raw = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let import: ImportFile =
                serde_json::from_str(&raw).context("Invalid import file")?;

            for org in &import.organizations {
                state.contacts.upsert_organization(org).await?;
            }
            for contact in &import.contacts {
                state.contacts.upsert_contact(contact).await?;
            }

            if json {
                let out = serde_json::json!({
                    "organizations": import.organizations.len(),
                    "contacts": import.contacts.len(),
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!(
                    "  {} Imported {} organization(s) and {} contact(s)",
                    style("*").green().bold(),
                    import.organizations.len(),
                    import.contacts.len()
                );
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_file_sections_are_optional() {
        let only_orgs: ImportFile = serde_json::from_str(
            r#"{"organizations":[{"id":"0190c5a4-0000-7000-8000-000000000001","name":"Acme"}]}"#,
        )
        .unwrap();
        assert_eq!(only_orgs.organizations.len(), 1);
        assert!(only_orgs.contacts.is_empty());
    }
}
