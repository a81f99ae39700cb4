//! Fixtures and in-memory collaborators shared by the workflow tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use cadence_types::contact::{Contact, Organization};
use cadence_types::workflow::{
    MessageChannel, RunStatus, StepConfig, StepDefinition, TriggerConfig, WorkflowDefinition,
    WorkflowRun,
};

use super::action::{
    ActionError, ActionInvoker, ActionRequest, ContactDirectory, DeliveryReceipt, FieldUpdate,
    MessageSender, OutboundMessage,
};

pub fn step(id: &str, config: StepConfig, next: Option<&str>) -> StepDefinition {
    StepDefinition {
        id: id.to_string(),
        name: None,
        config,
        next: next.map(str::to_string),
        branches: BTreeMap::new(),
        default_next: None,
        retry: None,
        timeout_secs: None,
    }
}

/// An active workflow named "Onboarding" with the given steps; the first one
/// is the entry.
pub fn workflow_of(organization_id: Uuid, steps: Vec<StepDefinition>) -> WorkflowDefinition {
    WorkflowDefinition {
        id: Uuid::now_v7(),
        organization_id,
        name: "Onboarding".to_string(),
        description: None,
        active: true,
        entry_step_id: steps.first().map(|s| s.id.clone()).unwrap_or_default(),
        triggers: vec![TriggerConfig::TagAdded {
            tag: "vip".to_string(),
            when: None,
        }],
        steps,
        metadata: None,
    }
}

/// greet (email) -> mark (field update) -> done (end).
pub fn linear_workflow(organization_id: Uuid) -> WorkflowDefinition {
    workflow_of(
        organization_id,
        vec![
            step(
                "greet",
                StepConfig::SendMessage {
                    channel: MessageChannel::Email,
                    subject: Some("Welcome {{ contact.first_name }}".into()),
                    body: "Hi {{ contact.first_name | \"there\" }}!".into(),
                    to: None,
                },
                Some("mark"),
            ),
            step(
                "mark",
                StepConfig::MutateContactField {
                    field: "status".into(),
                    value: "welcomed".into(),
                },
                Some("done"),
            ),
            step("done", StepConfig::End, None),
        ],
    )
}

/// A running run of [`linear_workflow`] that has not touched storage.
pub fn run_for(organization_id: Uuid, contact_id: Uuid) -> WorkflowRun {
    let snapshot = linear_workflow(organization_id);
    WorkflowRun {
        id: Uuid::now_v7(),
        workflow_id: snapshot.id,
        workflow_name: snapshot.name.clone(),
        organization_id,
        contact_id,
        status: RunStatus::Running,
        current_step_id: snapshot.entry_step_id.clone(),
        trigger_type: "manual".to_string(),
        trigger_key: None,
        trigger_payload: None,
        snapshot,
        error: None,
        started_at: Utc::now(),
        ended_at: None,
    }
}

pub fn sample_contact(organization_id: Uuid) -> Contact {
    let mut custom_fields = serde_json::Map::new();
    custom_fields.insert("plan".to_string(), json!("pro"));
    Contact {
        id: Uuid::now_v7(),
        organization_id,
        first_name: Some("Ada".to_string()),
        last_name: Some("Lovelace".to_string()),
        email: Some("ada@example.com".to_string()),
        phone: None,
        company: None,
        tags: vec!["lead".to_string()],
        pipeline: None,
        stage: None,
        custom_fields,
        updated_at: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// Fake collaborators
// ---------------------------------------------------------------------------

/// Contacts held in memory. Knows no organizations.
#[derive(Clone, Default)]
pub struct FakeContacts {
    contacts: Arc<Mutex<HashMap<Uuid, Contact>>>,
}

impl FakeContacts {
    pub fn with(contact: Contact) -> Self {
        let fake = Self::default();
        fake.insert(contact);
        fake
    }

    pub fn insert(&self, contact: Contact) {
        self.contacts.lock().unwrap().insert(contact.id, contact);
    }

    pub fn get(&self, contact_id: Uuid) -> Option<Contact> {
        self.contacts.lock().unwrap().get(&contact_id).cloned()
    }

    pub fn add_tag(&self, contact_id: Uuid, tag: &str) {
        if let Some(c) = self.contacts.lock().unwrap().get_mut(&contact_id) {
            c.tags.push(tag.to_string());
        }
    }
}

impl ContactDirectory for FakeContacts {
    async fn get_contact(
        &self,
        organization_id: &Uuid,
        contact_id: &Uuid,
    ) -> Result<Option<Contact>, ActionError> {
        Ok(self
            .get(*contact_id)
            .filter(|c| c.organization_id == *organization_id))
    }

    async fn get_organization(
        &self,
        _organization_id: &Uuid,
    ) -> Result<Option<Organization>, ActionError> {
        Ok(None)
    }

    async fn update_field(&self, update: &FieldUpdate) -> Result<(), ActionError> {
        let mut contacts = self.contacts.lock().unwrap();
        let contact = contacts
            .get_mut(&update.contact_id)
            .ok_or(ActionError::ContactNotFound)?;
        let value = update.value.clone();
        match update.field.as_str() {
            "first_name" => contact.first_name = Some(value),
            "last_name" => contact.last_name = Some(value),
            "email" => contact.email = Some(value),
            "phone" => contact.phone = Some(value),
            "company" => contact.company = Some(value),
            "pipeline" => contact.pipeline = Some(value),
            "stage" => contact.stage = Some(value),
            custom => {
                contact
                    .custom_fields
                    .insert(custom.to_string(), Value::String(value));
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct MessageState {
    sent: Vec<OutboundMessage>,
    hang: u32,
}

/// Records delivered messages; can be told to hang on the next calls.
#[derive(Clone, Default)]
pub struct FakeMessages {
    state: Arc<Mutex<MessageState>>,
}

impl FakeMessages {
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.state.lock().unwrap().sent.clone()
    }

    /// The next `n` sends never answer within any sane timeout.
    pub fn hang_next(&self, n: u32) {
        self.state.lock().unwrap().hang = n;
    }
}

impl MessageSender for FakeMessages {
    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, ActionError> {
        let hang = {
            let mut state = self.state.lock().unwrap();
            if state.hang > 0 {
                state.hang -= 1;
                true
            } else {
                state.sent.push(message.clone());
                false
            }
        };
        if hang {
            tokio::time::sleep(StdDuration::from_secs(30)).await;
            return Err(ActionError::Unavailable("hung".into()));
        }
        Ok(DeliveryReceipt {
            provider_message_id: Some(format!("msg-{}", message.idempotency_key)),
        })
    }
}

#[derive(Default)]
struct ActionState {
    calls: Vec<ActionRequest>,
    reject: bool,
}

#[derive(Clone, Default)]
pub struct FakeActions {
    state: Arc<Mutex<ActionState>>,
}

impl FakeActions {
    pub fn calls(&self) -> Vec<ActionRequest> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn reject_all(&self) {
        self.state.lock().unwrap().reject = true;
    }
}

impl ActionInvoker for FakeActions {
    async fn invoke(&self, request: &ActionRequest) -> Result<Value, ActionError> {
        let mut state = self.state.lock().unwrap();
        if state.reject {
            return Err(ActionError::Rejected(format!("{} not allowed", request.action)));
        }
        state.calls.push(request.clone());
        Ok(json!({ "ok": true, "action": request.action }))
    }
}
