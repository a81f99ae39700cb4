//! Collaborator seams for side-effecting steps.
//!
//! The engine never talks to a mail server, an SMS gateway or the CRM store
//! directly. Each side effect goes through one narrow trait:
//!
//! - [`ContactDirectory`]: read contacts/organizations, update one field
//! - [`MessageSender`]: deliver a rendered message
//! - [`ActionInvoker`]: call a named external action with a JSON payload
//!
//! Every request carries the idempotency key of the step attempt that made
//! it, so collaborators can de-duplicate repeated deliveries.
//!
//! The traits use native async fn (RPITIT). Each has an object-safe `*Dyn`
//! twin with boxed futures and a blanket impl, so [`Collaborators`] can hold
//! them as `Arc<dyn ...>` and pick implementations at runtime.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use cadence_types::contact::{Contact, Organization};
use cadence_types::workflow::MessageChannel;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Typed failure reported by a collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    /// The call did not finish within its deadline.
    #[error("collaborator call timed out after {0}s")]
    Timeout(u64),

    /// Transient outage: connection refused, 5xx, throttling.
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    /// The collaborator understood the request and refused it.
    #[error("collaborator rejected the request: {0}")]
    Rejected(String),

    #[error("contact not found")]
    ContactNotFound,

    #[error("invalid field: {0}")]
    InvalidField(String),
}

impl ActionError {
    /// Whether a later attempt of the same step may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ActionError::Timeout(_) | ActionError::Unavailable(_))
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// A fully rendered message ready for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub organization_id: Uuid,
    pub contact_id: Uuid,
    pub run_id: Uuid,
    pub channel: MessageChannel,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub body: String,
    pub idempotency_key: String,
}

/// Provider acknowledgement of a delivered message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,
}

/// A single contact field write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldUpdate {
    pub organization_id: Uuid,
    pub contact_id: Uuid,
    pub field: String,
    pub value: String,
    pub idempotency_key: String,
}

/// A named external action with its resolved payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub organization_id: Uuid,
    pub contact_id: Uuid,
    pub run_id: Uuid,
    pub action: String,
    pub payload: Value,
    pub idempotency_key: String,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Read access to the CRM store plus single-field updates.
pub trait ContactDirectory: Send + Sync {
    fn get_contact(
        &self,
        organization_id: &Uuid,
        contact_id: &Uuid,
    ) -> impl Future<Output = Result<Option<Contact>, ActionError>> + Send;

    fn get_organization(
        &self,
        organization_id: &Uuid,
    ) -> impl Future<Output = Result<Option<Organization>, ActionError>> + Send;

    fn update_field(
        &self,
        update: &FieldUpdate,
    ) -> impl Future<Output = Result<(), ActionError>> + Send;
}

pub trait MessageSender: Send + Sync {
    fn send(
        &self,
        message: &OutboundMessage,
    ) -> impl Future<Output = Result<DeliveryReceipt, ActionError>> + Send;
}

pub trait ActionInvoker: Send + Sync {
    /// Invoke the action; the returned JSON is recorded on the step log.
    fn invoke(
        &self,
        request: &ActionRequest,
    ) -> impl Future<Output = Result<Value, ActionError>> + Send;
}

// ---------------------------------------------------------------------------
// Object-safe twins
// ---------------------------------------------------------------------------

type BoxFut<'a, T> = Pin<Box<dyn Future<Output = Result<T, ActionError>> + Send + 'a>>;

pub trait ContactDirectoryDyn: Send + Sync {
    fn get_contact_boxed<'a>(
        &'a self,
        organization_id: &'a Uuid,
        contact_id: &'a Uuid,
    ) -> BoxFut<'a, Option<Contact>>;

    fn get_organization_boxed<'a>(
        &'a self,
        organization_id: &'a Uuid,
    ) -> BoxFut<'a, Option<Organization>>;

    fn update_field_boxed<'a>(&'a self, update: &'a FieldUpdate) -> BoxFut<'a, ()>;
}

impl<T: ContactDirectory> ContactDirectoryDyn for T {
    fn get_contact_boxed<'a>(
        &'a self,
        organization_id: &'a Uuid,
        contact_id: &'a Uuid,
    ) -> BoxFut<'a, Option<Contact>> {
        Box::pin(self.get_contact(organization_id, contact_id))
    }

    fn get_organization_boxed<'a>(
        &'a self,
        organization_id: &'a Uuid,
    ) -> BoxFut<'a, Option<Organization>> {
        Box::pin(self.get_organization(organization_id))
    }

    fn update_field_boxed<'a>(&'a self, update: &'a FieldUpdate) -> BoxFut<'a, ()> {
        Box::pin(self.update_field(update))
    }
}

pub trait MessageSenderDyn: Send + Sync {
    fn send_boxed<'a>(&'a self, message: &'a OutboundMessage) -> BoxFut<'a, DeliveryReceipt>;
}

impl<T: MessageSender> MessageSenderDyn for T {
    fn send_boxed<'a>(&'a self, message: &'a OutboundMessage) -> BoxFut<'a, DeliveryReceipt> {
        Box::pin(self.send(message))
    }
}

pub trait ActionInvokerDyn: Send + Sync {
    fn invoke_boxed<'a>(&'a self, request: &'a ActionRequest) -> BoxFut<'a, Value>;
}

impl<T: ActionInvoker> ActionInvokerDyn for T {
    fn invoke_boxed<'a>(&'a self, request: &'a ActionRequest) -> BoxFut<'a, Value> {
        Box::pin(self.invoke(request))
    }
}

/// The collaborator set a step executor calls into.
#[derive(Clone)]
pub struct Collaborators {
    pub contacts: Arc<dyn ContactDirectoryDyn>,
    pub messages: Arc<dyn MessageSenderDyn>,
    pub actions: Arc<dyn ActionInvokerDyn>,
}

impl Collaborators {
    pub fn new(
        contacts: impl ContactDirectory + 'static,
        messages: impl MessageSender + 'static,
        actions: impl ActionInvoker + 'static,
    ) -> Self {
        Self {
            contacts: Arc::new(contacts),
            messages: Arc::new(messages),
            actions: Arc::new(actions),
        }
    }
}
