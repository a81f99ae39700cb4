//! Collaborator gateways for side-effecting steps.
//!
//! - [`http`] -- JSON-over-HTTP message and action gateways (reqwest)
//! - [`DisabledGateway`] -- stands in when no gateway URL is configured

pub mod http;

use cadence_core::workflow::action::{
    ActionError, ActionInvoker, ActionRequest, Collaborators, ContactDirectory, DeliveryReceipt,
    MessageSender, OutboundMessage,
};
use cadence_types::config::EngineConfig;
use secrecy::SecretString;
use serde_json::Value;

use self::http::{HttpActionInvoker, HttpMessageSender};

/// Build the collaborator set from configuration.
///
/// A gateway without a URL is replaced by a [`DisabledGateway`].
pub fn collaborators_from_config(
    config: &EngineConfig,
    contacts: impl ContactDirectory + 'static,
) -> Result<Collaborators, reqwest::Error> {
    let gateways = &config.collaborators;
    let token = gateways
        .api_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .map(SecretString::from);
    let timeout = config.action_timeout_secs;

    let mut collaborators =
        Collaborators::new(contacts, DisabledGateway::messages(), DisabledGateway::actions());
    match gateways.message_gateway_url.as_deref() {
        Some(url) if !url.is_empty() => {
            collaborators.messages =
                std::sync::Arc::new(HttpMessageSender::new(url, token.clone(), timeout)?);
        }
        _ => tracing::warn!("no message gateway configured; send_message steps will fail"),
    }
    match gateways.action_gateway_url.as_deref() {
        Some(url) if !url.is_empty() => {
            collaborators.actions =
                std::sync::Arc::new(HttpActionInvoker::new(url, token, timeout)?);
        }
        _ => tracing::debug!("no action gateway configured"),
    }
    Ok(collaborators)
}

/// Refuses every call with a permanent error naming the missing setting.
///
/// Steps that need an unconfigured gateway fail fast instead of retrying.
#[derive(Debug, Clone)]
pub struct DisabledGateway {
    setting: &'static str,
}

impl DisabledGateway {
    pub fn messages() -> Self {
        Self {
            setting: "collaborators.message_gateway_url",
        }
    }

    pub fn actions() -> Self {
        Self {
            setting: "collaborators.action_gateway_url",
        }
    }

    fn refuse(&self) -> ActionError {
        ActionError::Rejected(format!("gateway not configured: set {}", self.setting))
    }
}

impl MessageSender for DisabledGateway {
    async fn send(&self, _message: &OutboundMessage) -> Result<DeliveryReceipt, ActionError> {
        Err(self.refuse())
    }
}

impl ActionInvoker for DisabledGateway {
    async fn invoke(&self, _request: &ActionRequest) -> Result<Value, ActionError> {
        Err(self.refuse())
    }
}

#[cfg(test)]
mod tests {
    use cadence_core::workflow::action::{ActionInvokerDyn, FieldUpdate};
    use cadence_types::contact::{Contact, Organization};
    use uuid::Uuid;

    use super::*;

    struct NoContacts;

    impl ContactDirectory for NoContacts {
        async fn get_contact(
            &self,
            _organization_id: &Uuid,
            _contact_id: &Uuid,
        ) -> Result<Option<Contact>, ActionError> {
            Ok(None)
        }

        async fn get_organization(
            &self,
            _organization_id: &Uuid,
        ) -> Result<Option<Organization>, ActionError> {
            Ok(None)
        }

        async fn update_field(&self, _update: &FieldUpdate) -> Result<(), ActionError> {
            Err(ActionError::ContactNotFound)
        }
    }

    #[tokio::test]
    async fn test_unconfigured_gateways_reject_permanently() {
        let collaborators =
            collaborators_from_config(&EngineConfig::default(), NoContacts).unwrap();
        let request = ActionRequest {
            organization_id: Uuid::now_v7(),
            contact_id: Uuid::now_v7(),
            run_id: Uuid::now_v7(),
            action: "create_task".into(),
            payload: Value::Null,
            idempotency_key: "k".into(),
        };
        let err = collaborators.actions.invoke_boxed(&request).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("action_gateway_url"), "{err}");
    }
}
