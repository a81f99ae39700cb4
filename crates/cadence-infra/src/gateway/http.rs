//! HTTP gateways for message delivery and external actions.
//!
//! Both POST JSON to a configured base URL and forward the step attempt's
//! idempotency key in an `Idempotency-Key` header, so the receiving side can
//! drop redelivered requests:
//!
//! - `HttpMessageSender`: `POST {base}` with the rendered [`OutboundMessage`]
//! - `HttpActionInvoker`: `POST {base}/{action}` with the [`ActionRequest`]
//!
//! Connection failures, timeouts, 408, 429 and 5xx are retryable
//! (`Unavailable`/`Timeout`); any other non-success status is `Rejected`.

use std::time::Duration;

use cadence_core::workflow::action::{
    ActionError, ActionInvoker, ActionRequest, DeliveryReceipt, MessageSender, OutboundMessage,
};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;

/// Header carrying the per-attempt idempotency key.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Shared JSON POST client.
#[derive(Clone)]
struct GatewayClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<SecretString>,
    timeout_secs: u64,
}

impl GatewayClient {
    fn new(
        base_url: &str,
        token: Option<SecretString>,
        timeout_secs: u64,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            timeout_secs,
        })
    }

    async fn post<B: Serialize>(
        &self,
        url: &str,
        idempotency_key: &str,
        body: &B,
    ) -> Result<Value, ActionError> {
        let mut request = self
            .client
            .post(url)
            .header(IDEMPOTENCY_HEADER, idempotency_key)
            .json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ActionError::Timeout(self.timeout_secs)
            } else {
                ActionError::Unavailable(format!("HTTP request failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(%url, %status, "gateway refused request");
            return Err(classify(status, &body));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ActionError::Unavailable(format!("failed to read response: {e}")))?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        // Non-JSON acknowledgements are kept as text.
        Ok(serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned())))
    }
}

/// Map a non-success status to a typed failure.
pub fn classify(status: StatusCode, body: &str) -> ActionError {
    let detail = if body.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {body}")
    };
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        ActionError::Unavailable(detail)
    } else {
        ActionError::Rejected(detail)
    }
}

// ---------------------------------------------------------------------------
// Message sender
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct HttpMessageSender {
    inner: GatewayClient,
}

impl HttpMessageSender {
    pub fn new(
        base_url: &str,
        token: Option<SecretString>,
        timeout_secs: u64,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            inner: GatewayClient::new(base_url, token, timeout_secs)?,
        })
    }
}

impl MessageSender for HttpMessageSender {
    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, ActionError> {
        let reply = self
            .inner
            .post(&self.inner.base_url, &message.idempotency_key, message)
            .await?;
        let provider_message_id = reply
            .get("id")
            .or_else(|| reply.get("message_id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(DeliveryReceipt {
            provider_message_id,
        })
    }
}

// ---------------------------------------------------------------------------
// Action invoker
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct HttpActionInvoker {
    inner: GatewayClient,
}

impl HttpActionInvoker {
    pub fn new(
        base_url: &str,
        token: Option<SecretString>,
        timeout_secs: u64,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            inner: GatewayClient::new(base_url, token, timeout_secs)?,
        })
    }
}

impl ActionInvoker for HttpActionInvoker {
    async fn invoke(&self, request: &ActionRequest) -> Result<Value, ActionError> {
        let url = format!("{}/{}", self.inner.base_url, request.action);
        self.inner
            .post(&url, &request.idempotency_key, request)
            .await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use uuid::Uuid;

    use super::*;

    /// Serve one canned response and hand back the raw request text.
    async fn one_shot(status_line: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16 * 1024];
            let mut request = String::new();
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.push_str(&String::from_utf8_lossy(&buf[..n]));
                if n == 0 || request_complete(&request) {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            request
        });
        (format!("http://{addr}"), handle)
    }

    fn request_complete(raw: &str) -> bool {
        let Some((head, body)) = raw.split_once("\r\n\r\n") else {
            return false;
        };
        let length = head
            .lines()
            .find_map(|l| {
                let (name, value) = l.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        body.len() >= length
    }

    fn action(name: &str) -> ActionRequest {
        ActionRequest {
            organization_id: Uuid::now_v7(),
            contact_id: Uuid::now_v7(),
            run_id: Uuid::now_v7(),
            action: name.into(),
            payload: json!({ "title": "Call Ada" }),
            idempotency_key: "run-call-1".into(),
        }
    }

    #[tokio::test]
    async fn test_invoke_posts_with_idempotency_key() {
        let (base, server) = one_shot("200 OK", r#"{"task_id":"t-9"}"#).await;
        let invoker =
            HttpActionInvoker::new(&base, Some(SecretString::from("s3cret")), 5).unwrap();

        let reply = invoker.invoke(&action("create_task")).await.unwrap();
        assert_eq!(reply, json!({ "task_id": "t-9" }));

        let raw = server.await.unwrap().to_lowercase();
        assert!(raw.starts_with("post /create_task "), "{raw}");
        assert!(raw.contains("idempotency-key: run-call-1"));
        assert!(raw.contains("authorization: bearer s3cret"));
        assert!(raw.contains("call ada"));
    }

    #[tokio::test]
    async fn test_server_errors_are_retryable() {
        let (base, server) = one_shot("503 Service Unavailable", "").await;
        let invoker = HttpActionInvoker::new(&base, None, 5).unwrap();
        let err = invoker.invoke(&action("create_task")).await.unwrap_err();
        assert!(err.is_retryable(), "{err:?}");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_client_errors_are_permanent() {
        let (base, server) = one_shot("422 Unprocessable Entity", r#"{"error":"bad"}"#).await;
        let sender = HttpMessageSender::new(&base, None, 5).unwrap();
        let message = OutboundMessage {
            organization_id: Uuid::now_v7(),
            contact_id: Uuid::now_v7(),
            run_id: Uuid::now_v7(),
            channel: cadence_types::workflow::MessageChannel::Email,
            to: "ada@example.com".into(),
            subject: None,
            body: "hi".into(),
            idempotency_key: "k".into(),
        };
        let err = sender.send(&message).await.unwrap_err();
        assert!(matches!(err, ActionError::Rejected(ref m) if m.contains("bad")));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_refused_is_retryable() {
        // Bind then drop to get a port nobody listens on.
        let addr = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();
        let invoker = HttpActionInvoker::new(&format!("http://{addr}"), None, 5).unwrap();
        let err = invoker.invoke(&action("noop")).await.unwrap_err();
        assert!(err.is_retryable(), "{err:?}");
    }

    #[test]
    fn test_classify() {
        assert!(classify(StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        assert!(classify(StatusCode::BAD_GATEWAY, "").is_retryable());
        assert!(!classify(StatusCode::NOT_FOUND, "").is_retryable());
        assert!(!classify(StatusCode::UNAUTHORIZED, "").is_retryable());
    }
}
