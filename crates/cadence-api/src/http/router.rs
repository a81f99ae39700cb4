//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/`. Middleware: CORS, request tracing.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Definitions
        .route(
            "/workflows",
            post(handlers::workflow::create_workflow).get(handlers::workflow::list_workflows),
        )
        .route(
            "/workflows/{id}",
            get(handlers::workflow::get_workflow).delete(handlers::workflow::delete_workflow),
        )
        .route(
            "/workflows/{id}/runs",
            post(handlers::workflow::start_run).get(handlers::workflow::list_runs),
        )
        // Runs
        .route("/runs/{id}", get(handlers::run::get_run))
        .route("/runs/{id}/cancel", post(handlers::run::cancel_run))
        .route("/runs/{id}/signal", post(handlers::run::signal_run))
        // Events, sweep, preview
        .route("/events", post(handlers::event::post_event))
        .route("/sweep", post(handlers::event::sweep))
        .route("/preview", post(handlers::event::preview));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Liveness check (no auth required).
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use cadence_types::config::EngineConfig;
    use cadence_types::contact::Contact;
    use chrono::Utc;
    use secrecy::SecretString;
    use serde_json::{json, Value};
    use uuid::Uuid;

    use super::*;

    struct TestServer {
        base: String,
        client: reqwest::Client,
        state: AppState,
        _dir: tempfile::TempDir,
    }

    async fn serve(api_token: Option<&str>) -> TestServer {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("api.db").display());
        let state = AppState::open(
            dir.path().to_path_buf(),
            &url,
            EngineConfig::default(),
            api_token.map(SecretString::from),
        )
        .await
        .unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = build_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        TestServer {
            base: format!("http://{addr}"),
            client: reqwest::Client::new(),
            state,
            _dir: dir,
        }
    }

    async fn seed_contact(state: &AppState, organization_id: Uuid) -> Contact {
        let contact = Contact {
            id: Uuid::now_v7(),
            organization_id,
            first_name: Some("Ada".into()),
            last_name: None,
            email: None,
            phone: None,
            company: None,
            tags: Vec::new(),
            pipeline: None,
            stage: None,
            custom_fields: serde_json::Map::new(),
            updated_at: Utc::now(),
        };
        state.contacts.upsert_contact(&contact).await.unwrap();
        contact
    }

    fn mutate_then_end(organization_id: Uuid) -> Value {
        json!({
            "organization_id": organization_id,
            "name": "Tag follow-up",
            "entry_step_id": "mark",
            "triggers": [{ "type": "tag_added", "tag": "vip" }],
            "steps": [
                {
                    "id": "mark",
                    "config": {
                        "type": "mutate_contact_field",
                        "field": "stage",
                        "value": "vip-{{ contact.first_name }}"
                    },
                    "next": "done"
                },
                { "id": "done", "config": { "type": "end" } }
            ]
        })
    }

    #[tokio::test]
    async fn test_health_is_open() {
        let server = serve(Some("s3cret")).await;
        let resp = server
            .client
            .get(format!("{}/health", server.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn test_token_required_when_configured() {
        let server = serve(Some("s3cret")).await;
        let url = format!("{}/api/v1/workflows", server.base);

        let resp = server.client.get(&url).send().await.unwrap();
        assert_eq!(resp.status(), 401);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["errors"][0]["code"], "UNAUTHORIZED");

        let resp = server
            .client
            .get(&url)
            .bearer_auth("s3cret")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn test_event_starts_run_and_run_is_inspectable() {
        let server = serve(None).await;
        let org = Uuid::now_v7();
        let contact = seed_contact(&server.state, org).await;

        let resp = server
            .client
            .post(format!("{}/api/v1/workflows", server.base))
            .json(&mutate_then_end(org))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
        let created: Value = resp.json().await.unwrap();
        let workflow_id = created["data"]["id"].as_str().unwrap().to_string();

        let event = json!({
            "organization_id": org,
            "contact_id": contact.id,
            "occurred_at": "2026-03-02T09:00:00Z",
            "kind": { "type": "tag_added", "tag": "vip" }
        });
        let events_url = format!("{}/api/v1/events", server.base);
        let first: Value = server
            .client
            .post(&events_url)
            .json(&event)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let triggered = first["data"].as_array().unwrap();
        assert_eq!(triggered.len(), 1);
        assert_eq!(triggered[0]["workflow_id"], workflow_id.as_str());
        assert_eq!(triggered[0]["status"], "completed");
        assert_eq!(triggered[0]["duplicate"], false);

        // Redelivery is reported, not re-run.
        let second: Value = server
            .client
            .post(&events_url)
            .json(&event)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(second["data"][0]["duplicate"], true);

        let run_id = triggered[0]["run_id"].as_str().unwrap();
        let run: Value = server
            .client
            .get(format!("{}/api/v1/runs/{run_id}", server.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(run["data"]["run"]["status"], "completed");
        assert_eq!(run["data"]["logs"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cyclic_workflow_is_rejected() {
        let server = serve(None).await;
        let mut def = mutate_then_end(Uuid::now_v7());
        def["steps"][1] = json!({
            "id": "done",
            "config": { "type": "mutate_contact_field", "field": "stage", "value": "x" },
            "next": "mark"
        });

        let resp = server
            .client
            .post(format!("{}/api/v1/workflows", server.base))
            .json(&def)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["errors"][0]["code"], "INVALID_WORKFLOW");
    }

    #[tokio::test]
    async fn test_unknown_run_is_404() {
        let server = serve(None).await;
        let resp = server
            .client
            .get(format!("{}/api/v1/runs/{}", server.base, Uuid::now_v7()))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn test_preview_renders_without_persisting() {
        let server = serve(None).await;
        let resp: Value = server
            .client
            .post(format!("{}/api/v1/preview", server.base))
            .json(&json!({
                "step": {
                    "type": "send_message",
                    "channel": "sms",
                    "body": "Hi {{ contact.first_name | \"there\" }}"
                },
                "sample": { "contact": {} }
            }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(resp["data"]["body"], "Hi there");
        assert_eq!(resp["data"]["step_type"], "send_message");

        let runs = server.state.engine.list_runs(None, 10).await.unwrap();
        assert!(runs.is_empty());
    }
}
