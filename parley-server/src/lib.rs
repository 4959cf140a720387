pub mod config;
pub mod live;
pub mod models;
pub mod routes;
pub mod sanitize;
pub mod schema;
pub mod services;
pub mod socket;
pub mod store;

use std::sync::Arc;

use axum::http::{header, Method};
use axum::routing::{get, post};
use axum::Router;
use socketioxide::extract::SocketRef;
use socketioxide::SocketIo;
use tower_http::cors::{AllowHeaders, AllowMethods, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use parley_shared::middleware::{metrics_middleware, JwtSecret};

use crate::config::AppConfig;
use crate::live::LiveHub;
use crate::services::directory::InvitePolicy;
use crate::store::Store;

pub struct AppState {
    pub config: AppConfig,
    pub store: Store,
    pub live: LiveHub,
    /// `None` when no Prometheus recorder could be installed.
    pub metrics_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Store,
        metrics_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
    ) -> Self {
        let live = LiveHub::new(store.clone(), config.tail_size);
        Self {
            config,
            store,
            live,
            metrics_handle,
        }
    }

    pub fn invite_policy(&self) -> InvitePolicy {
        InvitePolicy {
            contact_gated: self.config.contact_gated_invites,
        }
    }
}

impl JwtSecret for AppState {
    fn jwt_secret(&self) -> &str {
        &self.config.jwt_secret
    }
}

/// HTTP routes plus the socket.io live tail, sharing one state.
pub fn app(state: Arc<AppState>) -> Router {
    let (sio_layer, io) = SocketIo::builder().build_layer();

    io.ns("/", {
        let state = state.clone();
        move |socket: SocketRef| {
            let state = state.clone();
            async move {
                socket::handlers::on_connect(socket, state).await;
            }
        }
    });

    Router::new()
        // Health
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::health::metrics))
        // Users
        .route(
            "/users/me",
            get(routes::users::get_me)
                .post(routes::users::ensure_me)
                .patch(routes::users::update_me),
        )
        .route("/users/search", get(routes::users::search))
        .route("/users/by-username/:username", get(routes::users::get_by_username))
        .route("/users/:id", get(routes::users::get_user))
        // Channels
        .route(
            "/channels",
            get(routes::channels::list_channels).post(routes::channels::create_channel),
        )
        .route("/channels/shared/:user_id", get(routes::channels::shared_with))
        .route("/channels/:id", get(routes::channels::get_channel))
        .route("/channels/:id/link", post(routes::channels::create_link))
        .route("/links/:token", axum::routing::delete(routes::channels::revoke_link))
        .route("/join/:token", post(routes::channels::join))
        // Messages
        .route(
            "/channels/:id/messages",
            get(routes::messages::list_messages).post(routes::messages::send_message),
        )
        .route(
            "/messages/:id",
            axum::routing::patch(routes::messages::edit_message).delete(routes::messages::delete_message),
        )
        // Read state
        .route("/channels/:id/seen", post(routes::read_state::mark_seen))
        .route("/channels/:id/watermarks", get(routes::read_state::watermarks))
        .route("/unread", get(routes::read_state::unread))
        // Contacts
        .route("/contacts", get(routes::contacts::list).post(routes::contacts::add))
        .route("/contacts/search", get(routes::contacts::search))
        .route(
            "/contacts/:id",
            axum::routing::patch(routes::contacts::update).delete(routes::contacts::remove),
        )
        .route_layer(axum::middleware::from_fn(metrics_middleware))
        .layer(sio_layer)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(AllowMethods::list([
                    Method::GET,
                    Method::POST,
                    Method::PATCH,
                    Method::DELETE,
                    Method::OPTIONS,
                ]))
                .allow_headers(AllowHeaders::list([
                    header::AUTHORIZATION,
                    header::CONTENT_TYPE,
                    header::ACCEPT,
                ])),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use parley_shared::middleware::issue_token;

    use super::*;
    use crate::config::StoreBackend;

    fn test_app() -> (Router, String) {
        let config = AppConfig {
            store: StoreBackend::Memory,
            jwt_secret: "test-secret".into(),
            ..AppConfig::default()
        };
        let state = Arc::new(AppState::new(config, Store::memory(), None));
        (app(state), "test-secret".into())
    }

    async fn call(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => req
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn requests_without_token_are_unauthenticated() {
        let (app, _) = test_app();
        let (status, body) = call(&app, "GET", "/channels", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "E1001");
    }

    #[tokio::test]
    async fn unprovisioned_user_is_not_found() {
        let (app, secret) = test_app();
        let token = issue_token(&secret, "provider|ghost", 60).unwrap();
        let (status, body) = call(&app, "GET", "/users/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "E2001");
    }

    #[tokio::test]
    async fn chat_roundtrip_over_http() {
        let (app, secret) = test_app();
        let alice = issue_token(&secret, "provider|alice", 60).unwrap();
        let bob = issue_token(&secret, "provider|bob", 60).unwrap();

        let (status, _) = call(&app, "POST", "/users/me", Some(&alice), Some(json!({ "name": "Alice" }))).await;
        assert_eq!(status, StatusCode::OK);
        let (_, me_bob) = call(&app, "POST", "/users/me", Some(&bob), Some(json!({ "name": "Bob" }))).await;
        let bob_id = me_bob["data"]["id"].clone();

        let (status, created) = call(
            &app,
            "POST",
            "/channels",
            Some(&alice),
            Some(json!({ "name": "crew", "kind": "group", "member_ids": [bob_id] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let channel_id = created["data"]["id"].as_str().unwrap().to_string();

        let (status, sent) = call(
            &app,
            "POST",
            &format!("/channels/{channel_id}/messages"),
            Some(&bob),
            Some(json!({ "body": "hi <b>there</b> & you" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(sent["data"]["body"], "hi there &amp; you");

        let (status, page) = call(
            &app,
            "GET",
            &format!("/channels/{channel_id}/messages?limit=1"),
            Some(&alice),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["data"]["page"].as_array().unwrap().len(), 1);
        assert_eq!(page["data"]["is_done"], false);

        let (_, unread) = call(&app, "GET", "/unread", Some(&alice), None).await;
        assert_eq!(unread["data"][0]["unread"], 1);

        let (status, body) = call(
            &app,
            "POST",
            &format!("/channels/{channel_id}/link"),
            Some(&bob),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "E3003");
    }

    #[tokio::test]
    async fn health_reports_memory_store() {
        let (app, _) = test_app();
        let (status, body) = call(&app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["checks"][0]["name"], "store:memory");
    }
}
