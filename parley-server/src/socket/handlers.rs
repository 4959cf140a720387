use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use socketioxide::extract::{Data, SocketRef};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use parley_shared::middleware::validate_jwt;
use parley_shared::{AppError, ChannelKind, SubscribePayload, TailPush, WatermarksPush};

use crate::live::{TailSnapshot, WatermarkSnapshot};
use crate::services::{identity, membership, read_state};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

impl From<&AppError> for ErrorPayload {
    fn from(err: &AppError) -> Self {
        Self {
            code: err.code().map_or("E0001", |c| c.code()).to_string(),
            message: err.to_string(),
        }
    }
}

/// Forwarding tasks of one channel subscription. Dropping it stops them.
struct Forwarders {
    tail: JoinHandle<()>,
    watermarks: JoinHandle<()>,
}

impl Drop for Forwarders {
    fn drop(&mut self) {
        self.tail.abort();
        self.watermarks.abort();
    }
}

/// Per-socket state kept in the socket extensions.
#[derive(Clone)]
struct Session {
    user_id: Uuid,
    subject: Arc<str>,
    feeds: Arc<DashMap<Uuid, Forwarders>>,
}

fn session_of(socket: &SocketRef) -> Option<Session> {
    socket.extensions.get::<Session>()
}

pub async fn on_connect(socket: SocketRef, state: Arc<AppState>) {
    let session = match authenticate_socket(&socket, &state) {
        Ok(session) => session,
        Err(err) => {
            tracing::warn!(error = %err, "live socket auth failed");
            let _ = socket.emit("error", &ErrorPayload::from(&err));
            socket.disconnect().ok();
            return;
        }
    };

    tracing::info!(user_id = %session.user_id, sid = %socket.id, "live socket connected");
    if let Err(e) = identity::touch_last_active(&state.store, &session.subject) {
        tracing::warn!(error = %e, "failed to record activity");
    }
    socket.extensions.insert(session.clone());

    let _ = socket.emit("connected", &serde_json::json!({ "user_id": session.user_id }));

    socket.on("subscribe", {
        let state = state.clone();
        move |socket: SocketRef, Data::<SubscribePayload>(payload)| {
            let state = state.clone();
            async move { on_subscribe(socket, payload, &state) }
        }
    });

    socket.on("unsubscribe", move |socket: SocketRef, Data::<SubscribePayload>(payload)| async move {
        if let Some(session) = session_of(&socket) {
            if session.feeds.remove(&payload.channel_id).is_some() {
                tracing::debug!(channel = %payload.channel_id, sid = %socket.id, "unsubscribed");
            }
        }
    });

    socket.on("heartbeat", {
        let state = state.clone();
        move |socket: SocketRef| {
            let state = state.clone();
            async move {
                if let Some(session) = session_of(&socket) {
                    if let Err(e) = identity::touch_last_active(&state.store, &session.subject) {
                        tracing::warn!(error = %e, "failed to record activity");
                    }
                }
            }
        }
    });

    socket.on_disconnect(move |socket: SocketRef| async move {
        if let Some(session) = session_of(&socket) {
            session.feeds.clear();
            tracing::info!(user_id = %session.user_id, sid = %socket.id, "live socket disconnected");
        }
    });
}

fn on_subscribe(socket: SocketRef, payload: SubscribePayload, state: &Arc<AppState>) {
    let Some(session) = session_of(&socket) else {
        return;
    };
    let channel_id = payload.channel_id;

    let opened = state.store.transaction(|tx| {
        membership::require_member(tx, session.user_id, channel_id)?;
        Ok(membership::require_channel(tx, channel_id)?.kind())
    });
    let kind = match opened {
        Ok(kind) => kind,
        Err(err) => {
            let _ = socket.emit("error", &ErrorPayload::from(&err));
            return;
        }
    };

    let receivers = state
        .live
        .subscribe_tail(channel_id)
        .and_then(|tail| Ok((tail, state.live.subscribe_watermarks(channel_id)?)));
    let (tail, watermarks) = match receivers {
        Ok(receivers) => receivers,
        Err(err) => {
            tracing::warn!(channel = %channel_id, error = %err, "failed to open live feed");
            let _ = socket.emit("error", &ErrorPayload::from(&err));
            return;
        }
    };

    let forwarders = Forwarders {
        tail: tokio::spawn(forward_tail(socket.clone(), channel_id, tail)),
        watermarks: tokio::spawn(forward_watermarks(
            socket.clone(),
            channel_id,
            kind,
            session.user_id,
            watermarks,
        )),
    };
    // Re-subscribing replaces the old forwarders, which stops them.
    session.feeds.insert(channel_id, forwarders);
    tracing::debug!(channel = %channel_id, sid = %socket.id, "subscribed");
}

/// Push the current snapshot, then every replacement until the socket or the
/// topic goes away.
async fn forward_tail(socket: SocketRef, channel_id: Uuid, mut rx: watch::Receiver<TailSnapshot>) {
    loop {
        let snapshot = rx.borrow_and_update().clone();
        let push = TailPush {
            channel_id,
            messages: snapshot.as_ref().clone(),
        };
        if socket.emit("tail", &push).is_err() || rx.changed().await.is_err() {
            break;
        }
    }
}

async fn forward_watermarks(
    socket: SocketRef,
    channel_id: Uuid,
    kind: ChannelKind,
    viewer: Uuid,
    mut rx: watch::Receiver<WatermarkSnapshot>,
) {
    loop {
        let snapshot = rx.borrow_and_update().clone();
        let push = WatermarksPush {
            channel_id,
            rows: read_state::anonymize(kind, viewer, &snapshot),
        };
        if socket.emit("watermarks", &push).is_err() || rx.changed().await.is_err() {
            break;
        }
    }
}

fn token_from_query(query: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let mut split = pair.splitn(2, '=');
        let key = split.next()?;
        let value = split.next()?;
        (key == "token").then(|| value.to_string())
    })
}

fn authenticate_socket(socket: &SocketRef, state: &Arc<AppState>) -> Result<Session, AppError> {
    let connect_info = socket.req_parts();
    let query = connect_info.uri.query().unwrap_or_default();
    let token =
        token_from_query(query).ok_or_else(|| AppError::unauthenticated("missing token query parameter"))?;

    let claims = validate_jwt(&token, &state.config.jwt_secret)?;
    let user = identity::current_user(&state.store, &claims.sub)?;

    Ok(Session {
        user_id: user.id,
        subject: Arc::from(claims.sub.as_str()),
        feeds: Arc::new(DashMap::new()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_read_from_query() {
        assert_eq!(token_from_query("EIO=4&transport=websocket&token=abc"), Some("abc".into()));
        assert_eq!(token_from_query("EIO=4&transport=polling"), None);
        assert_eq!(token_from_query(""), None);
    }

    #[test]
    fn error_payload_carries_taxonomy_code() {
        let err = AppError::new(parley_shared::ErrorCode::NotMember, "not a member");
        let payload = ErrorPayload::from(&err);
        assert_eq!(payload.code, "E3002");
        assert_eq!(payload.message, "not a member");
    }
}
