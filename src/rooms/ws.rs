use std::{sync::Arc, time::Duration};

use axum::{
    debug_handler,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket, close_code},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{
    AppResult, AppState,
    auth::{self, IdentityProvider},
    config::Config,
    error::RelayError,
    relay::{ClientEvent, Credentials, Relay, ServerEvent},
};

use super::{Identity, Session};

#[derive(Debug, Deserialize)]
pub(crate) struct ConnectQuery {
    token: Option<String>,
    username: Option<String>,
}

/// Credentials in the query are checked before the upgrade, so a bad token
/// is refused with 401 and no socket. Without them the first frame has to be
/// `authenticate`.
#[debug_handler(state = AppState)]
pub(crate) async fn relay_ws(
    Query(ConnectQuery { token, username }): Query<ConnectQuery>,
    State(relay): State<Arc<Relay>>,
    State(provider): State<Arc<dyn IdentityProvider>>,
    State(config): State<Arc<Config>>,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let allow_anonymous = config.allow_anonymous;

    if token.is_none() && username.is_none() {
        let timeout = config.auth_timeout;
        return Ok(ws.on_upgrade(move |socket| {
            authenticate_in_band(socket, relay, provider, allow_anonymous, timeout)
        }));
    }

    let credentials = Credentials { token, username };
    let identity = auth::authenticate(provider.as_ref(), &credentials, allow_anonymous)
        .await
        .inspect_err(|e| debug!("refused connection: {e}"))?;

    Ok(ws.on_upgrade(move |socket| run_session(socket, relay, identity)))
}

async fn authenticate_in_band(
    mut socket: WebSocket,
    relay: Arc<Relay>,
    provider: Arc<dyn IdentityProvider>,
    allow_anonymous: bool,
    timeout: Duration,
) {
    let credentials = match tokio::time::timeout(timeout, socket.recv()).await {
        Ok(Some(Ok(Message::Text(text)))) => match serde_json::from_str(text.as_str()) {
            Ok(ClientEvent::Authenticate(credentials)) => Some(credentials),
            _ => None,
        },
        _ => None,
    };

    let result = match credentials {
        Some(credentials) => {
            auth::authenticate(provider.as_ref(), &credentials, allow_anonymous).await
        }
        None => Err(RelayError::auth("expected an authenticate frame")),
    };

    match result {
        Ok(identity) => run_session(socket, relay, identity).await,
        Err(err) => {
            debug!("refused connection: {err}");
            refuse(socket, &err).await;
        }
    }
}

async fn refuse(mut socket: WebSocket, err: &RelayError) {
    let frame = ServerEvent::Error {
        kind: err.kind().to_owned(),
        message: err.to_string(),
    };
    if let Ok(text) = serde_json::to_string(&frame) {
        let _ = socket.send(Message::Text(text.into())).await;
    }
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: "authentication failed".into(),
        })))
        .await;
}

async fn run_session(socket: WebSocket, relay: Arc<Relay>, identity: Identity) {
    let (outbox, mut inbox) = mpsc::unbounded_channel::<ServerEvent>();
    let (mut sender, mut receiver) = socket.split();
    let mut session = Session::open(relay, identity, outbox);

    let mut forward_task = tokio::spawn(async move {
        while let Some(event) = inbox.recv().await {
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut forward_task => break,
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => session.dispatch(text.as_str()).await,
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    drop(session);
    forward_task.abort();
}
