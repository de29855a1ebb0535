//! WebSocket protocol server.
//!
//! Each accepted connection becomes a task on the control plane loop. A
//! connection task answers requests in order and forwards every hit batch
//! broadcast by the drain loop. Request handlers run to completion without
//! yielding, so they never interleave with a batch write.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use url::form_urlencoded;
use vigil_store::{BreakpointId, NewBreakpoint, Store};

use crate::error::{
    ProtocolError, AUTHENTICATION_FAILED, INVALID_JSON, PERSIST_FAILED, READ_BREAKPOINTS_FAILED,
    READ_HITS_FAILED, REMOVE_FAILED,
};
use crate::instrument::Instrumenter;
use crate::protocol::{BreakpointPayload, ClientRequest, HitPayload, ServerMessage};

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

pub(crate) struct ServerState {
    pub(crate) store: Arc<Store>,
    pub(crate) instrumenter: Arc<dyn Instrumenter>,
    pub(crate) hits: broadcast::Sender<Arc<str>>,
    pub(crate) password: Option<String>,
}

pub(crate) async fn serve(
    listener: TcpListener,
    state: Arc<ServerState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    connections.spawn(handle_connection(
                        stream,
                        peer,
                        Arc::clone(&state),
                        shutdown.clone(),
                    ));
                }
                Err(err) => {
                    tracing::warn!(target: "vigil.server", error = %err, "accept failed");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    drop(listener);
    while connections.join_next().await.is_some() {}
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<ServerState>,
    mut shutdown: watch::Receiver<bool>,
) {
    let password = state.password.clone();
    let handshake = tokio_tungstenite::accept_hdr_async(
        stream,
        move |request: &Request, response: Response| {
            authenticate(request, response, password.as_deref())
        },
    )
    .await;
    let socket = match handshake {
        Ok(socket) => socket,
        Err(err) => {
            tracing::debug!(target: "vigil.server", %peer, error = %err, "handshake failed");
            return;
        }
    };
    tracing::info!(target: "vigil.server", %peer, "client connected");

    let mut hits = state.hits.subscribe();
    let (mut sink, mut source) = socket.split();
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            incoming = source.next() => {
                let reply = match incoming {
                    Some(Ok(Message::Text(text))) => handle_message(&state, text.as_str()),
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => handle_message(&state, text),
                        Err(_) => ProtocolError::Validation(INVALID_JSON).into(),
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => {
                        tracing::debug!(target: "vigil.server", %peer, error = %err, "read failed");
                        break;
                    }
                };
                if let Err(err) = sink.send(Message::text(reply.to_json())).await {
                    tracing::debug!(target: "vigil.server", %peer, error = %err, "write failed");
                    break;
                }
            }
            broadcast = hits.recv() => match broadcast {
                Ok(payload) => {
                    if let Err(err) = sink.send(Message::text(payload.to_string())).await {
                        tracing::debug!(target: "vigil.server", %peer, error = %err, "write failed");
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(target: "vigil.server", %peer, missed, "client fell behind; hit batches skipped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    tracing::info!(target: "vigil.server", %peer, "client disconnected");
}

/// Checks the `password` query parameter of the upgrade request.
fn authenticate(
    request: &Request,
    response: Response,
    password: Option<&str>,
) -> Result<Response, ErrorResponse> {
    let Some(expected) = password else {
        return Ok(response);
    };
    let supplied = request.uri().query().and_then(|query| {
        form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == "password")
            .map(|(_, value)| value.into_owned())
    });
    if supplied.as_deref() == Some(expected) {
        return Ok(response);
    }

    tracing::warn!(target: "vigil.server", "rejected client with a missing or wrong password");
    let mut rejection =
        ErrorResponse::new(Some(ServerMessage::error(AUTHENTICATION_FAILED).to_json()));
    *rejection.status_mut() = StatusCode::FORBIDDEN;
    Err(rejection)
}

/// Dispatches one request and builds its reply. Failures become `error`
/// replies; the connection stays open.
pub(crate) fn handle_message(state: &ServerState, text: &str) -> ServerMessage {
    let request = match ClientRequest::parse(text) {
        Ok(request) => request,
        Err(err) => {
            tracing::debug!(target: "vigil.server", error = %err, "rejected request");
            return err.into();
        }
    };
    let reply = match request {
        ClientRequest::Add(new) => add(state, &new),
        ClientRequest::Breakpoints => list(state),
        ClientRequest::Hits { id } => hits(state, id),
        ClientRequest::Remove { id } => remove(state, id),
    };
    reply.unwrap_or_else(ServerMessage::from)
}

fn add(state: &ServerState, new: &NewBreakpoint) -> Result<ServerMessage, ProtocolError> {
    let bp = state.store.add_breakpoint(new).map_err(|err| {
        tracing::error!(target: "vigil.server", error = %err, "failed to persist breakpoint");
        ProtocolError::Persistence(PERSIST_FAILED)
    })?;
    if let Err(err) = state.instrumenter.instrument(&bp.file, bp.line, bp.id) {
        tracing::warn!(
            target: "vigil.server",
            breakpoint_id = bp.id,
            error = %err,
            "breakpoint stored but not armed yet"
        );
    }
    tracing::info!(
        target: "vigil.server",
        breakpoint_id = bp.id,
        file = %bp.file,
        line = bp.line,
        "breakpoint added"
    );
    Ok(ServerMessage::Add {
        breakpoint: BreakpointPayload::from(&bp),
    })
}

fn list(state: &ServerState) -> Result<ServerMessage, ProtocolError> {
    let breakpoints = state.store.list_breakpoints().map_err(|err| {
        tracing::error!(target: "vigil.server", error = %err, "failed to list breakpoints");
        ProtocolError::Persistence(READ_BREAKPOINTS_FAILED)
    })?;
    Ok(ServerMessage::Breakpoints {
        breakpoints: breakpoints.iter().map(BreakpointPayload::from).collect(),
    })
}

fn hits(state: &ServerState, id: BreakpointId) -> Result<ServerMessage, ProtocolError> {
    let hits = state.store.get_hits(id).map_err(|err| {
        tracing::error!(target: "vigil.server", breakpoint_id = id, error = %err, "failed to read hits");
        ProtocolError::Persistence(READ_HITS_FAILED)
    })?;
    Ok(ServerMessage::Hits {
        breakpoint_id: id,
        hits: hits.iter().map(HitPayload::from).collect(),
    })
}

fn remove(state: &ServerState, id: BreakpointId) -> Result<ServerMessage, ProtocolError> {
    let removal_failed = |err: vigil_store::StoreError| {
        tracing::error!(target: "vigil.server", breakpoint_id = id, error = %err, "failed to remove breakpoint");
        ProtocolError::Persistence(REMOVE_FAILED)
    };
    let bp = state
        .store
        .get_breakpoint(id)
        .map_err(removal_failed)?
        .ok_or(ProtocolError::NotFound)?;

    if let Err(err) = state.instrumenter.deinstrument(&bp.file, bp.line, bp.id) {
        tracing::warn!(
            target: "vigil.server",
            breakpoint_id = id,
            error = %err,
            "could not disarm breakpoint"
        );
    }
    if !state.store.remove_breakpoint(id).map_err(removal_failed)? {
        return Err(ProtocolError::NotFound);
    }
    tracing::info!(target: "vigil.server", breakpoint_id = id, "breakpoint removed");
    Ok(ServerMessage::Remove { id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::ProbeRegistry;
    use tempfile::TempDir;
    use vigil_store::{PendingHit, StoreOptions};

    fn state(dir: &TempDir, registry: Arc<ProbeRegistry>) -> ServerState {
        ServerState {
            store: Arc::new(Store::open(dir.path(), StoreOptions::default()).unwrap()),
            instrumenter: registry,
            hits: broadcast::channel(4).0,
            password: None,
        }
    }

    fn added_id(reply: ServerMessage) -> BreakpointId {
        match reply {
            ServerMessage::Add { breakpoint } => breakpoint.id,
            other => panic!("expected add reply, got {other:?}"),
        }
    }

    #[test]
    fn add_persists_and_arms_known_sites() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(ProbeRegistry::new());
        registry.declare_site("src/orders.rs", 12);
        let state = state(&dir, Arc::clone(&registry));

        let id = added_id(handle_message(
            &state,
            r#"{"type":"add","file":"src/orders.rs","line":12,"expressions":["total"]}"#,
        ));
        assert!(registry.is_armed("src/orders.rs", 12));

        // Unknown location: stored anyway, just not armed.
        let other = added_id(handle_message(
            &state,
            r#"{"type":"add","file":"src/missing.rs","line":1}"#,
        ));
        assert_ne!(id, other);
        assert!(registry.is_pending("src/missing.rs", 1, other));

        let ServerMessage::Breakpoints { breakpoints } =
            handle_message(&state, r#"{"type":"breakpoints"}"#)
        else {
            panic!("expected breakpoints reply");
        };
        assert_eq!(
            breakpoints.iter().map(|bp| bp.id).collect::<Vec<_>>(),
            vec![id, other]
        );
        assert_eq!(breakpoints[0].expressions, vec!["total".to_owned()]);
    }

    #[test]
    fn remove_disarms_and_keeps_history() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(ProbeRegistry::new());
        registry.declare_site("src/a.rs", 5);
        let state = state(&dir, Arc::clone(&registry));
        let id = added_id(handle_message(
            &state,
            r#"{"type":"add","file":"src/a.rs","line":5,"expressions":["x"]}"#,
        ));
        state
            .store
            .log_hit(&PendingHit {
                breakpoint_id: id,
                values: vec!["5".into()],
            })
            .unwrap();

        let reply = handle_message(&state, &format!(r#"{{"type":"remove","id":{id}}}"#));
        assert_eq!(reply, ServerMessage::Remove { id });
        assert!(!registry.is_armed("src/a.rs", 5));

        let ServerMessage::Hits { breakpoint_id, hits } =
            handle_message(&state, &format!(r#"{{"type":"hits","id":{id}}}"#))
        else {
            panic!("expected hits reply");
        };
        assert_eq!(breakpoint_id, id);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].breakpoint_id, None);
        assert_eq!(hits[0].values, vec!["5".to_owned()]);
    }

    #[test]
    fn unknown_ids_and_bad_requests_become_errors() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir, Arc::new(ProbeRegistry::new()));
        assert_eq!(
            handle_message(&state, r#"{"type":"remove","id":77}"#),
            ServerMessage::error("Breakpoint with the specified ID does not exist.")
        );
        assert_eq!(
            handle_message(&state, "{"),
            ServerMessage::error("Invalid JSON body.")
        );
        assert_eq!(
            handle_message(&state, r#"{"type":"hits","id":77}"#),
            ServerMessage::Hits {
                breakpoint_id: 77,
                hits: Vec::new()
            }
        );

        let too_large = u64::MAX;
        assert_eq!(
            handle_message(&state, &format!(r#"{{"type":"remove","id":{too_large}}}"#)),
            ServerMessage::error("Breakpoint with the specified ID does not exist.")
        );
        assert_eq!(
            handle_message(&state, &format!(r#"{{"type":"hits","id":{too_large}}}"#)),
            ServerMessage::Hits {
                breakpoint_id: too_large,
                hits: Vec::new()
            }
        );
    }

    #[test]
    fn password_is_checked_on_upgrade() {
        let request = |uri: &str| Request::builder().uri(uri).body(()).unwrap();

        assert!(authenticate(&request("/"), Response::new(()), None).is_ok());
        assert!(authenticate(&request("/?password=s%20cret"), Response::new(()), Some("s cret")).is_ok());

        let rejected = authenticate(&request("/?password=nope"), Response::new(()), Some("s cret"))
            .unwrap_err();
        assert_eq!(rejected.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            rejected.body().as_deref(),
            Some(r#"{"type":"error","message":"Authentication failed."}"#)
        );
        assert!(authenticate(&request("/"), Response::new(()), Some("s cret")).is_err());
    }
}
