use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use echoes_rust_server::engine::SolveOutcome;
use echoes_rust_server::errors::EngineError;
use echoes_rust_server::history_store::HistoryStore;
use echoes_rust_server::puzzle;
use echoes_rust_server::reward::{MockIssuerOptions, MockTestnetIssuer, RewardIssuer};
use echoes_rust_server::room::{make_room_code, Room};
use echoes_rust_server::server_protocol::{parse_client_message, ParsedClientMessage};
use echoes_rust_server::server_utils::{
    normalize_room_code, parse_history_limit, resolve_identity, sanitize_name, short_identity,
};
use echoes_rust_server::types::{ActionKind, GamePhase, PlayerAction, Position, RoomConfig};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tower_http::services::{ServeDir, ServeFile};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

type SharedState = Arc<Mutex<ServerState>>;

#[derive(Clone)]
struct ClientContext {
    tx: mpsc::Sender<OutboundMessage>,
    // (room code, participant id) once the client has created or joined.
    binding: Option<(String, String)>,
}

#[derive(Clone, Debug)]
enum OutboundMessage {
    Text(String),
    Close { code: u16, reason: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum QueuePolicy {
    DropOnFull,
    DisconnectOnFull,
}

struct ServerState {
    clients: HashMap<String, ClientContext>,
    rooms: HashMap<String, Room>,
    history_store: HistoryStore,
    reward_issuer: Arc<dyn RewardIssuer>,
    next_guest_seq: u64,
}

impl ServerState {
    fn new(history_store: HistoryStore, reward_issuer: Arc<dyn RewardIssuer>) -> Self {
        Self {
            clients: HashMap::new(),
            rooms: HashMap::new(),
            history_store,
            reward_issuer,
            next_guest_seq: 1,
        }
    }
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<String>,
}

#[tokio::main]
async fn main() {
    let port = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let history_path = std::env::var("HISTORY_DB_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(".data/history.json"));

    let issuer: Arc<dyn RewardIssuer> =
        Arc::new(MockTestnetIssuer::new(MockIssuerOptions::default()));
    let state = Arc::new(Mutex::new(ServerState::new(
        HistoryStore::new(history_path),
        issuer,
    )));

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/history", get(history_handler))
        .route("/ws", get(ws_handler))
        .with_state(state);

    let app = if let Some(static_dir) = resolve_static_dir() {
        let index_file = static_dir.join("index.html");
        println!(
            "[server] static file root: {}",
            static_dir.to_string_lossy()
        );
        app.fallback_service(
            ServeDir::new(static_dir).not_found_service(ServeFile::new(index_file)),
        )
    } else {
        eprintln!("[server] static file root not found. run `npm run build` to generate dist.");
        app
    };

    let bind_addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind server socket");

    println!("[server] listening on :{port}");
    axum::serve(listener, app)
        .await
        .expect("server runtime failed");
}

fn resolve_static_dir() -> Option<PathBuf> {
    if let Ok(raw) = std::env::var("STATIC_DIR") {
        let path = PathBuf::from(raw);
        if path.join("index.html").is_file() {
            return Some(path);
        }
    }

    let candidates = [PathBuf::from("dist"), PathBuf::from("../dist")];
    candidates
        .into_iter()
        .find(|path| path.join("index.html").is_file())
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn history_handler(
    State(state): State<SharedState>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let guard = state.lock().await;
    Json(
        guard
            .history_store
            .build_response(parse_history_limit(query.limit.as_deref())),
    )
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: SharedState, socket: WebSocket) {
    let client_id = make_id("client");
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(256);

    {
        let mut guard = state.lock().await;
        guard.clients.insert(
            client_id.clone(),
            ClientContext {
                tx: tx.clone(),
                binding: None,
            },
        );
    }

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let should_close = matches!(outbound, OutboundMessage::Close { .. });
            let result = match outbound {
                OutboundMessage::Text(payload) => {
                    ws_sender.send(Message::Text(payload.into())).await
                }
                OutboundMessage::Close { code, reason } => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    ws_sender.send(Message::Close(Some(frame))).await
                }
            };
            if result.is_err() || should_close {
                break;
            }
        }
    });

    while let Some(received) = ws_receiver.next().await {
        let Ok(message) = received else {
            break;
        };

        match message {
            Message::Text(raw) => {
                handle_client_message(state.clone(), &client_id, raw.to_string()).await;
            }
            Message::Binary(raw) => {
                if let Ok(text) = String::from_utf8(raw.to_vec()) {
                    handle_client_message(state.clone(), &client_id, text).await;
                } else {
                    send_error_to_client(&state, &client_id, "invalid utf8 message").await;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    handle_disconnect(state, &client_id).await;
    drop(tx);
    let _ = writer.await;
}

async fn handle_client_message(state: SharedState, client_id: &str, raw: String) {
    let Some(message) = parse_client_message(&raw) else {
        send_error_to_client(&state, client_id, "invalid message").await;
        return;
    };

    match message {
        ParsedClientMessage::CreateRoom {
            name,
            wallet_address,
        } => {
            handle_create_room(state, client_id, name, wallet_address).await;
        }
        ParsedClientMessage::JoinRoom {
            code,
            name,
            wallet_address,
        } => {
            handle_join_room(state, client_id, code, name, wallet_address).await;
        }
        ParsedClientMessage::StartGame => {
            handle_start_game(state, client_id).await;
        }
        ParsedClientMessage::Move { x, y, elapsed_ms } => {
            handle_move(state, client_id, x, y, elapsed_ms).await;
        }
        ParsedClientMessage::Solve { sequence } => {
            handle_solve(state, client_id, sequence).await;
        }
        ParsedClientMessage::Claim => {
            handle_claim(state, client_id).await;
        }
        ParsedClientMessage::Leave => {
            handle_leave(state, client_id).await;
        }
        ParsedClientMessage::Ping { t } => {
            let mut guard = state.lock().await;
            send_to_client(
                &mut guard,
                client_id,
                &json!({
                    "type": "pong",
                    "t": t,
                }),
                QueuePolicy::DisconnectOnFull,
            );
        }
    }
}

async fn handle_create_room(
    state: SharedState,
    client_id: &str,
    requested_name: String,
    wallet_address: Option<String>,
) {
    let mut guard = state.lock().await;
    if client_binding(&guard, client_id).is_some() {
        send_error_to_client_locked(&mut guard, client_id, "already in a room");
        return;
    }

    let name = sanitize_name(&requested_name);
    let identity = next_identity(&mut guard, wallet_address.as_deref());
    let participant_id = make_id("participant");
    let code = make_unique_room_code(&guard);

    let room = match Room::create(&code, &participant_id, &identity, RoomConfig::default(), now_ms())
    {
        Ok(room) => room,
        Err(error) => {
            send_error_to_client_locked(&mut guard, client_id, &error.to_string());
            return;
        }
    };
    let config = room.engine.config.clone();
    guard.rooms.insert(code.clone(), room);
    bind_client(&mut guard, client_id, &code, &participant_id);
    println!(
        "[server] room {code} created by {} ({name})",
        short_identity(&identity)
    );

    send_to_client(
        &mut guard,
        client_id,
        &json!({
            "type": "room_created",
            "roomCode": code,
            "participantId": participant_id,
            "identity": identity,
            "isHost": true,
            "config": config,
        }),
        QueuePolicy::DisconnectOnFull,
    );
    broadcast_room_state(&mut guard, &code, QueuePolicy::DisconnectOnFull);
}

async fn handle_join_room(
    state: SharedState,
    client_id: &str,
    requested_code: String,
    requested_name: String,
    wallet_address: Option<String>,
) {
    let mut guard = state.lock().await;
    if client_binding(&guard, client_id).is_some() {
        send_error_to_client_locked(&mut guard, client_id, "already in a room");
        return;
    }

    let code = normalize_room_code(&requested_code);
    if !guard.rooms.contains_key(&code) {
        send_error_to_client_locked(&mut guard, client_id, "room not found");
        return;
    }

    let name = sanitize_name(&requested_name);
    let identity = next_identity(&mut guard, wallet_address.as_deref());
    let participant_id = make_id("participant");

    let joined = match guard.rooms.get_mut(&code) {
        Some(room) => room
            .join(&participant_id, &identity)
            .map(|_| room.engine.config.clone()),
        None => Err(EngineError::NotFound(code.clone())),
    };
    let config = match joined {
        Ok(config) => config,
        Err(error) => {
            send_error_to_client_locked(&mut guard, client_id, &error.to_string());
            return;
        }
    };

    bind_client(&mut guard, client_id, &code, &participant_id);
    println!(
        "[server] {} ({name}) joined room {code}",
        short_identity(&identity)
    );

    send_to_client(
        &mut guard,
        client_id,
        &json!({
            "type": "room_joined",
            "roomCode": code,
            "participantId": participant_id,
            "identity": identity,
            "isHost": false,
            "config": config,
        }),
        QueuePolicy::DisconnectOnFull,
    );
    broadcast_room_state(&mut guard, &code, QueuePolicy::DisconnectOnFull);
}

async fn handle_start_game(state: SharedState, client_id: &str) {
    let mut guard = state.lock().await;
    let Some((code, participant_id)) = client_binding(&guard, client_id) else {
        send_error_to_client_locked(&mut guard, client_id, "join a room first");
        return;
    };

    let start = {
        let Some(room) = guard.rooms.get_mut(&code) else {
            send_error_to_client_locked(&mut guard, client_id, "room not found");
            return;
        };
        if !room.engine.is_host(&participant_id) {
            send_error_to_client_locked(&mut guard, client_id, "only host can start");
            return;
        }
        room.engine.start_game()
    };

    if let Err(error) = start {
        send_error_to_client_locked(&mut guard, client_id, &error.to_string());
        return;
    }

    println!("[server] room {code}: game started");
    broadcast_room(
        &mut guard,
        &code,
        &json!({ "type": "game_started", "roomCode": code }),
        QueuePolicy::DisconnectOnFull,
    );
    broadcast_room_state(&mut guard, &code, QueuePolicy::DisconnectOnFull);
}

async fn handle_move(state: SharedState, client_id: &str, x: f32, y: f32, elapsed_ms: u64) {
    let mut guard = state.lock().await;
    let Some((code, participant_id)) = client_binding(&guard, client_id) else {
        send_error_to_client_locked(&mut guard, client_id, "join a room first");
        return;
    };

    let outcome = {
        let Some(room) = guard.rooms.get_mut(&code) else {
            return;
        };
        let action = PlayerAction {
            kind: ActionKind::Move,
            position: Position { x, y },
            elapsed_ms,
        };
        room.engine.record_action(&participant_id, action).and_then(
            |applied| {
                if !applied {
                    return Ok(false);
                }
                // Collision against the mover's own frozen trail; a hit
                // glitches them back to spawn with one reset entry.
                if room.engine.collides(&participant_id)? {
                    room.engine.reset_position(&participant_id)?;
                }
                Ok(true)
            },
        )
    };

    match outcome {
        Ok(true) => {
            broadcast_room_state(&mut guard, &code, QueuePolicy::DropOnFull);
        }
        Ok(false) => {}
        Err(error) => {
            send_error_to_client_locked(&mut guard, client_id, &error.to_string());
        }
    }
}

async fn handle_solve(state: SharedState, client_id: &str, sequence: Vec<u8>) {
    let mut guard = state.lock().await;
    let Some((code, participant_id)) = client_binding(&guard, client_id) else {
        send_error_to_client_locked(&mut guard, client_id, "join a room first");
        return;
    };

    let solved = {
        let Some(room) = guard.rooms.get_mut(&code) else {
            return;
        };
        let round_number = room.engine.round_number();
        if room.engine.phase() == GamePhase::Playing
            && !puzzle::check_sequence(round_number, &sequence)
        {
            send_to_client(
                &mut guard,
                client_id,
                &json!({
                    "type": "solve_rejected",
                    "round": round_number,
                }),
                QueuePolicy::DisconnectOnFull,
            );
            return;
        }
        room.engine.solve_puzzle(&participant_id)
    };

    match solved {
        Ok(SolveOutcome::Ignored) => {}
        Ok(SolveOutcome::Won { .. }) => {
            record_finished_game(&mut guard, &code);
            broadcast_room_state(&mut guard, &code, QueuePolicy::DisconnectOnFull);
        }
        Ok(SolveOutcome::Advancing {
            generation,
            delay_ms,
        }) => {
            broadcast_room_state(&mut guard, &code, QueuePolicy::DisconnectOnFull);
            drop(guard);
            schedule_round_advance(state, code, generation, delay_ms);
        }
        Err(error) => {
            send_error_to_client_locked(&mut guard, client_id, &error.to_string());
        }
    }
}

/// Settle-delay timer. The generation check in the engine makes this safe
/// against restarts and lobby returns racing the sleep.
fn schedule_round_advance(state: SharedState, code: String, generation: u64, delay_ms: u64) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        let mut guard = state.lock().await;
        let advanced = guard
            .rooms
            .get_mut(&code)
            .map(|room| room.engine.apply_scheduled_advance(generation))
            .unwrap_or(false);
        if advanced {
            broadcast_room_state(&mut guard, &code, QueuePolicy::DropOnFull);
        }
    });
}

async fn handle_claim(state: SharedState, client_id: &str) {
    let (code, issuer, identity, amount_usd) = {
        let mut guard = state.lock().await;
        let Some((code, participant_id)) = client_binding(&guard, client_id) else {
            send_error_to_client_locked(&mut guard, client_id, "join a room first");
            return;
        };
        let Some(room) = guard.rooms.get(&code) else {
            send_error_to_client_locked(&mut guard, client_id, "room not found");
            return;
        };
        if room.engine.winner_id() != Some(participant_id.as_str()) {
            send_error_to_client_locked(&mut guard, client_id, "only the winner can claim");
            return;
        }
        match room.engine.reward_claim_snapshot() {
            Ok((identity, amount_usd)) => {
                (code, guard.reward_issuer.clone(), identity, amount_usd)
            }
            Err(error) => {
                send_error_to_client_locked(&mut guard, client_id, &error.to_string());
                return;
            }
        }
    };

    // Lock released: the issuer call can take seconds and other rooms (and
    // this room's moves) must not stall behind it.
    let issued = issuer.submit_reward(&identity, amount_usd).await;

    let mut guard = state.lock().await;
    match issued {
        Ok(receipt) => {
            if let Some(room) = guard.rooms.get_mut(&code) {
                room.engine
                    .record_reward_claimed(&receipt.reference, receipt.amount_usd);
            }
            guard
                .history_store
                .record_claim(&identity, receipt.amount_usd);
            send_to_client(
                &mut guard,
                client_id,
                &json!({
                    "type": "reward_claimed",
                    "receipt": receipt,
                }),
                QueuePolicy::DisconnectOnFull,
            );
            broadcast_room_state(&mut guard, &code, QueuePolicy::DisconnectOnFull);
        }
        Err(error) => {
            eprintln!("[server] room {code}: reward claim failed: {error}");
            send_to_client(
                &mut guard,
                client_id,
                &json!({
                    "type": "claim_failed",
                    "message": error.to_string(),
                    "retryable": matches!(error, EngineError::RewardUnavailable(_)),
                }),
                QueuePolicy::DisconnectOnFull,
            );
        }
    }
}

async fn handle_leave(state: SharedState, client_id: &str) {
    let mut guard = state.lock().await;
    let Some((code, _)) = client_binding(&guard, client_id) else {
        return;
    };
    if let Some(room) = guard.rooms.get_mut(&code) {
        room.engine.back_to_lobby();
    }
    broadcast_room_state(&mut guard, &code, QueuePolicy::DisconnectOnFull);
}

async fn handle_disconnect(state: SharedState, client_id: &str) {
    let mut guard = state.lock().await;
    disconnect_client_internal(&mut guard, client_id);
}

fn disconnect_client_internal(state: &mut ServerState, client_id: &str) {
    // Participants have no leave semantics; their history stays in the
    // room for the rest of the session.
    state.clients.remove(client_id);
}

fn record_finished_game(state: &mut ServerState, code: &str) {
    let Some(room) = state.rooms.get_mut(code) else {
        return;
    };
    let rounds = room.engine.round_number() as u64;
    let winner = room.engine.winner_id().map(str::to_string);
    let snapshot = room.engine.build_snapshot(false);
    for participant in snapshot.participants {
        let escaped = winner.as_deref() == Some(participant.id.as_str());
        state
            .history_store
            .record_game(&participant.identity, rounds, escaped, participant.score);
    }
}

fn next_identity(state: &mut ServerState, wallet_address: Option<&str>) -> String {
    let identity = resolve_identity(wallet_address, state.next_guest_seq);
    if identity.starts_with("guest_") {
        state.next_guest_seq += 1;
    }
    identity
}

fn make_unique_room_code(state: &ServerState) -> String {
    loop {
        let code = make_room_code();
        if !state.rooms.contains_key(&code) {
            return code;
        }
    }
}

fn client_binding(state: &ServerState, client_id: &str) -> Option<(String, String)> {
    state
        .clients
        .get(client_id)
        .and_then(|context| context.binding.clone())
}

fn bind_client(state: &mut ServerState, client_id: &str, code: &str, participant_id: &str) {
    if let Some(context) = state.clients.get_mut(client_id) {
        context.binding = Some((code.to_string(), participant_id.to_string()));
    }
}

fn broadcast_room_state(state: &mut ServerState, code: &str, policy: QueuePolicy) {
    let Some(room) = state.rooms.get_mut(code) else {
        return;
    };
    let snapshot = room.engine.build_snapshot(true);
    broadcast_room(
        state,
        code,
        &json!({
            "type": "state",
            "roomCode": code,
            "snapshot": snapshot,
        }),
        policy,
    );
}

fn broadcast_room(
    state: &mut ServerState,
    code: &str,
    message: &serde_json::Value,
    policy: QueuePolicy,
) {
    let payload = message.to_string();
    let client_ids: Vec<String> = state
        .clients
        .iter()
        .filter(|(_, context)| {
            context
                .binding
                .as_ref()
                .map(|(room_code, _)| room_code == code)
                .unwrap_or(false)
        })
        .map(|(client_id, _)| client_id.clone())
        .collect();

    let mut failed_clients = Vec::new();
    for client_id in client_ids {
        let Some(client) = state.clients.get(&client_id) else {
            continue;
        };
        if client
            .tx
            .try_send(OutboundMessage::Text(payload.clone()))
            .is_err()
            && policy == QueuePolicy::DisconnectOnFull
        {
            failed_clients.push(client_id);
        }
    }
    for client_id in failed_clients {
        if let Some(client) = state.clients.get(&client_id) {
            let _ = client.tx.try_send(OutboundMessage::Close {
                code: 1013,
                reason: "outbound queue overflow".to_string(),
            });
        }
        disconnect_client_internal(state, &client_id);
    }
}

fn send_to_client(
    state: &mut ServerState,
    client_id: &str,
    message: &serde_json::Value,
    policy: QueuePolicy,
) {
    let send_failed = if let Some(client) = state.clients.get(client_id) {
        client
            .tx
            .try_send(OutboundMessage::Text(message.to_string()))
            .is_err()
    } else {
        false
    };
    if send_failed && policy == QueuePolicy::DisconnectOnFull {
        disconnect_client_internal(state, client_id);
    }
}

fn send_error_to_client_locked(state: &mut ServerState, client_id: &str, message: &str) {
    send_to_client(
        state,
        client_id,
        &json!({
            "type": "error",
            "message": message,
        }),
        QueuePolicy::DisconnectOnFull,
    );
}

async fn send_error_to_client(state: &SharedState, client_id: &str, message: &str) {
    let mut guard = state.lock().await;
    send_error_to_client_locked(&mut guard, client_id, message);
}

fn make_id(prefix: &str) -> String {
    let seq = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{seq}")
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_id_is_monotonic_per_prefix() {
        let a = make_id("client");
        let b = make_id("client");
        let suffix = |id: &str| {
            id.rsplit('_')
                .next()
                .and_then(|s| s.parse::<u64>().ok())
                .expect("numeric suffix")
        };
        assert!(suffix(&a) < suffix(&b));
    }

    #[test]
    fn unique_room_code_avoids_existing_rooms() {
        let issuer: Arc<dyn RewardIssuer> =
            Arc::new(MockTestnetIssuer::new(MockIssuerOptions::default()));
        let mut state = ServerState::new(
            HistoryStore::new(std::env::temp_dir().join("echoes-server-test-history.json")),
            issuer,
        );
        let code = make_unique_room_code(&state);
        let room = Room::create(&code, "p_1", "0xabc", RoomConfig::default(), 0)
            .expect("room created");
        state.rooms.insert(code.clone(), room);
        let other = make_unique_room_code(&state);
        assert_ne!(code, other);
    }
}
