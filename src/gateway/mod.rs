/// 소켓 게이트웨이
/// 연결 수명주기(CONNECTING → AUTHENTICATING → READY → CLOSED)를 소유한다.
/// 자격 증명은 업그레이드 요청에서 검증하므로 인증 전 소켓은 READY에
/// 도달하지 못한다. 연결당 송신은 단일 기록자 태스크로 직렬화된다.
// region:    --- Imports
use crate::auth::{AuthenticatedUser, CredentialService};
use crate::bidding::model::normalize_wire_amount;
use crate::bidding::pipeline::{BidError, BidPipeline};
use crate::database::DatabaseManager;
use crate::rooms::{ConnectionHandle, RoomRegistry, OUTBOUND_QUEUE_CAP};
use crate::timesync;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use self::protocol::{ClientEvent, ServerEvent};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;
// endregion: --- Imports

pub mod protocol;

/// 킵얼라이브 핑 주기
const PING_INTERVAL: Duration = Duration::from_secs(30);

// region:    --- Gateway State

/// 게이트웨이 공유 상태
pub struct GatewayState {
    pub rooms: Arc<RoomRegistry>,
    pub pipeline: Arc<BidPipeline>,
    pub credentials: Arc<CredentialService>,
    pub db: Arc<DatabaseManager>,
}

/// 라우터 구성
pub fn create_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

// endregion: --- Gateway State

// region:    --- Handlers

/// 상태 점검
async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let store_ok = sqlx::query("SELECT 1")
        .execute(state.db.pool())
        .await
        .is_ok();
    Json(serde_json::json!({
        "status": if store_ok { "ok" } else { "degraded" },
        "connections": state.rooms.connection_count(),
        "rooms": state.rooms.room_count(),
    }))
}

#[derive(Debug, Deserialize)]
struct AuthParams {
    token: Option<String>,
}

/// WebSocket 업그레이드 처리
/// 업그레이드 전에 자격 증명을 검증하고, 실패하면 사유 코드와 함께 거부한다.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<AuthParams>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let token = bearer_token(&headers).or(params.token);
    let Some(token) = token else {
        return (StatusCode::UNAUTHORIZED, "MISSING_CREDENTIAL").into_response();
    };

    match state.credentials.verify(&token).await {
        Ok(user) => ws.on_upgrade(move |socket| handle_socket(socket, state, user)),
        Err(e) => {
            info!(
                "{:<12} --> 핸드셰이크 인증 실패: {}",
                "Gateway",
                e.reason_code()
            );
            (StatusCode::UNAUTHORIZED, e.reason_code()).into_response()
        }
    }
}

/// Authorization 헤더에서 bearer 토큰 추출
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// 연결 하나의 READY 수명주기
async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>, user: AuthenticatedUser) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // 송신 큐 (상한 초과 시 SlowConsumer 종료)
    let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE_CAP);
    let handle = Arc::new(ConnectionHandle::new(
        user.user_id,
        user.username.clone(),
        tx,
    ));
    state.rooms.register(Arc::clone(&handle));
    info!(
        "{:<12} --> 연결 수립: conn={} user={}",
        "Gateway", handle.id, handle.username
    );

    // 소켓 단일 기록자
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_tx.send(frame).await.is_err() {
                break;
            }
        }
    });

    let mut ping_interval = interval(PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            // SlowConsumer 종료 신호
            _ = handle.killed() => {
                warn!(
                    "{:<12} --> SlowConsumer 연결 종료: conn={}",
                    "Gateway", handle.id
                );
                break;
            }

            // 수신 이벤트 처리
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        dispatch(&state, &handle, text.as_str()).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        handle.enqueue(Message::Pong(data));
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Binary(_))) => {
                        // 텍스트 프로토콜만 지원한다
                        debug!("{:<12} --> 바이너리 프레임 무시", "Gateway");
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!("{:<12} --> 소켓 오류: {:?}", "Gateway", e);
                        break;
                    }
                }
            }

            // 킵얼라이브
            _ = ping_interval.tick() => {
                if !handle.enqueue(Message::Ping(Vec::new().into())) {
                    break;
                }
            }
        }
    }

    // CLOSED: 모든 방에서 제거
    state.rooms.on_disconnect(handle.id);
    send_task.abort();
    info!("{:<12} --> 연결 종료: conn={}", "Gateway", handle.id);
}

/// READY 상태의 수신 이벤트 분배
/// 어휘에 없는 타입은 무시한다.
async fn dispatch(state: &Arc<GatewayState>, handle: &Arc<ConnectionHandle>, text: &str) {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            debug!("{:<12} --> 알 수 없는 이벤트 무시: {}", "Gateway", e);
            return;
        }
    };

    match event {
        ClientEvent::TimeSyncRequest {
            client_timestamp_t0_in_ms,
        } => {
            handle.send(&timesync::respond(client_timestamp_t0_in_ms));
        }
        ClientEvent::JoinAuctionRoom { auction_item_id } => {
            state.rooms.join(handle.id, auction_item_id).await;
        }
        ClientEvent::LeaveAuctionRoom { auction_item_id } => {
            state.rooms.leave(handle.id, auction_item_id);
        }
        ClientEvent::PlaceBid {
            auction_item_id,
            bid_amount_in_dollars,
        } => {
            // 입찰은 수신 루프를 막지 않도록 별도 태스크에서 처리한다
            let state = Arc::clone(state);
            let handle = Arc::clone(handle);
            tokio::spawn(async move {
                handle_place_bid(state, handle, auction_item_id, bid_amount_in_dollars).await;
            });
        }
    }
}

/// PLACE_BID 처리: 파이프라인 호출 후 발신자에게 종결 응답을 보낸다
async fn handle_place_bid(
    state: Arc<GatewayState>,
    handle: Arc<ConnectionHandle>,
    auction_id: Uuid,
    raw_amount: Decimal,
) {
    let amount = normalize_wire_amount(raw_amount);
    let bidder = AuthenticatedUser {
        user_id: handle.user_id,
        username: handle.username.clone(),
    };

    match state.pipeline.place_bid(auction_id, &bidder, amount).await {
        Ok(result) => {
            handle.send(&ServerEvent::BidPlacedSuccess {
                auction_item_id: auction_id,
                bid_amount_in_dollars: result.amount_accepted,
                bid_id: result.bid_id,
                bid_placed_at_timestamp: result.accepted_at.timestamp_millis(),
            });
        }
        Err(e) => {
            let minimum_required = match &e {
                BidError::BidTooLow { required } => Some(*required),
                _ => None,
            };
            handle.send(&ServerEvent::BidPlacedError {
                auction_item_id: auction_id,
                error_code: e.code().to_string(),
                error_message: e.to_string(),
                minimum_required_bid_in_dollars: minimum_required,
            });
        }
    }
}

// endregion: --- Handlers
