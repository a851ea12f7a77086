/// 경매 방 레지스트리
/// 복제본 로컬의 `경매 id → 구독자 집합` 매핑과 팬아웃을 담당한다.
/// 멤버십 변경은 샤드 단위 배타 가드 아래에서 일어나고, 브로드캐스트는
/// 멤버십 스냅샷을 떠서 순회하므로 소켓 쓰기 동안 가드를 잡지 않는다.
// region:    --- Imports
use crate::bidding::model::{STATUS_ACTIVE, STATUS_ENDED};
use crate::coordinator::{RedisManager, CURRENT_BID_KEY_PREFIX, HIGHEST_BIDDER_KEY_PREFIX};
use crate::database::DatabaseManager;
use crate::gateway::protocol::ServerEvent;
use crate::store;
use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;
// endregion: --- Imports

/// 연결당 송신 큐 상한. 초과하면 SlowConsumer로 연결을 닫는다.
pub const OUTBOUND_QUEUE_CAP: usize = 64;

// region:    --- Connection Handle

/// 연결 하나의 송신측 핸들
/// 소켓 쓰기는 이 핸들의 큐를 비우는 단일 기록자 태스크만 수행한다.
pub struct ConnectionHandle {
    pub id: Uuid,
    pub user_id: Uuid,
    pub username: String,
    pub connected_at: DateTime<Utc>,
    tx: mpsc::Sender<Message>,
    kill: Notify,
}

impl ConnectionHandle {
    pub fn new(user_id: Uuid, username: String, tx: mpsc::Sender<Message>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            username,
            connected_at: Utc::now(),
            tx,
            kill: Notify::new(),
        }
    }

    /// 이벤트를 직렬화해 송신 큐에 적재
    pub fn send(&self, event: &ServerEvent) -> bool {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                warn!("{:<12} --> 이벤트 직렬화 실패: {:?}", "Room", e);
                return false;
            }
        };
        self.enqueue(Message::Text(json.into()))
    }

    /// 프레임 적재. 큐가 가득 차면 연결을 종료 대상으로 표시한다.
    pub fn enqueue(&self, frame: Message) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    "{:<12} --> 송신 큐 초과(SlowConsumer): conn={} user={}",
                    "Room", self.id, self.username
                );
                self.kill.notify_one();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// SlowConsumer 종료 신호 대기
    pub async fn killed(&self) {
        self.kill.notified().await;
    }
}

// endregion: --- Connection Handle

// region:    --- Room Registry

pub struct RoomRegistry {
    /// 연결 id → 핸들
    connections: DashMap<Uuid, Arc<ConnectionHandle>>,
    /// 경매 id → 구독 중인 연결 id 집합
    rooms: DashMap<Uuid, DashSet<Uuid>>,
    db: Arc<DatabaseManager>,
    coordinator: Arc<RedisManager>,
}

impl RoomRegistry {
    pub fn new(db: Arc<DatabaseManager>, coordinator: Arc<RedisManager>) -> Self {
        Self {
            connections: DashMap::new(),
            rooms: DashMap::new(),
            db,
            coordinator,
        }
    }

    /// 연결 등록
    pub fn register(&self, handle: Arc<ConnectionHandle>) {
        info!(
            "{:<12} --> 연결 등록: conn={} user={}",
            "Room", handle.id, handle.username
        );
        self.connections.insert(handle.id, handle);
    }

    /// 방 입장
    /// 기준 스냅샷 회신이 끝난 뒤에야 멤버십을 넣는다. 그래야 스냅샷보다
    /// 먼저 브로드캐스트가 도착하는 일이 없다.
    pub async fn join(&self, connection_id: Uuid, auction_id: Uuid) {
        let Some(handle) = self
            .connections
            .get(&connection_id)
            .map(|h| Arc::clone(&h))
        else {
            return;
        };

        handle.send(&ServerEvent::JoinedAuctionRoom {
            auction_item_id: auction_id,
        });

        match self.load_snapshot(auction_id).await {
            Ok(Some(snapshot)) => {
                handle.send(&snapshot);
            }
            Ok(None) => {
                debug!(
                    "{:<12} --> 스냅샷 대상 경매 없음: {}",
                    "Room", auction_id
                );
            }
            Err(e) => {
                warn!("{:<12} --> 스냅샷 조회 실패: {:?}", "Room", e);
            }
        }

        self.rooms
            .entry(auction_id)
            .or_default()
            .insert(connection_id);
        debug!(
            "{:<12} --> 방 입장: auction={} conn={}",
            "Room", auction_id, connection_id
        );
    }

    /// 방 퇴장. 마지막 구독자가 나가면 방을 비운다.
    pub fn leave(&self, connection_id: Uuid, auction_id: Uuid) {
        if let Some(members) = self.rooms.get(&auction_id) {
            members.remove(&connection_id);
        }
        self.rooms.remove_if(&auction_id, |_, members| members.is_empty());

        if let Some(handle) = self.connections.get(&connection_id) {
            handle.send(&ServerEvent::LeftAuctionRoom {
                auction_item_id: auction_id,
            });
        }
        debug!(
            "{:<12} --> 방 퇴장: auction={} conn={}",
            "Room", auction_id, connection_id
        );
    }

    /// 방 전체에 이벤트 전달 (최선 노력, 송신 대기 없음)
    pub fn broadcast(&self, auction_id: Uuid, event: &ServerEvent) {
        // 가드를 잡은 채 소켓에 쓰지 않도록 멤버십 스냅샷을 먼저 뜬다
        let members: Vec<Arc<ConnectionHandle>> = {
            let Some(room) = self.rooms.get(&auction_id) else {
                return;
            };
            room.iter()
                .filter_map(|id| self.connections.get(id.key()).map(|h| Arc::clone(&h)))
                .collect()
        };
        if members.is_empty() {
            return;
        }

        // 직렬화는 한 번만
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                warn!("{:<12} --> 브로드캐스트 직렬화 실패: {:?}", "Room", e);
                return;
            }
        };
        for handle in members {
            handle.enqueue(Message::Text(json.clone().into()));
        }
    }

    /// 연결 종료 처리: 모든 방에서 제거
    pub fn on_disconnect(&self, connection_id: Uuid) {
        if let Some((_, handle)) = self.connections.remove(&connection_id) {
            info!(
                "{:<12} --> 연결 해제: conn={} user={}",
                "Room", connection_id, handle.username
            );
        }
        for room in self.rooms.iter() {
            room.value().remove(&connection_id);
        }
        self.rooms.retain(|_, members| !members.is_empty());
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// 입장 스냅샷 구성
    /// 최고가/최고 입찰자는 캐시를 먼저 보고, 미스나 캐시 열세면 저장소 값을 쓴다.
    async fn load_snapshot(
        &self,
        auction_id: Uuid,
    ) -> Result<Option<ServerEvent>, sqlx::Error> {
        let Some(auction) = store::find_auction_by_id(&self.db, auction_id).await? else {
            return Ok(None);
        };
        let total_bids = store::count_successful_bids(&self.db, auction_id).await?;
        let highest = store::find_highest_bidder(&self.db, auction_id).await?;

        let mut current_bid = auction.current_highest_bid;
        let mut bidder_id = highest.as_ref().map(|h| h.bidder_user_id);
        let mut bidder_username = highest.map(|h| h.username);

        // 캐시가 저장소보다 앞서 있으면(커밋 직후의 짧은 창) 캐시 값을 쓴다
        if let Some((cached_bid, cached_bidder)) = self.cached_bid_state(auction_id).await {
            if cached_bid > current_bid {
                current_bid = cached_bid;
                bidder_username = store::find_username(&self.db, cached_bidder).await?;
                bidder_id = Some(cached_bidder);
            }
        }

        Ok(Some(ServerEvent::AuctionStateSync {
            auction_item_id: auction_id,
            current_highest_bid_in_dollars: current_bid,
            highest_bidder_user_id: bidder_id,
            highest_bidder_username: bidder_username,
            auction_end_time_in_ms: auction.end_time.timestamp_millis(),
            auction_status: if auction.status == STATUS_ACTIVE
                && Utc::now() >= auction.end_time
            {
                // 리퍼가 아직 돌지 않은 만료 경매는 종료로 보여 준다
                STATUS_ENDED.to_string()
            } else {
                auction.status
            },
            total_number_of_bids: total_bids,
        }))
    }

    /// 코디네이터 캐시의 (최고가, 최고 입찰자) 쌍 조회. 실패는 미스로 취급.
    async fn cached_bid_state(&self, auction_id: Uuid) -> Option<(Decimal, Uuid)> {
        let bid_key = format!("{}{}", CURRENT_BID_KEY_PREFIX, auction_id);
        let bidder_key = format!("{}{}", HIGHEST_BIDDER_KEY_PREFIX, auction_id);
        let cached_bid = self.coordinator.get(&bid_key).await.ok()??;
        let cached_bidder = self.coordinator.get(&bidder_key).await.ok()??;
        let amount = Decimal::from_str(&cached_bid).ok()?;
        let bidder = Uuid::parse_str(&cached_bidder).ok()?;
        Some((amount, bidder))
    }
}

// endregion: --- Room Registry

// region:    --- Tests

#[cfg(test)]
mod tests {
    use super::*;

    fn handle_with_queue(cap: usize) -> (Arc<ConnectionHandle>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(cap);
        let handle = Arc::new(ConnectionHandle::new(
            Uuid::new_v4(),
            "bidder".to_string(),
            tx,
        ));
        (handle, rx)
    }

    #[tokio::test]
    async fn test_send_serializes_event() {
        let (handle, mut rx) = handle_with_queue(OUTBOUND_QUEUE_CAP);
        assert!(handle.send(&ServerEvent::JoinedAuctionRoom {
            auction_item_id: Uuid::nil(),
        }));
        let frame = rx.recv().await.unwrap();
        match frame {
            Message::Text(text) => {
                assert!(text.contains(r#""type":"JOINED_AUCTION_ROOM""#));
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_queue_overflow_triggers_kill() {
        let (handle, _rx) = handle_with_queue(2);
        let event = ServerEvent::JoinedAuctionRoom {
            auction_item_id: Uuid::nil(),
        };
        assert!(handle.send(&event));
        assert!(handle.send(&event));
        // 큐 상한을 넘기면 적재가 거부되고 종료 신호가 남는다
        assert!(!handle.send(&event));
        tokio::time::timeout(std::time::Duration::from_millis(100), handle.killed())
            .await
            .expect("SlowConsumer 종료 신호가 와야 한다");
    }
}

// endregion: --- Tests
