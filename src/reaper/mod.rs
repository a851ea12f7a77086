/// 만료 경매 리퍼
/// 고정 주기로 깨어나 종료 시각이 지난 ACTIVE 경매를 ENDED로 전이시키고
/// 낙찰자를 선정해 방에 종료 알림을 밀어 넣는다.
/// 모든 변경이 status = 'ACTIVE' 조건을 타므로 복제본 여럿이 돌아도 멱등하다.
// region:    --- Imports
use crate::database::DatabaseManager;
use crate::gateway::protocol::ServerEvent;
use crate::rooms::RoomRegistry;
use crate::store;
use chrono::Utc;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info};
// endregion: --- Imports

// region:    --- Expiry Reaper

pub struct ExpiryReaper {
    db: Arc<DatabaseManager>,
    rooms: Arc<RoomRegistry>,
    tick_ms: u64,
}

impl ExpiryReaper {
    pub fn new(db: Arc<DatabaseManager>, rooms: Arc<RoomRegistry>, tick_ms: u64) -> Self {
        Self { db, rooms, tick_ms }
    }

    /// 리퍼 시작
    /// 틱 처리 중의 오류는 기록만 하고 다음 틱에서 다시 시도한다.
    pub fn start(&self) {
        let db = Arc::clone(&self.db);
        let rooms = Arc::clone(&self.rooms);
        let tick_ms = self.tick_ms;
        tokio::spawn(async move {
            let mut interval = interval(Duration::from_millis(tick_ms));
            loop {
                interval.tick().await;
                if let Err(e) = Self::reap(&db, &rooms).await {
                    error!(
                        "{:<12} --> 경매 종료 처리 중 오류 발생: {:?}",
                        "Reaper", e
                    );
                }
                if let Err(e) = store::cleanup_expired_revocations(&db, Utc::now()).await {
                    error!(
                        "{:<12} --> 철회 기록 정리 중 오류 발생: {:?}",
                        "Reaper", e
                    );
                }
            }
        });
    }

    /// 틱 본문: 종료 전이 → 낙찰자 선정 → 종료 알림
    async fn reap(db: &DatabaseManager, rooms: &RoomRegistry) -> Result<(), sqlx::Error> {
        let now = Utc::now();

        let ended = store::end_expired_auctions(db, now).await?;
        if ended.is_empty() {
            debug!("{:<12} --> 종료 대상 경매 없음", "Reaper");
            return Ok(());
        }
        info!("{:<12} --> 경매 {}건 종료 처리", "Reaper", ended.len());

        let results = store::pick_winners(db, &ended).await?;
        for ended_auction in results {
            info!(
                "{:<12} --> 경매 종료: auction={} winner={:?} final={}",
                "Reaper",
                ended_auction.auction_id,
                ended_auction.winner_user_id,
                ended_auction.final_amount
            );
            rooms.broadcast(
                ended_auction.auction_id,
                &ServerEvent::AuctionEndedNotification {
                    auction_item_id: ended_auction.auction_id,
                    winner_user_id: ended_auction.winner_user_id,
                    winner_username: ended_auction.winner_username.clone(),
                    final_bid_amount_in_dollars: ended_auction.final_amount,
                    auction_ended_at_timestamp: ended_auction.end_time.timestamp_millis(),
                },
            );
        }

        Ok(())
    }
}

// endregion: --- Expiry Reaper
