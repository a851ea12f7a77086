/// 입찰 파이프라인
/// 검증 → 락 → 커밋 → 캐시 → 브로드캐스트 순서로 입찰 하나를 끝까지 처리한다.
/// 같은 경매의 성공 입찰은 경매별 락 덕분에 전역 순서를 가지며, 조건부 갱신이
/// 락 만료나 분할 뇌에 대한 이중 방어가 된다.
// region:    --- Imports
use crate::auth::AuthenticatedUser;
use crate::bidding::model::{has_valid_scale, Bid, STATUS_ACTIVE};
use crate::coordinator::{
    RedisManager, AUCTION_CACHE_TTL_SECS, CURRENT_BID_KEY_PREFIX, HIGHEST_BIDDER_KEY_PREFIX,
};
use crate::database::DatabaseManager;
use crate::gateway::protocol::ServerEvent;
use crate::lock::{BidLockService, LockError};
use crate::rooms::RoomRegistry;
use crate::store;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;
// endregion: --- Imports

// region:    --- Bid Result

/// 수락된 입찰
#[derive(Debug, Clone, Serialize)]
pub struct BidResult {
    pub bid_id: Uuid,
    pub auction_id: Uuid,
    pub amount_accepted: Decimal,
    pub accepted_at: DateTime<Utc>,
    pub total_bids: i64,
}

// endregion: --- Bid Result

// region:    --- Bid Errors

/// 입찰 거부/실패 사유
/// 앞의 일곱 가지는 클라이언트 귀책으로 연결을 닫지 않고 회신만 한다.
#[derive(Debug, Error)]
pub enum BidError {
    #[error("입찰 금액이 잘못되었습니다")]
    InvalidAmount,
    #[error("경매를 찾을 수 없습니다")]
    AuctionNotFound,
    #[error("경매가 이미 종료되었습니다")]
    AuctionEnded,
    #[error("경매가 아직 시작되지 않았습니다")]
    AuctionNotStarted,
    #[error("자신이 등록한 경매에는 입찰할 수 없습니다")]
    OwnAuction,
    #[error("입찰 금액이 최소 요구 금액 {required}보다 낮습니다")]
    BidTooLow { required: Decimal },
    #[error("경매 락을 획득하지 못했습니다. 다시 시도해 주세요")]
    LockUnavailable,
    #[error("동시 입찰 충돌이 발생했습니다. 다시 시도해 주세요")]
    Conflict,
    #[error("코디네이터를 사용할 수 없습니다")]
    CoordinatorUnavailable,
    #[error("저장소를 사용할 수 없습니다")]
    StoreUnavailable,
    #[error("내부 오류가 발생했습니다")]
    InternalError,
}

impl BidError {
    /// 클라이언트에 노출되는 안정적 오류 코드
    pub fn code(&self) -> &'static str {
        match self {
            BidError::InvalidAmount => "INVALID_AMOUNT",
            BidError::AuctionNotFound => "AUCTION_NOT_FOUND",
            BidError::AuctionEnded => "AUCTION_ENDED",
            BidError::AuctionNotStarted => "AUCTION_NOT_STARTED",
            BidError::OwnAuction => "OWN_AUCTION",
            BidError::BidTooLow { .. } => "BID_TOO_LOW",
            BidError::LockUnavailable => "LOCK_UNAVAILABLE",
            BidError::Conflict => "CONFLICT",
            BidError::CoordinatorUnavailable => "COORDINATOR_UNAVAILABLE",
            BidError::StoreUnavailable => "STORE_UNAVAILABLE",
            BidError::InternalError => "INTERNAL_ERROR",
        }
    }

    /// 즉시 재시도해도 안전한 오류인지
    pub fn retryable(&self) -> bool {
        matches!(self, BidError::LockUnavailable | BidError::Conflict)
    }
}

impl From<LockError> for BidError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Unavailable => BidError::LockUnavailable,
            LockError::Coordinator(_) => BidError::CoordinatorUnavailable,
        }
    }
}

/// 저장소 오류 분류: 연결/시한 문제는 재시도 가능한 가용성 오류로,
/// 그 외는 내부 오류로 올린다.
fn map_store_error(e: sqlx::Error) -> BidError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            BidError::StoreUnavailable
        }
        _ => BidError::InternalError,
    }
}

// endregion: --- Bid Errors

// region:    --- Bid Pipeline

pub struct BidPipeline {
    db: Arc<DatabaseManager>,
    coordinator: Arc<RedisManager>,
    lock: Arc<BidLockService>,
    rooms: Arc<RoomRegistry>,
}

impl BidPipeline {
    pub fn new(
        db: Arc<DatabaseManager>,
        coordinator: Arc<RedisManager>,
        lock: Arc<BidLockService>,
        rooms: Arc<RoomRegistry>,
    ) -> Self {
        Self {
            db,
            coordinator,
            lock,
            rooms,
        }
    }

    /// 입찰 처리
    pub async fn place_bid(
        &self,
        auction_id: Uuid,
        bidder: &AuthenticatedUser,
        amount: Decimal,
    ) -> Result<BidResult, BidError> {
        let started = Instant::now();
        info!(
            "{:<12} --> 입찰 요청: auction={} bidder={} amount={}",
            "Bid", auction_id, bidder.username, amount
        );

        // 1. 형태 검증: 0 이하이거나 소수 둘째 자리를 넘는 금액은 락 없이 거부
        if amount <= Decimal::ZERO || !has_valid_scale(amount) {
            return Err(BidError::InvalidAmount);
        }

        // 2~3. 배타 구간: 검증과 커밋, 브로드캐스트까지 경매별 락 아래에서 수행
        let outcome = self
            .lock
            .with(auction_id, || {
                self.commit_under_lock(auction_id, bidder, amount, started)
            })
            .await;

        let result = match outcome {
            Ok(inner) => inner,
            Err(e) => Err(BidError::from(e)),
        };

        // 저장소 트랜잭션이 터진 경우에 한해 락 밖에서 감사 기록을 남긴다
        if matches!(result, Err(BidError::InternalError)) {
            let elapsed_ms = started.elapsed().as_millis() as i64;
            if let Err(e) = store::insert_failed_bid(
                &self.db,
                auction_id,
                bidder.user_id,
                amount,
                Utc::now(),
                elapsed_ms,
            )
            .await
            {
                warn!("{:<12} --> 감사 기록 실패: {:?}", "Bid", e);
            }
        }

        result
    }

    /// 배타 구간 본문
    async fn commit_under_lock(
        &self,
        auction_id: Uuid,
        bidder: &AuthenticatedUser,
        amount: Decimal,
        started: Instant,
    ) -> Result<BidResult, BidError> {
        // a. 경매 조회
        let auction = store::find_auction_by_id(&self.db, auction_id)
            .await
            .map_err(map_store_error)?
            .ok_or(BidError::AuctionNotFound)?;

        let now = Utc::now();

        // b~d. 상태 / 시각 / 소유자 검증
        if auction.status != STATUS_ACTIVE || now >= auction.end_time {
            return Err(BidError::AuctionEnded);
        }
        if now < auction.start_time {
            return Err(BidError::AuctionNotStarted);
        }
        if auction.creator_user_id == bidder.user_id {
            return Err(BidError::OwnAuction);
        }

        // e. 최소 요구 금액 검증
        let required = auction.current_highest_bid + auction.minimum_increment;
        if amount < required {
            return Err(BidError::BidTooLow { required });
        }

        // f. 원자적 커밋: 조건부 최고가 갱신 + 입찰 기록 + 입찰 수
        let expected = auction.current_highest_bid;
        let bidder_id = bidder.user_id;
        let processing_ms = started.elapsed().as_millis() as i64;
        let committed: Result<Option<(Bid, i64)>, sqlx::Error> = self
            .db
            .transaction(move |tx| {
                Box::pin(async move {
                    let bumped =
                        store::conditional_price_bump(tx, auction_id, expected, amount, now)
                            .await?;
                    if !bumped {
                        return Ok(None);
                    }
                    let bid = store::insert_bid(
                        tx,
                        auction_id,
                        bidder_id,
                        amount,
                        now,
                        processing_ms,
                    )
                    .await?;
                    let total = store::count_successful_bids_tx(tx, auction_id).await?;
                    Ok(Some((bid, total)))
                })
            })
            .await;

        let (bid, total_bids) = match committed {
            Ok(Some(committed)) => committed,
            Ok(None) => {
                // 리퍼가 먼저 종료를 커밋했거나 락 TTL이 트랜잭션 중에 만료된 경우.
                // 수락으로 위장하지 않는다.
                warn!(
                    "{:<12} --> 조건부 갱신 충돌: auction={} expected={}",
                    "Bid", auction_id, expected
                );
                return Err(BidError::Conflict);
            }
            Err(e) => {
                error!("{:<12} --> 입찰 트랜잭션 실패: {:?}", "Bid", e);
                return Err(map_store_error(e));
            }
        };

        // g. 자문적 캐시 갱신 (실패해도 입찰은 성공)
        self.refresh_cache(auction_id, amount, bidder_id).await;

        // 브로드캐스트: 커밋 직후, 락 해제 전에 적재해 경매별 순서를 보존한다
        self.rooms.broadcast(
            auction_id,
            &ServerEvent::BidUpdateBroadcast {
                auction_item_id: auction_id,
                new_highest_bid_in_dollars: amount,
                highest_bidder_user_id: bidder_id,
                highest_bidder_username: bidder.username.clone(),
                bid_placed_at_timestamp: now.timestamp_millis(),
                total_number_of_bids: total_bids,
            },
        );

        info!(
            "{:<12} --> 입찰 수락: auction={} amount={} total={}",
            "Bid", auction_id, amount, total_bids
        );
        Ok(BidResult {
            bid_id: bid.id,
            auction_id,
            amount_accepted: amount,
            accepted_at: now,
            total_bids,
        })
    }

    /// 코디네이터 캐시 갱신 (60초 TTL)
    async fn refresh_cache(&self, auction_id: Uuid, amount: Decimal, bidder_id: Uuid) {
        let bid_key = format!("{}{}", CURRENT_BID_KEY_PREFIX, auction_id);
        if let Err(e) = self
            .coordinator
            .set_with_ttl(&bid_key, &amount.to_string(), AUCTION_CACHE_TTL_SECS)
            .await
        {
            warn!("{:<12} --> 최고가 캐시 갱신 실패: {:?}", "Bid", e);
        }

        let bidder_key = format!("{}{}", HIGHEST_BIDDER_KEY_PREFIX, auction_id);
        if let Err(e) = self
            .coordinator
            .set_with_ttl(&bidder_key, &bidder_id.to_string(), AUCTION_CACHE_TTL_SECS)
            .await
        {
            warn!("{:<12} --> 최고 입찰자 캐시 갱신 실패: {:?}", "Bid", e);
        }
    }
}

// endregion: --- Bid Pipeline

// region:    --- Tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_stable() {
        assert_eq!(BidError::InvalidAmount.code(), "INVALID_AMOUNT");
        assert_eq!(BidError::AuctionNotFound.code(), "AUCTION_NOT_FOUND");
        assert_eq!(BidError::AuctionEnded.code(), "AUCTION_ENDED");
        assert_eq!(BidError::AuctionNotStarted.code(), "AUCTION_NOT_STARTED");
        assert_eq!(BidError::OwnAuction.code(), "OWN_AUCTION");
        assert_eq!(
            BidError::BidTooLow {
                required: Decimal::new(12000, 2)
            }
            .code(),
            "BID_TOO_LOW"
        );
        assert_eq!(BidError::LockUnavailable.code(), "LOCK_UNAVAILABLE");
        assert_eq!(BidError::Conflict.code(), "CONFLICT");
        assert_eq!(
            BidError::CoordinatorUnavailable.code(),
            "COORDINATOR_UNAVAILABLE"
        );
        assert_eq!(BidError::StoreUnavailable.code(), "STORE_UNAVAILABLE");
        assert_eq!(BidError::InternalError.code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(BidError::LockUnavailable.retryable());
        assert!(BidError::Conflict.retryable());
        assert!(!BidError::AuctionEnded.retryable());
        assert!(!BidError::StoreUnavailable.retryable());
    }

    #[test]
    fn test_bid_too_low_message_carries_required() {
        let e = BidError::BidTooLow {
            required: Decimal::new(12000, 2),
        };
        assert!(e.to_string().contains("120.00"));
    }
}

// endregion: --- Tests
