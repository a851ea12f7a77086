/// 관계형 저장소 어댑터
/// 다른 컴포넌트가 필요로 하는 연산만 얇게 노출한다. 변경 연산은 모두 트랜잭션으로 실행된다.
// region:    --- Imports
use crate::bidding::model::{Auction, Bid, RevokedCredential};
use crate::database::{with_deadline, DatabaseManager};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Postgres, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

pub mod queries;

// endregion: --- Imports

// region:    --- Row Types

/// 낙찰자 선정 후보
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WinnerCandidate {
    pub id: Uuid,
    pub bidder_user_id: Uuid,
    pub amount: Decimal,
    pub placed_at: DateTime<Utc>,
}

/// 최고 입찰자
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HighestBidder {
    pub bidder_user_id: Uuid,
    pub username: String,
}

/// 종료 처리된 경매 요약
#[derive(Debug, Clone)]
pub struct EndedAuction {
    pub auction_id: Uuid,
    pub end_time: DateTime<Utc>,
    pub final_amount: Decimal,
    pub winner_user_id: Option<Uuid>,
    pub winner_username: Option<String>,
}

// endregion: --- Row Types

// region:    --- Auction Operations

/// 경매 단건 조회
pub async fn find_auction_by_id(
    db: &DatabaseManager,
    auction_id: Uuid,
) -> Result<Option<Auction>, sqlx::Error> {
    debug!("{:<12} --> 경매 조회 id: {}", "Store", auction_id);
    with_deadline(
        sqlx::query_as::<_, Auction>(queries::FIND_AUCTION_BY_ID)
            .bind(auction_id)
            .fetch_optional(db.pool()),
    )
    .await
}

/// 조건부 최고가 갱신
/// 읽어 둔 최고가가 바뀌지 않았고 경매가 아직 ACTIVE일 때에만 갱신하고,
/// 갱신 성공 여부를 돌려준다.
pub async fn conditional_price_bump(
    tx: &mut Transaction<'_, Postgres>,
    auction_id: Uuid,
    expected_current: Decimal,
    new_price: Decimal,
    updated_at: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(queries::CONDITIONAL_PRICE_BUMP)
        .bind(auction_id)
        .bind(new_price)
        .bind(updated_at)
        .bind(expected_current)
        .execute(&mut **tx)
        .await?;
    Ok(result.rows_affected() == 1)
}

// endregion: --- Auction Operations

// region:    --- Bid Operations

/// 성공 입찰 기록 삽입
pub async fn insert_bid(
    tx: &mut Transaction<'_, Postgres>,
    auction_id: Uuid,
    bidder_user_id: Uuid,
    amount: Decimal,
    placed_at: DateTime<Utc>,
    processing_time_ms: i64,
) -> Result<Bid, sqlx::Error> {
    sqlx::query_as::<_, Bid>(queries::INSERT_BID)
        .bind(Uuid::new_v4())
        .bind(auction_id)
        .bind(bidder_user_id)
        .bind(amount)
        .bind(placed_at)
        .bind(processing_time_ms)
        .fetch_one(&mut **tx)
        .await
}

/// 성공 입찰 수 조회 (트랜잭션 내부)
pub async fn count_successful_bids_tx(
    tx: &mut Transaction<'_, Postgres>,
    auction_id: Uuid,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(queries::COUNT_SUCCESSFUL_BIDS)
        .bind(auction_id)
        .fetch_one(&mut **tx)
        .await
}

/// 성공 입찰 수 조회
pub async fn count_successful_bids(
    db: &DatabaseManager,
    auction_id: Uuid,
) -> Result<i64, sqlx::Error> {
    with_deadline(
        sqlx::query_scalar::<_, i64>(queries::COUNT_SUCCESSFUL_BIDS)
            .bind(auction_id)
            .fetch_one(db.pool()),
    )
    .await
}

/// 실패 입찰 감사 기록 삽입 (최선 노력)
pub async fn insert_failed_bid(
    db: &DatabaseManager,
    auction_id: Uuid,
    bidder_user_id: Uuid,
    amount: Decimal,
    placed_at: DateTime<Utc>,
    processing_time_ms: i64,
) -> Result<(), sqlx::Error> {
    info!(
        "{:<12} --> 실패 입찰 감사 기록: auction={} bidder={}",
        "Store", auction_id, bidder_user_id
    );
    with_deadline(async {
        sqlx::query(queries::INSERT_FAILED_BID)
            .bind(Uuid::new_v4())
            .bind(auction_id)
            .bind(bidder_user_id)
            .bind(amount)
            .bind(placed_at)
            .bind(processing_time_ms)
            .execute(db.pool())
            .await?;
        Ok(())
    })
    .await
}

/// 최고 입찰자 조회
pub async fn find_highest_bidder(
    db: &DatabaseManager,
    auction_id: Uuid,
) -> Result<Option<HighestBidder>, sqlx::Error> {
    debug!("{:<12} --> 최고 입찰자 조회 id: {}", "Store", auction_id);
    with_deadline(
        sqlx::query_as::<_, HighestBidder>(queries::FIND_HIGHEST_BIDDER)
            .bind(auction_id)
            .fetch_optional(db.pool()),
    )
    .await
}

/// 사용자 이름 조회
pub async fn find_username(
    db: &DatabaseManager,
    user_id: Uuid,
) -> Result<Option<String>, sqlx::Error> {
    with_deadline(
        sqlx::query_scalar::<_, String>(queries::FIND_USERNAME)
            .bind(user_id)
            .fetch_optional(db.pool()),
    )
    .await
}

// endregion: --- Bid Operations

// region:    --- Expiry Operations

/// 종료 시각이 지난 ACTIVE 경매를 일괄 종료하고 대상 id를 돌려준다
pub async fn end_expired_auctions(
    db: &DatabaseManager,
    now: DateTime<Utc>,
) -> Result<Vec<Uuid>, sqlx::Error> {
    db.transaction(|tx| {
        Box::pin(async move {
            sqlx::query_scalar::<_, Uuid>(queries::END_EXPIRED_AUCTIONS)
                .bind(now)
                .fetch_all(&mut **tx)
                .await
        })
    })
    .await
}

/// 낙찰자 선정 순서: 금액 내림차순 → placed_at 오름차순 → bid id 사전순
pub fn select_winner(candidates: &[WinnerCandidate]) -> Option<&WinnerCandidate> {
    candidates.iter().min_by(|a, b| {
        b.amount
            .cmp(&a.amount)
            .then_with(|| a.placed_at.cmp(&b.placed_at))
            .then_with(|| a.id.cmp(&b.id))
    })
}

/// 종료된 경매들의 낙찰자를 선정해 기록한다
/// 이미 낙찰자가 기록된 경매는 그대로 두므로 반복 실행해도 결과가 같다.
pub async fn pick_winners(
    db: &DatabaseManager,
    ended: &[Uuid],
) -> Result<Vec<EndedAuction>, sqlx::Error> {
    let mut results = Vec::with_capacity(ended.len());
    for &auction_id in ended {
        let Some(auction) = find_auction_by_id(db, auction_id).await? else {
            continue;
        };
        let candidates = list_successful_bids(db, auction_id).await?;

        let (winner_user_id, winner_username) = if let Some(existing) = auction.winner_user_id {
            (Some(existing), find_username(db, existing).await?)
        } else if let Some(winner) = select_winner(&candidates) {
            assign_winner(db, auction_id, winner.bidder_user_id, Utc::now()).await?;
            info!(
                "{:<12} --> 낙찰자 기록: auction={} winner={}",
                "Store", auction_id, winner.bidder_user_id
            );
            (
                Some(winner.bidder_user_id),
                find_username(db, winner.bidder_user_id).await?,
            )
        } else {
            // 성공 입찰이 없으면 낙찰자 없이 종료
            (None, None)
        };

        results.push(EndedAuction {
            auction_id,
            end_time: auction.end_time,
            final_amount: auction.current_highest_bid,
            winner_user_id,
            winner_username,
        });
    }
    Ok(results)
}

/// 낙찰자 선정 대상 성공 입찰 조회
async fn list_successful_bids(
    db: &DatabaseManager,
    auction_id: Uuid,
) -> Result<Vec<WinnerCandidate>, sqlx::Error> {
    with_deadline(
        sqlx::query_as::<_, WinnerCandidate>(queries::LIST_SUCCESSFUL_BIDS)
            .bind(auction_id)
            .fetch_all(db.pool()),
    )
    .await
}

/// 낙찰자 기록
async fn assign_winner(
    db: &DatabaseManager,
    auction_id: Uuid,
    winner_user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    db.transaction(|tx| {
        Box::pin(async move {
            sqlx::query(queries::ASSIGN_WINNER)
                .bind(auction_id)
                .bind(winner_user_id)
                .bind(now)
                .execute(&mut **tx)
                .await?;
            Ok(())
        })
    })
    .await
}

// endregion: --- Expiry Operations

// region:    --- Revocation Operations

/// 자격 증명 철회 기록
pub async fn insert_revoked_credential(
    db: &DatabaseManager,
    credential: &str,
    revoked_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    let credential = credential.to_string();
    db.transaction(move |tx| {
        Box::pin(async move {
            sqlx::query(queries::INSERT_REVOKED_CREDENTIAL)
                .bind(&credential)
                .bind(revoked_at)
                .bind(expires_at)
                .execute(&mut **tx)
                .await?;
            Ok(())
        })
    })
    .await
}

/// 철회 여부 조회
pub async fn lookup_revoked_credential(
    db: &DatabaseManager,
    credential: &str,
    now: DateTime<Utc>,
) -> Result<Option<RevokedCredential>, sqlx::Error> {
    with_deadline(
        sqlx::query_as::<_, RevokedCredential>(queries::LOOKUP_REVOKED_CREDENTIAL)
            .bind(credential)
            .bind(now)
            .fetch_optional(db.pool()),
    )
    .await
}

/// 만료된 철회 기록 정리
pub async fn cleanup_expired_revocations(
    db: &DatabaseManager,
    now: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let removed = db
        .transaction(|tx| {
            Box::pin(async move {
                let result = sqlx::query(queries::CLEANUP_EXPIRED_REVOCATIONS)
                    .bind(now)
                    .execute(&mut **tx)
                    .await?;
                Ok::<u64, sqlx::Error>(result.rows_affected())
            })
        })
        .await?;
    if removed > 0 {
        debug!(
            "{:<12} --> 만료된 철회 기록 {}건 정리",
            "Store", removed
        );
    }
    Ok(removed)
}

// endregion: --- Revocation Operations

// region:    --- Tests

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn candidate(
        id: &str,
        bidder: Uuid,
        amount: i64,
        placed_at_ms: i64,
    ) -> WinnerCandidate {
        WinnerCandidate {
            id: Uuid::parse_str(id).unwrap(),
            bidder_user_id: bidder,
            amount: Decimal::new(amount, 2),
            placed_at: DateTime::from_timestamp_millis(placed_at_ms).unwrap(),
        }
    }

    #[test]
    fn test_winner_is_highest_amount() {
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let bids = vec![
            candidate("00000000-0000-0000-0000-000000000001", b, 11000, 1_000),
            candidate("00000000-0000-0000-0000-000000000002", c, 12000, 2_000),
            candidate("00000000-0000-0000-0000-000000000003", b, 13000, 3_000),
        ];
        let winner = select_winner(&bids).unwrap();
        assert_eq!(winner.bidder_user_id, b);
        assert_eq!(winner.amount, Decimal::new(13000, 2));
    }

    #[test]
    fn test_amount_tie_broken_by_earliest_placed_at() {
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let bids = vec![
            candidate("00000000-0000-0000-0000-000000000002", c, 12000, 2_000),
            candidate("00000000-0000-0000-0000-000000000001", b, 12000, 1_000),
        ];
        assert_eq!(select_winner(&bids).unwrap().bidder_user_id, b);
    }

    #[test]
    fn test_same_millisecond_tie_broken_by_bid_id() {
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let bids = vec![
            candidate("bbbbbbbb-0000-0000-0000-000000000000", c, 12000, 1_000),
            candidate("aaaaaaaa-0000-0000-0000-000000000000", b, 12000, 1_000),
        ];
        // 같은 밀리초 안에서는 사전순으로 가장 작은 입찰 id가 이긴다
        assert_eq!(select_winner(&bids).unwrap().bidder_user_id, b);
    }

    #[test]
    fn test_no_bids_no_winner() {
        assert!(select_winner(&[]).is_none());
    }

    proptest! {
        /// 선정된 낙찰자는 어떤 후보보다도 순서상 앞선다
        #[test]
        fn prop_winner_dominates(
            amounts in proptest::collection::vec((1i64..100_000, 0i64..10_000), 1..40)
        ) {
            let candidates: Vec<WinnerCandidate> = amounts
                .iter()
                .map(|&(amount, at)| candidate(
                    &Uuid::new_v4().to_string(),
                    Uuid::new_v4(),
                    amount,
                    at,
                ))
                .collect();
            let winner = select_winner(&candidates).unwrap();
            for other in &candidates {
                prop_assert!(winner.amount >= other.amount);
                if winner.amount == other.amount {
                    prop_assert!(winner.placed_at <= other.placed_at);
                    if winner.placed_at == other.placed_at {
                        prop_assert!(winner.id <= other.id);
                    }
                }
            }
        }

        /// 낙찰자 선정은 입력 순서와 무관하게 같은 결과를 낸다 (리퍼 멱등성의 전제)
        #[test]
        fn prop_winner_order_independent(
            amounts in proptest::collection::vec((1i64..100_000, 0i64..10_000), 1..40)
        ) {
            let candidates: Vec<WinnerCandidate> = amounts
                .iter()
                .map(|&(amount, at)| candidate(
                    &Uuid::new_v4().to_string(),
                    Uuid::new_v4(),
                    amount,
                    at,
                ))
                .collect();
            let mut reversed = candidates.clone();
            reversed.reverse();
            let a = select_winner(&candidates).unwrap();
            let b = select_winner(&reversed).unwrap();
            prop_assert_eq!(a.id, b.id);
        }
    }
}

// endregion: --- Tests
