use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// 경매 상태
pub const STATUS_ACTIVE: &str = "ACTIVE";
pub const STATUS_ENDED: &str = "ENDED";
pub const STATUS_CANCELLED: &str = "CANCELLED";

// 사용자 모델
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    pub is_active: bool,
}

// 경매 모델
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Auction {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub starting_price: Decimal,
    pub current_highest_bid: Decimal,
    pub minimum_increment: Decimal,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: String,
    pub creator_user_id: Uuid,
    pub winner_user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// 입찰 모델
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Bid {
    pub id: Uuid,
    pub auction_id: Uuid,
    pub bidder_user_id: Uuid,
    pub amount: Decimal,
    pub placed_at: DateTime<Utc>,
    pub was_successful: bool,
    pub processing_time_ms: i64,
}

// 철회된 자격 증명
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RevokedCredential {
    pub credential: String,
    pub revoked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// 와이어 금액의 부동소수점 표현 오차 허용치
const WIRE_DRIFT_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 9);

/// 금액이 소수 둘째 자리 이내인지 검사 (정규화 후 기준)
pub fn has_valid_scale(amount: Decimal) -> bool {
    amount.normalize().scale() <= 2
}

/// 와이어 경계 금액 정규화
/// JSON 숫자를 거치며 생긴 이진 표현 오차만 짝수 반올림으로 흡수한다.
/// 실제로 소수 둘째 자리를 넘는 금액은 그대로 두어 파이프라인에서 거부되게 한다.
pub fn normalize_wire_amount(raw: Decimal) -> Decimal {
    let rounded = raw.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven);
    if (raw - rounded).abs() < WIRE_DRIFT_TOLERANCE {
        rounded
    } else {
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
    use std::str::FromStr;

    #[test]
    fn test_valid_scale() {
        assert!(has_valid_scale(Decimal::from_str("110").unwrap()));
        assert!(has_valid_scale(Decimal::from_str("110.1").unwrap()));
        assert!(has_valid_scale(Decimal::from_str("110.10").unwrap()));
        assert!(has_valid_scale(Decimal::from_str("110.100").unwrap()));
        assert!(!has_valid_scale(Decimal::from_str("110.101").unwrap()));
        assert!(!has_valid_scale(Decimal::from_str("0.001").unwrap()));
    }

    #[test]
    fn test_wire_drift_absorbed() {
        // f64 경유로 꼬리가 붙은 값은 둘째 자리로 복원된다
        let drifted = Decimal::from_str("110.10000000000001").unwrap();
        assert_eq!(
            normalize_wire_amount(drifted),
            Decimal::from_str("110.10").unwrap()
        );
    }

    #[test]
    fn test_real_three_decimals_kept() {
        // 실제 셋째 자리 금액은 반올림하지 않고 그대로 거부 대상으로 남긴다
        let raw = Decimal::from_str("110.105").unwrap();
        assert_eq!(normalize_wire_amount(raw), raw);
        assert!(!has_valid_scale(normalize_wire_amount(raw)));
    }

    proptest! {
        /// 둘째 자리 이내 금액은 정규화를 거쳐도 변하지 않는다
        #[test]
        fn prop_two_decimal_amounts_stable(cents in 1i64..1_000_000_000) {
            let amount = Decimal::new(cents, 2);
            prop_assert_eq!(normalize_wire_amount(amount), amount);
            prop_assert!(has_valid_scale(amount));
        }

        /// f64 왕복을 거친 둘째 자리 금액은 항상 원래 값으로 복원된다
        #[test]
        fn prop_float_round_trip(cents in 1i64..1_000_000_000) {
            let amount = Decimal::new(cents, 2);
            let through_f64 =
                Decimal::from_f64(amount.to_f64().unwrap()).unwrap();
            prop_assert_eq!(normalize_wire_amount(through_f64), amount);
        }
    }
}
