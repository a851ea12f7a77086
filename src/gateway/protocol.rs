/// 소켓 이벤트 어휘
/// 이벤트 이름과 페이로드 필드명은 클라이언트와의 계약이므로 변경 금지.
/// 금액은 JSON 숫자로 싣되 서버 내부에서는 항상 Decimal을 거친다.
/// 타임스탬프는 모두 unix epoch 밀리초.
// region:    --- Imports
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
// endregion: --- Imports

// region:    --- Client Events

/// 클라이언트 → 서버 이벤트
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "TIME_SYNC_REQUEST", rename_all = "camelCase")]
    TimeSyncRequest { client_timestamp_t0_in_ms: i64 },

    #[serde(rename = "JOIN_AUCTION_ROOM", rename_all = "camelCase")]
    JoinAuctionRoom { auction_item_id: Uuid },

    #[serde(rename = "LEAVE_AUCTION_ROOM", rename_all = "camelCase")]
    LeaveAuctionRoom { auction_item_id: Uuid },

    #[serde(rename = "PLACE_BID", rename_all = "camelCase")]
    PlaceBid {
        auction_item_id: Uuid,
        #[serde(with = "rust_decimal::serde::float")]
        bid_amount_in_dollars: Decimal,
    },
}

// endregion: --- Client Events

// region:    --- Server Events

/// 서버 → 클라이언트 이벤트
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "TIME_SYNC_RESPONSE", rename_all = "camelCase")]
    TimeSyncResponse {
        client_timestamp_t0_in_ms: i64,
        server_timestamp_t1_in_ms: i64,
        server_timestamp_t2_in_ms: i64,
    },

    #[serde(rename = "JOINED_AUCTION_ROOM", rename_all = "camelCase")]
    JoinedAuctionRoom { auction_item_id: Uuid },

    #[serde(rename = "LEFT_AUCTION_ROOM", rename_all = "camelCase")]
    LeftAuctionRoom { auction_item_id: Uuid },

    /// 방 입장 직후 전송되는 상태 스냅샷
    #[serde(rename = "AUCTION_STATE_SYNC", rename_all = "camelCase")]
    AuctionStateSync {
        auction_item_id: Uuid,
        #[serde(with = "rust_decimal::serde::float")]
        current_highest_bid_in_dollars: Decimal,
        highest_bidder_user_id: Option<Uuid>,
        highest_bidder_username: Option<String>,
        auction_end_time_in_ms: i64,
        auction_status: String,
        total_number_of_bids: i64,
    },

    #[serde(rename = "BID_UPDATE_BROADCAST", rename_all = "camelCase")]
    BidUpdateBroadcast {
        auction_item_id: Uuid,
        #[serde(with = "rust_decimal::serde::float")]
        new_highest_bid_in_dollars: Decimal,
        highest_bidder_user_id: Uuid,
        highest_bidder_username: String,
        bid_placed_at_timestamp: i64,
        total_number_of_bids: i64,
    },

    #[serde(rename = "BID_PLACED_SUCCESS", rename_all = "camelCase")]
    BidPlacedSuccess {
        auction_item_id: Uuid,
        #[serde(with = "rust_decimal::serde::float")]
        bid_amount_in_dollars: Decimal,
        bid_id: Uuid,
        bid_placed_at_timestamp: i64,
    },

    #[serde(rename = "BID_PLACED_ERROR", rename_all = "camelCase")]
    BidPlacedError {
        auction_item_id: Uuid,
        error_code: String,
        error_message: String,
        /// BID_TOO_LOW일 때에만 실리는 최소 요구 금액
        #[serde(
            skip_serializing_if = "Option::is_none",
            with = "rust_decimal::serde::float_option"
        )]
        minimum_required_bid_in_dollars: Option<Decimal>,
    },

    #[serde(rename = "AUCTION_ENDED_NOTIFICATION", rename_all = "camelCase")]
    AuctionEndedNotification {
        auction_item_id: Uuid,
        winner_user_id: Option<Uuid>,
        winner_username: Option<String>,
        #[serde(with = "rust_decimal::serde::float")]
        final_bid_amount_in_dollars: Decimal,
        auction_ended_at_timestamp: i64,
    },
}

// endregion: --- Server Events

// region:    --- Tests

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_place_bid_wire_names() {
        let raw = r#"{"type":"PLACE_BID","auctionItemId":"00000000-0000-0000-0000-000000000001","bidAmountInDollars":110.00}"#;
        let event: ClientEvent = serde_json::from_str(raw).unwrap();
        match event {
            ClientEvent::PlaceBid {
                auction_item_id,
                bid_amount_in_dollars,
            } => {
                assert_eq!(
                    auction_item_id.to_string(),
                    "00000000-0000-0000-0000-000000000001"
                );
                assert_eq!(bid_amount_in_dollars, Decimal::from_str("110").unwrap());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_time_sync_request_wire_names() {
        let raw = r#"{"type":"TIME_SYNC_REQUEST","clientTimestampT0InMs":1712345678901}"#;
        let event: ClientEvent = serde_json::from_str(raw).unwrap();
        assert!(matches!(
            event,
            ClientEvent::TimeSyncRequest {
                client_timestamp_t0_in_ms: 1712345678901
            }
        ));
    }

    #[test]
    fn test_unknown_type_fails_parse() {
        let raw = r#"{"type":"SOMETHING_ELSE","auctionItemId":"00000000-0000-0000-0000-000000000001"}"#;
        assert!(serde_json::from_str::<ClientEvent>(raw).is_err());
    }

    #[test]
    fn test_bid_update_broadcast_wire_names() {
        let event = ServerEvent::BidUpdateBroadcast {
            auction_item_id: Uuid::nil(),
            new_highest_bid_in_dollars: Decimal::from_str("110.00").unwrap(),
            highest_bidder_user_id: Uuid::nil(),
            highest_bidder_username: "bidder".to_string(),
            bid_placed_at_timestamp: 1712345678901,
            total_number_of_bids: 1,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"BID_UPDATE_BROADCAST""#));
        assert!(json.contains(r#""newHighestBidInDollars":110.0"#));
        assert!(json.contains(r#""highestBidderUsername":"bidder""#));
        assert!(json.contains(r#""bidPlacedAtTimestamp":1712345678901"#));
        assert!(json.contains(r#""totalNumberOfBids":1"#));
    }

    #[test]
    fn test_bid_error_omits_required_when_absent() {
        let event = ServerEvent::BidPlacedError {
            auction_item_id: Uuid::nil(),
            error_code: "AUCTION_ENDED".to_string(),
            error_message: "경매가 이미 종료되었습니다".to_string(),
            minimum_required_bid_in_dollars: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""errorCode":"AUCTION_ENDED""#));
        assert!(!json.contains("minimumRequiredBidInDollars"));
    }

    #[test]
    fn test_bid_error_carries_required_for_low_bid() {
        let event = ServerEvent::BidPlacedError {
            auction_item_id: Uuid::nil(),
            error_code: "BID_TOO_LOW".to_string(),
            error_message: "입찰 금액이 낮습니다".to_string(),
            minimum_required_bid_in_dollars: Some(Decimal::from_str("120.00").unwrap()),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""minimumRequiredBidInDollars":120.0"#));
    }

    #[test]
    fn test_auction_ended_nullable_winner() {
        let event = ServerEvent::AuctionEndedNotification {
            auction_item_id: Uuid::nil(),
            winner_user_id: None,
            winner_username: None,
            final_bid_amount_in_dollars: Decimal::from_str("100.00").unwrap(),
            auction_ended_at_timestamp: 1712345678901,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"AUCTION_ENDED_NOTIFICATION""#));
        assert!(json.contains(r#""winnerUserId":null"#));
        assert!(json.contains(r#""winnerUsername":null"#));
    }
}

// endregion: --- Tests
