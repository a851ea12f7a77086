/// 경매 단건 조회
pub const FIND_AUCTION_BY_ID: &str = "SELECT id, title, description, starting_price, current_highest_bid, minimum_increment, start_time, end_time, status, creator_user_id, winner_user_id, created_at, updated_at FROM auctions WHERE id = $1";

/// 조건부 최고가 갱신
/// 읽어 둔 최고가가 그대로이고 경매가 아직 ACTIVE일 때에만 갱신한다.
/// 리퍼는 경매별 락 없이 종료를 커밋하므로, 리퍼가 먼저 종료시킨 경매나
/// 락이 만료된 경합에서는 0건 갱신으로 끝나야 한다.
pub const CONDITIONAL_PRICE_BUMP: &str = r#"
    UPDATE auctions
    SET current_highest_bid = $2, updated_at = $3
    WHERE id = $1 AND current_highest_bid = $4 AND status = 'ACTIVE'
"#;

/// 성공 입찰 기록 삽입
pub const INSERT_BID: &str = r#"
    INSERT INTO bids (id, auction_id, bidder_user_id, amount, placed_at, was_successful, processing_time_ms)
    VALUES ($1, $2, $3, $4, $5, TRUE, $6)
    RETURNING id, auction_id, bidder_user_id, amount, placed_at, was_successful, processing_time_ms
"#;

/// 실패 입찰 감사 기록 삽입
pub const INSERT_FAILED_BID: &str = r#"
    INSERT INTO bids (id, auction_id, bidder_user_id, amount, placed_at, was_successful, processing_time_ms)
    VALUES ($1, $2, $3, $4, $5, FALSE, $6)
"#;

/// 성공 입찰 수 조회
pub const COUNT_SUCCESSFUL_BIDS: &str =
    "SELECT COUNT(*) FROM bids WHERE auction_id = $1 AND was_successful";

/// 종료 시각이 지난 경매 일괄 종료
/// status = 'ACTIVE' 조건이 복제본 간 직렬화 지점이 된다
pub const END_EXPIRED_AUCTIONS: &str = r#"
    UPDATE auctions
    SET status = 'ENDED', updated_at = $1
    WHERE status = 'ACTIVE' AND end_time <= $1
    RETURNING id
"#;

/// 낙찰자 선정 대상 성공 입찰 조회
pub const LIST_SUCCESSFUL_BIDS: &str = r#"
    SELECT id, bidder_user_id, amount, placed_at
    FROM bids
    WHERE auction_id = $1 AND was_successful
"#;

/// 낙찰자 기록 (종료된 경매, 미기록 상태에서만)
pub const ASSIGN_WINNER: &str = r#"
    UPDATE auctions
    SET winner_user_id = $2, updated_at = $3
    WHERE id = $1 AND status = 'ENDED' AND winner_user_id IS NULL
"#;

/// 최고 입찰자 조회
pub const FIND_HIGHEST_BIDDER: &str = r#"
    SELECT b.bidder_user_id, u.username
    FROM bids b
    JOIN users u ON u.id = b.bidder_user_id
    WHERE b.auction_id = $1 AND b.was_successful
    ORDER BY b.amount DESC, b.placed_at ASC, b.id ASC
    LIMIT 1
"#;

/// 사용자 이름 조회
pub const FIND_USERNAME: &str = "SELECT username FROM users WHERE id = $1";

/// 자격 증명 철회 기록
pub const INSERT_REVOKED_CREDENTIAL: &str = r#"
    INSERT INTO revoked_credentials (credential, revoked_at, expires_at)
    VALUES ($1, $2, $3)
    ON CONFLICT (credential) DO NOTHING
"#;

/// 철회 여부 조회 (만료된 철회 기록은 제외)
pub const LOOKUP_REVOKED_CREDENTIAL: &str = "SELECT credential, revoked_at, expires_at FROM revoked_credentials WHERE credential = $1 AND expires_at > $2";

/// 만료된 철회 기록 정리
pub const CLEANUP_EXPIRED_REVOCATIONS: &str =
    "DELETE FROM revoked_credentials WHERE expires_at <= $1";
