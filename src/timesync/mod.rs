/// 시각 동기화 응답자
/// 클라이언트 t0를 되돌려 주고 송신 시점의 서버 시각을 t1 = t2로 싣는다.
/// 클라이언트는 ((t1 - t0) + (t2 - t3)) / 2로 오프셋을,
/// (t3 - t0) - (t2 - t1)로 왕복 시간을 계산한다. 상태 없음.
use crate::gateway::protocol::ServerEvent;
use chrono::Utc;

/// 시각 동기화 응답 생성
pub fn respond(client_timestamp_t0_in_ms: i64) -> ServerEvent {
    let now = Utc::now().timestamp_millis();
    ServerEvent::TimeSyncResponse {
        client_timestamp_t0_in_ms,
        server_timestamp_t1_in_ms: now,
        server_timestamp_t2_in_ms: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echoes_t0_and_stamps_server_time() {
        let before = Utc::now().timestamp_millis();
        let response = respond(123_456);
        let after = Utc::now().timestamp_millis();
        match response {
            ServerEvent::TimeSyncResponse {
                client_timestamp_t0_in_ms,
                server_timestamp_t1_in_ms,
                server_timestamp_t2_in_ms,
            } => {
                assert_eq!(client_timestamp_t0_in_ms, 123_456);
                assert_eq!(server_timestamp_t1_in_ms, server_timestamp_t2_in_ms);
                assert!(server_timestamp_t1_in_ms >= before);
                assert!(server_timestamp_t1_in_ms <= after);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_offset_formula_with_synced_clocks() {
        // 시계가 일치하면 오프셋은 왕복 지연과 무관하게 0이어야 한다
        let t0 = 1_000;
        let response = respond(t0);
        let ServerEvent::TimeSyncResponse {
            server_timestamp_t1_in_ms: t1,
            server_timestamp_t2_in_ms: t2,
            ..
        } = response
        else {
            panic!("unexpected event");
        };
        let t3 = t2 + (t1 - t0);
        let offset = ((t1 - t0) + (t2 - t3)) / 2;
        assert_eq!(offset, 0);
    }
}
