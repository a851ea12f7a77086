/// 코디네이터(키/값 서비스) 어댑터
/// 경매별 배타 락의 CAS 프리미티브와 자문적 캐시 연산만 노출한다.
/// 캐시는 힌트일 뿐이며 진실의 원천은 항상 저장소다.
// region:    --- Imports
use redis::AsyncCommands;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Duration;
use tracing::debug;
// endregion: --- Imports

// region:    --- Keys

/// 경매별 입찰 락 키: lock:bid:{auctionId}
pub const LOCK_KEY_PREFIX: &str = "lock:bid:";

/// 현재 최고가 캐시 키: auction:current-bid:{auctionId}
pub const CURRENT_BID_KEY_PREFIX: &str = "auction:current-bid:";

/// 최고 입찰자 캐시 키: auction:highest-bidder:{auctionId}
pub const HIGHEST_BIDDER_KEY_PREFIX: &str = "auction:highest-bidder:";

/// 철회 자격 증명 캐시 키: revoked:{credential}
pub const REVOKED_KEY_PREFIX: &str = "revoked:";

/// 경매 캐시 항목 TTL (초)
pub const AUCTION_CACHE_TTL_SECS: u64 = 60;

// endregion: --- Keys

/// 코디네이터 호출 공통 시한
const CALL_DEADLINE: Duration = Duration::from_secs(2);

/// 토큰이 일치할 때에만 키를 지우는 스크립트 (락 해제의 원자성 보장)
const COMPARE_AND_DELETE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

// region:    --- Errors

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("코디네이터 I/O 오류: {0}")]
    Io(#[from] redis::RedisError),
    #[error("코디네이터 호출 시한 초과")]
    Deadline,
}

// endregion: --- Errors

// region:    --- Redis Manager

pub struct RedisManager {
    client: Arc<redis::Client>,
    release_script: redis::Script,
}

impl RedisManager {
    /// 코디네이터 매니저 생성
    pub fn new(coordinator_url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(coordinator_url)?;
        Ok(Self {
            client: Arc::new(client),
            release_script: redis::Script::new(COMPARE_AND_DELETE_SCRIPT),
        })
    }

    async fn get_connection(
        &self,
    ) -> Result<redis::aio::MultiplexedConnection, CoordinatorError> {
        deadline(self.client.get_multiplexed_async_connection()).await
    }

    /// 키가 없을 때에만 값을 기록 (밀리초 TTL). 기록 성공 여부를 돌려준다.
    pub async fn set_nx_px(
        &self,
        key: &str,
        value: &str,
        ttl_ms: u64,
    ) -> Result<bool, CoordinatorError> {
        let mut conn = self.get_connection().await?;
        let reply: Option<String> = deadline(
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("NX")
                .arg("PX")
                .arg(ttl_ms)
                .query_async(&mut conn),
        )
        .await?;
        Ok(reply.is_some())
    }

    /// 저장된 값이 토큰과 일치할 때에만 키 삭제. 삭제 여부를 돌려준다.
    pub async fn compare_and_delete(
        &self,
        key: &str,
        token: &str,
    ) -> Result<bool, CoordinatorError> {
        let mut conn = self.get_connection().await?;
        let deleted: i64 = deadline(
            self.release_script
                .key(key)
                .arg(token)
                .invoke_async(&mut conn),
        )
        .await?;
        Ok(deleted == 1)
    }

    /// TTL과 함께 값 기록 (초)
    pub async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<(), CoordinatorError> {
        let mut conn = self.get_connection().await?;
        deadline(conn.set_ex::<_, _, ()>(key, value, ttl_secs)).await?;
        debug!("{:<12} --> 캐시 기록: {} (ttl {}s)", "Coordinator", key, ttl_secs);
        Ok(())
    }

    /// 값 조회
    pub async fn get(&self, key: &str) -> Result<Option<String>, CoordinatorError> {
        let mut conn = self.get_connection().await?;
        deadline(conn.get::<_, Option<String>>(key)).await
    }

    /// 키 존재 여부
    pub async fn exists(&self, key: &str) -> Result<bool, CoordinatorError> {
        let mut conn = self.get_connection().await?;
        deadline(conn.exists::<_, bool>(key)).await
    }
}

/// 코디네이터 호출 시한 적용
async fn deadline<T, F>(fut: F) -> Result<T, CoordinatorError>
where
    F: std::future::Future<Output = redis::RedisResult<T>>,
{
    match tokio::time::timeout(CALL_DEADLINE, fut).await {
        Ok(result) => result.map_err(CoordinatorError::Io),
        Err(_) => Err(CoordinatorError::Deadline),
    }
}

// endregion: --- Redis Manager
