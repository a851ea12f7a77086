/// 경매별 분산 배타 락
/// 코디네이터의 NX+PX 기록과 토큰 대조 삭제만으로 복제본 전체에 걸친
/// 상호 배제를 제공한다. 획득 실패는 재시도하지 않고 호출자에게 올린다.
// region:    --- Imports
use crate::coordinator::{CoordinatorError, RedisManager, LOCK_KEY_PREFIX};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;
// endregion: --- Imports

// region:    --- Errors

#[derive(Debug, Error)]
pub enum LockError {
    #[error("경매 락을 획득하지 못했습니다")]
    Unavailable,
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
}

// endregion: --- Errors

// region:    --- Bid Lock Service

pub struct BidLockService {
    coordinator: Arc<RedisManager>,
    ttl_ms: u64,
}

impl BidLockService {
    pub fn new(coordinator: Arc<RedisManager>, ttl_ms: u64) -> Self {
        Self {
            coordinator,
            ttl_ms,
        }
    }

    /// 락 획득. 성공 시 해제에 필요한 소유 토큰을 돌려준다.
    pub async fn acquire(&self, auction_id: Uuid) -> Result<String, LockError> {
        let token = Uuid::new_v4().to_string();
        let acquired = self
            .coordinator
            .set_nx_px(&lock_key(auction_id), &token, self.ttl_ms)
            .await?;
        if acquired {
            Ok(token)
        } else {
            Err(LockError::Unavailable)
        }
    }

    /// 락 해제. 토큰이 일치하는 경우에만 삭제되며, 불일치 삭제는 무시된다.
    pub async fn release(&self, auction_id: Uuid, token: &str) -> Result<(), LockError> {
        let released = self
            .coordinator
            .compare_and_delete(&lock_key(auction_id), token)
            .await?;
        if !released {
            // TTL 만료 뒤 다른 보유자가 생긴 경우
            warn!(
                "{:<12} --> 토큰 불일치로 해제 생략: auction={}",
                "Lock", auction_id
            );
        }
        Ok(())
    }

    /// 구조적 락 획득
    /// 본문이 정상 종료하든 오류를 내든 패닉하든 해제가 호출된다.
    /// 획득에 실패하면 본문은 실행되지 않는다.
    pub async fn with<F, Fut, T>(&self, auction_id: Uuid, f: F) -> Result<T, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let token = self.acquire(auction_id).await?;
        let result = AssertUnwindSafe(f()).catch_unwind().await;
        if let Err(e) = self.release(auction_id, &token).await {
            // 해제 실패 시에도 TTL이 락 보유 시간을 한정한다
            warn!(
                "{:<12} --> 락 해제 실패: auction={} {:?}",
                "Lock", auction_id, e
            );
        }
        match result {
            Ok(value) => Ok(value),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

fn lock_key(auction_id: Uuid) -> String {
    format!("{}{}", LOCK_KEY_PREFIX, auction_id)
}

// endregion: --- Bid Lock Service

// region:    --- Tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_key_format() {
        let id = Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap();
        assert_eq!(
            lock_key(id),
            "lock:bid:00000000-0000-0000-0000-000000000001"
        );
    }
}

// endregion: --- Tests
