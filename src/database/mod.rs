/// 경매 저장소 연결 관리
/// 모든 변경 연산은 transaction을 거치고, 호출 시한이 트랜잭션 전체에 걸린다.
// region:    --- Imports
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::warn;
// endregion: --- Imports

/// 저장소 호출 공통 시한
pub const CALL_DEADLINE: Duration = Duration::from_secs(2);

// region:    --- Database Manager

pub struct DatabaseManager {
    pool: Arc<PgPool>,
}

impl DatabaseManager {
    /// 저장소 연결. 풀에서 커넥션을 얻는 것도 공통 시한을 따른다.
    pub async fn new(store_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(CALL_DEADLINE)
            .connect(store_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 시한이 걸린 트랜잭션 실행
    /// 시한 초과는 풀 타임아웃으로 분류되어 가용성 오류로 올라간다.
    pub async fn transaction<F, R, E>(&self, f: F) -> Result<R, E>
    where
        F: for<'c> FnOnce(
            &'c mut sqlx::Transaction<'_, sqlx::Postgres>,
        ) -> Pin<Box<dyn Future<Output = Result<R, E>> + Send + 'c>>,
        E: From<sqlx::Error>,
    {
        match tokio::time::timeout(CALL_DEADLINE, self.run_in_transaction(f)).await {
            Ok(result) => result,
            Err(_) => Err(E::from(sqlx::Error::PoolTimedOut)),
        }
    }

    /// 트랜잭션 본문: 성공이면 커밋, 실패면 롤백 후 본문의 오류를 그대로 돌려준다
    async fn run_in_transaction<F, R, E>(&self, f: F) -> Result<R, E>
    where
        F: for<'c> FnOnce(
            &'c mut sqlx::Transaction<'_, sqlx::Postgres>,
        ) -> Pin<Box<dyn Future<Output = Result<R, E>> + Send + 'c>>,
        E: From<sqlx::Error>,
    {
        let mut tx = self.pool.begin().await?;
        match f(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                // 롤백 실패가 본문의 오류를 덮지 않게 한다
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("{:<12} --> 롤백 실패: {:?}", "Store", rollback_err);
                }
                Err(e)
            }
        }
    }

    /// 스키마 부트스트랩 (참조 배포 기준)
    /// 기존 테이블을 지우고 경매 / 입찰 / 철회 스키마를 새로 깐다.
    pub async fn initialize_database(&self) -> Result<(), sqlx::Error> {
        let batches = [
            include_str!("../sql/00-recreate-db.sql"),
            include_str!("../sql/01-create-schema.sql"),
        ];
        for batch in batches {
            self.apply_sql_batch(batch).await?;
        }
        Ok(())
    }

    /// 세미콜론으로 구분된 문장 묶음을 순서대로 실행
    async fn apply_sql_batch(&self, sql: &str) -> Result<(), sqlx::Error> {
        for statement in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&*self.pool).await?;
        }
        Ok(())
    }
}

// endregion: --- Database Manager

/// 단건 저장소 호출 시한 적용
/// 시한 초과는 풀 타임아웃과 동일하게 호출자에게 전파한다.
pub async fn with_deadline<T, F>(fut: F) -> Result<T, sqlx::Error>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(CALL_DEADLINE, fut).await {
        Ok(result) => result,
        Err(_) => Err(sqlx::Error::PoolTimedOut),
    }
}
