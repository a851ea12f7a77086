/// 자격 증명 검증 / 발급 / 철회
/// 대칭 키(HS256) 서명 토큰을 핸드셰이크에서 검증한다.
/// 철회 여부는 코디네이터 캐시를 먼저 보고, 캐시 미스면 저장소를 조회한 뒤
/// 캐시를 다시 채운다.
// region:    --- Imports
use crate::config::Config;
use crate::coordinator::{RedisManager, REVOKED_KEY_PREFIX};
use crate::database::DatabaseManager;
use crate::store;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;
// endregion: --- Imports

/// 철회 캐시 TTL 상한 (초)
const REVOKED_CACHE_TTL_CAP_SECS: i64 = 24 * 60 * 60;

// region:    --- Claims

/// 자격 증명 페이로드
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// 사용자 id
    pub sub: Uuid,
    pub email: String,
    pub username: String,
    /// 발급 시각 (unix 초)
    pub iat: i64,
    /// 만료 시각 (unix 초)
    pub exp: i64,
}

/// 핸드셰이크를 통과한 사용자
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub username: String,
}

// endregion: --- Claims

// region:    --- Errors

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("자격 증명이 만료되었습니다")]
    Expired,
    #[error("철회된 자격 증명입니다")]
    Revoked,
    #[error("서명 알고리즘이 일치하지 않습니다")]
    AlgorithmMismatch,
    #[error("잘못된 자격 증명입니다: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
    #[error("철회 목록 조회 실패: {0}")]
    Store(#[from] sqlx::Error),
}

impl AuthError {
    /// 연결 종료 시 클라이언트에 노출하는 사유 코드
    pub fn reason_code(&self) -> &'static str {
        match self {
            AuthError::Expired => "EXPIRED",
            AuthError::Revoked => "REVOKED",
            AuthError::AlgorithmMismatch => "ALGORITHM_MISMATCH",
            AuthError::Invalid(_) => "INVALID_CREDENTIAL",
            AuthError::Store(_) => "IDENTITY_UNAVAILABLE",
        }
    }
}

// endregion: --- Errors

// region:    --- Token Codec

/// 자격 증명 인코딩 (HS256)
pub fn encode_credential(
    secret: &str,
    claims: &Claims,
) -> Result<String, jsonwebtoken::errors::Error> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// 자격 증명 디코딩
/// 헤더의 알고리즘이 HS256이 아니면 서명 검증 전에 거부한다.
pub fn decode_credential(secret: &str, token: &str) -> Result<Claims, AuthError> {
    let header = decode_header(token)?;
    if header.alg != Algorithm::HS256 {
        return Err(AuthError::AlgorithmMismatch);
    }
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
        _ => AuthError::Invalid(e),
    })?;
    Ok(data.claims)
}

// endregion: --- Token Codec

// region:    --- Credential Service

pub struct CredentialService {
    secret: String,
    lifetime_hours: i64,
    db: Arc<DatabaseManager>,
    coordinator: Arc<RedisManager>,
}

impl CredentialService {
    pub fn new(
        config: &Config,
        db: Arc<DatabaseManager>,
        coordinator: Arc<RedisManager>,
    ) -> Self {
        Self {
            secret: config.credential_secret.clone(),
            lifetime_hours: config.credential_lifetime_hours,
            db,
            coordinator,
        }
    }

    /// 자격 증명 발급
    pub fn issue(
        &self,
        user_id: Uuid,
        email: &str,
        username: &str,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id,
            email: email.to_string(),
            username: username.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::hours(self.lifetime_hours)).timestamp(),
        };
        encode_credential(&self.secret, &claims)
    }

    /// 핸드셰이크 자격 증명 검증
    pub async fn verify(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        let claims = decode_credential(&self.secret, token)?;
        if self.is_revoked(token).await? {
            return Err(AuthError::Revoked);
        }
        Ok(AuthenticatedUser {
            user_id: claims.sub,
            username: claims.username,
        })
    }

    /// 자격 증명 철회
    /// 저장소에 기록하고 잔여 수명만큼 코디네이터 캐시에도 올린다.
    pub async fn revoke(&self, token: &str) -> Result<(), AuthError> {
        let claims = decode_credential(&self.secret, token)?;
        let now = Utc::now();
        let expires_at = DateTime::from_timestamp(claims.exp, 0)
            .unwrap_or_else(|| now + Duration::seconds(REVOKED_CACHE_TTL_CAP_SECS));
        store::insert_revoked_credential(&self.db, token, now, expires_at).await?;
        self.cache_revocation(token, expires_at, now).await;
        info!("{:<12} --> 자격 증명 철회: user={}", "Auth", claims.sub);
        Ok(())
    }

    /// 철회 여부 확인 (캐시 우선, 미스 시 저장소 조회 후 캐시 갱신)
    async fn is_revoked(&self, token: &str) -> Result<bool, sqlx::Error> {
        let key = revoked_key(token);
        match self.coordinator.exists(&key).await {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(e) => {
                // 캐시 조회 실패는 미스로 취급하고 저장소로 넘어간다
                warn!("{:<12} --> 철회 캐시 조회 실패: {:?}", "Auth", e);
            }
        }

        let now = Utc::now();
        match store::lookup_revoked_credential(&self.db, token, now).await? {
            Some(revoked) => {
                self.cache_revocation(token, revoked.expires_at, now).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// 철회 사실을 잔여 수명(최대 24시간)만큼 캐시에 기록. 실패해도 진행한다.
    async fn cache_revocation(
        &self,
        token: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        let remaining_secs = (expires_at - now)
            .num_seconds()
            .clamp(1, REVOKED_CACHE_TTL_CAP_SECS);
        if let Err(e) = self
            .coordinator
            .set_with_ttl(&revoked_key(token), "1", remaining_secs as u64)
            .await
        {
            warn!("{:<12} --> 철회 캐시 기록 실패: {:?}", "Auth", e);
        }
    }
}

fn revoked_key(token: &str) -> String {
    format!("{}{}", REVOKED_KEY_PREFIX, token)
}

// endregion: --- Credential Service

// region:    --- Tests

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn claims(exp_offset_secs: i64) -> Claims {
        let now = Utc::now();
        Claims {
            sub: Uuid::new_v4(),
            email: "bidder@example.com".to_string(),
            username: "bidder".to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(exp_offset_secs)).timestamp(),
        }
    }

    #[test]
    fn test_round_trip() {
        let issued = claims(3600);
        let token = encode_credential(SECRET, &issued).unwrap();
        let decoded = decode_credential(SECRET, &token).unwrap();
        assert_eq!(decoded.sub, issued.sub);
        assert_eq!(decoded.username, issued.username);
        assert_eq!(decoded.exp, issued.exp);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = encode_credential(SECRET, &claims(3600)).unwrap();
        let other = "ffffffffffffffffffffffffffffffff";
        assert!(matches!(
            decode_credential(other, &token),
            Err(AuthError::Invalid(_))
        ));
    }

    #[test]
    fn test_expired_rejected() {
        let token = encode_credential(SECRET, &claims(-3600)).unwrap();
        assert!(matches!(
            decode_credential(SECRET, &token),
            Err(AuthError::Expired)
        ));
    }

    #[test]
    fn test_algorithm_mismatch_rejected() {
        // 같은 비밀 키라도 다른 HMAC 알고리즘으로 서명된 토큰은 거부한다
        let token = encode(
            &Header::new(Algorithm::HS384),
            &claims(3600),
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();
        assert!(matches!(
            decode_credential(SECRET, &token),
            Err(AuthError::AlgorithmMismatch)
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            decode_credential(SECRET, "not-a-credential"),
            Err(AuthError::Invalid(_))
        ));
    }
}

// endregion: --- Tests
