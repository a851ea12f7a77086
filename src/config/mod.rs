/// 환경 변수 기반 서비스 설정
/// 필수 값 누락이나 범위 밖의 값은 기동 시점에 바로 실패 처리한다.
// region:    --- Imports
use thiserror::Error;
// endregion: --- Imports

// region:    --- Config

/// 자격 증명 수명 허용 범위 (시간)
const CREDENTIAL_LIFETIME_RANGE: std::ops::RangeInclusive<i64> = 1..=168;
/// 수신 포트 허용 범위
const LISTEN_PORT_RANGE: std::ops::RangeInclusive<u16> = 1024..=65535;
/// 자격 증명 서명 비밀 키 최소 길이 (바이트)
const CREDENTIAL_SECRET_MIN_BYTES: usize = 32;

#[derive(Debug, Clone)]
pub struct Config {
    pub store_url: String,
    pub coordinator_url: String,
    pub credential_secret: String,
    pub credential_lifetime_hours: i64,
    pub listen_port: u16,
    pub allowed_origin: String,
    pub expiry_tick_ms: u64,
    pub lock_ttl_ms: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("필수 환경 변수 누락: {0}")]
    Missing(&'static str),
    #[error("환경 변수 {0} 값이 잘못되었습니다: {1}")]
    Invalid(&'static str, String),
}

impl Config {
    /// 환경 변수에서 설정 로드
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Config {
            store_url: required("STORE_URL")?,
            coordinator_url: required("COORDINATOR_URL")?,
            credential_secret: required("CREDENTIAL_SECRET")?,
            credential_lifetime_hours: parse_or("CREDENTIAL_LIFETIME_HOURS", 24)?,
            listen_port: parse_or("LISTEN_PORT", 3010)?,
            allowed_origin: required("ALLOWED_ORIGIN")?,
            expiry_tick_ms: parse_or("EXPIRY_TICK_MS", 5000)?,
            lock_ttl_ms: parse_or("LOCK_TTL_MS", 5000)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// 값 범위 검증
    fn validate(&self) -> Result<(), ConfigError> {
        validate_secret(&self.credential_secret)?;
        validate_lifetime(self.credential_lifetime_hours)?;
        validate_port(self.listen_port)?;
        Ok(())
    }
}

/// 필수 환경 변수 조회
fn required(name: &'static str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(name)),
    }
}

/// 선택 환경 변수 조회 (누락 시 기본값, 파싱 실패는 오류)
fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid(name, raw)),
        Err(_) => Ok(default),
    }
}

fn validate_secret(secret: &str) -> Result<(), ConfigError> {
    if secret.len() < CREDENTIAL_SECRET_MIN_BYTES {
        return Err(ConfigError::Invalid(
            "CREDENTIAL_SECRET",
            format!("{}바이트 미만", CREDENTIAL_SECRET_MIN_BYTES),
        ));
    }
    Ok(())
}

fn validate_lifetime(hours: i64) -> Result<(), ConfigError> {
    if !CREDENTIAL_LIFETIME_RANGE.contains(&hours) {
        return Err(ConfigError::Invalid(
            "CREDENTIAL_LIFETIME_HOURS",
            hours.to_string(),
        ));
    }
    Ok(())
}

fn validate_port(port: u16) -> Result<(), ConfigError> {
    if !LISTEN_PORT_RANGE.contains(&port) {
        return Err(ConfigError::Invalid("LISTEN_PORT", port.to_string()));
    }
    Ok(())
}

// endregion: --- Config

// region:    --- Tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_length() {
        assert!(validate_secret("short").is_err());
        assert!(validate_secret(&"x".repeat(32)).is_ok());
        assert!(validate_secret(&"x".repeat(64)).is_ok());
    }

    #[test]
    fn test_lifetime_range() {
        assert!(validate_lifetime(0).is_err());
        assert!(validate_lifetime(1).is_ok());
        assert!(validate_lifetime(24).is_ok());
        assert!(validate_lifetime(168).is_ok());
        assert!(validate_lifetime(169).is_err());
    }

    #[test]
    fn test_port_range() {
        assert!(validate_port(80).is_err());
        assert!(validate_port(1024).is_ok());
        assert!(validate_port(3010).is_ok());
        assert!(validate_port(65535).is_ok());
    }
}

// endregion: --- Tests
