// region:    --- Imports
use crate::auth::CredentialService;
use crate::bidding::pipeline::BidPipeline;
use crate::config::Config;
use crate::coordinator::RedisManager;
use crate::database::DatabaseManager;
use crate::gateway::GatewayState;
use crate::lock::BidLockService;
use crate::reaper::ExpiryReaper;
use crate::rooms::RoomRegistry;
use axum::http::HeaderValue;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
// endregion: --- Imports

// region:    --- Modules
mod auth;
mod bidding;
mod config;
mod coordinator;
mod database;
mod gateway;
mod lock;
mod reaper;
mod rooms;
mod store;
mod timesync;

// endregion: --- Modules

// region:    --- Main
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // logging 초기화
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .without_time()
        .with_target(false)
        .init();

    // 설정 로드
    let config = Config::from_env()?;

    // DatabaseManager 생성 및 데이터베이스 초기화
    let db_manager = Arc::new(DatabaseManager::new(&config.store_url).await?);
    if let Err(e) = db_manager.initialize_database().await {
        error!("{:<12} --> 데이터베이스 초기화 실패: {:?}", "Main", e);
        return Err(e.into());
    }
    info!("{:<12} --> 데이터베이스 초기화 성공", "Main");

    // 코디네이터 매니저 생성
    let coordinator = Arc::new(RedisManager::new(&config.coordinator_url)?);
    info!("{:<12} --> 코디네이터 연결 준비 완료", "Main");

    // 자격 증명 서비스
    let credentials = Arc::new(CredentialService::new(
        &config,
        Arc::clone(&db_manager),
        Arc::clone(&coordinator),
    ));

    // 방 레지스트리
    let rooms = Arc::new(RoomRegistry::new(
        Arc::clone(&db_manager),
        Arc::clone(&coordinator),
    ));

    // 입찰 파이프라인 (경매별 락 + 조건부 갱신)
    let lock = Arc::new(BidLockService::new(
        Arc::clone(&coordinator),
        config.lock_ttl_ms,
    ));
    let pipeline = Arc::new(BidPipeline::new(
        Arc::clone(&db_manager),
        Arc::clone(&coordinator),
        lock,
        Arc::clone(&rooms),
    ));

    // 만료 경매 리퍼 시작
    let reaper = ExpiryReaper::new(
        Arc::clone(&db_manager),
        Arc::clone(&rooms),
        config.expiry_tick_ms,
    );
    reaper.start();
    info!("{:<12} --> 리퍼 시작 (주기 {}ms)", "Main", config.expiry_tick_ms);

    // 허용된 오리진에 한정한 cors 설정
    let cors = CorsLayer::new()
        .allow_origin(config.allowed_origin.parse::<HeaderValue>()?)
        .allow_methods(Any)
        .allow_headers(Any);

    // 라우터 설정
    let state = Arc::new(GatewayState {
        rooms,
        pipeline,
        credentials,
        db: Arc::clone(&db_manager),
    });
    let routes_all = gateway::create_router(state).layer(cors);

    // 리스너 생성
    let listener = TcpListener::bind(("0.0.0.0", config.listen_port)).await?;
    info!(
        "{:<12} --> Auction Server: Listening on {}",
        "Main",
        listener.local_addr()?
    );

    // 서버 실행
    if let Err(err) = axum::serve(listener, routes_all.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("{:<12} --> Server error: {}", "Main", err);
    }
    Ok(())
}

/// 종료 시그널 대기
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Ctrl+C 핸들러 설치 실패");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("종료 시그널 핸들러 설치 실패")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("{:<12} --> Ctrl+C 수신", "Main"),
        _ = terminate => info!("{:<12} --> 종료 시그널 수신", "Main"),
    }
}
// endregion: --- Main
