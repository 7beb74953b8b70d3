use std::sync::Arc;
use std::time::Duration;

use entrada_api::app::{AppServices, build_app};
use entrada_certifier::{CertifierApi, CertifierConfig, HttpCertifierClient, TokenStore};
use entrada_core::{Clock, SystemClock};
use entrada_fel::repository::{
    CertificationStore, FelDocumentRepository, FelErrorRepository, FelTokenRepository,
    InvoiceRepository,
};
use entrada_infra::{
    AuditRecorder, CertificationEngine, ExpirySweeper, InMemoryFelStore, InMemoryRetryQueue,
    RetryPolicy, RetryQueue, SweeperConfig, TracingAuditSink,
};

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| {
        tracing::warn!("{name} not set; using dev default");
        default.to_string()
    })
}

#[tokio::main]
async fn main() {
    entrada_observability::init();

    let config = CertifierConfig::new(
        env_or("FEL_BASE_URL", "http://localhost:9090"),
        env_or("FEL_CERTIFIER_NAME", "megaprint"),
        env_or("FEL_USERNAME", "dev"),
        env_or("FEL_API_KEY", "dev-key"),
    );
    let certifier_name = config.certifier_name.clone();
    let certifier: Arc<dyn CertifierApi> =
        Arc::new(HttpCertifierClient::new(config).expect("failed to build certifier client"));

    let store = InMemoryFelStore::arc();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let audit = AuditRecorder::new(Arc::new(TracingAuditSink));
    let retries = Arc::new(InMemoryRetryQueue::new());
    let tokens = Arc::new(TokenStore::new(
        certifier.clone(),
        store.clone() as Arc<dyn FelTokenRepository>,
        clock.clone(),
        certifier_name,
    ));

    let engine = Arc::new(CertificationEngine::new(
        store.clone() as Arc<dyn InvoiceRepository>,
        store.clone() as Arc<dyn FelDocumentRepository>,
        store.clone() as Arc<dyn FelErrorRepository>,
        store.clone() as Arc<dyn CertificationStore>,
        certifier,
        tokens,
        audit.clone(),
        retries.clone() as Arc<dyn RetryQueue>,
        RetryPolicy::default(),
        clock.clone(),
    ));

    // Background loops: scheduled retries and the expiry sweep.
    let retry_engine = engine.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(15));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if let Err(e) = retry_engine.run_due_retries().await {
                tracing::warn!(error = %e, "retry pump failed");
            }
        }
    });

    let sweeper = Arc::new(ExpirySweeper::new(
        store.clone() as Arc<dyn InvoiceRepository>,
        store.clone() as Arc<dyn FelDocumentRepository>,
        store.clone() as Arc<dyn FelTokenRepository>,
        engine.clone(),
        audit,
        clock.clone(),
        SweeperConfig::default(),
    ));
    let _sweeper_handle = sweeper.spawn(Duration::from_secs(60));

    let services = Arc::new(AppServices {
        engine,
        invoices: store.clone() as Arc<dyn InvoiceRepository>,
        documents: store.clone() as Arc<dyn FelDocumentRepository>,
        fel_errors: store.clone() as Arc<dyn FelErrorRepository>,
        clock,
    });

    let app = build_app(services);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8080")
        .await
        .expect("failed to bind 0.0.0.0:8080");

    tracing::info!("listening on {}", listener.local_addr().unwrap());

    axum::serve(listener, app).await.unwrap();
}
