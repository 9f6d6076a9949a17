use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::{
    callback::CallbackCorrelator,
    classifier::KeywordClassifier,
    config::Config,
    dispatcher::WebhookDispatcher,
    handlers,
    intent::IntentMatcher,
    pipeline::ToolPipeline,
    providers::ProviderRegistry,
    retry::RetryInitiator,
    store::{ExecutionLedger, PgStore, ProviderConfigSource, ToolRegistry},
    sweeper::TimeoutSweeper,
    types::AppState,
};

/// Wire every component over the given stores.
pub fn build_state(
    config: Config,
    tools: Arc<dyn ToolRegistry>,
    ledger: Arc<dyn ExecutionLedger>,
    provider_configs: Arc<dyn ProviderConfigSource>,
) -> Arc<AppState> {
    let http = reqwest::Client::new();
    let dispatcher = WebhookDispatcher::new(
        http.clone(),
        ledger.clone(),
        config.webhook_timeout,
        config.callback_secret.clone(),
    );
    let pipeline = ToolPipeline::new(
        Arc::new(IntentMatcher::new()),
        tools.clone(),
        dispatcher.clone(),
    )
    .with_classifier(Arc::new(KeywordClassifier::default()));

    Arc::new(AppState {
        correlator: CallbackCorrelator::new(ledger.clone()),
        sweeper: TimeoutSweeper::new(
            ledger.clone(),
            config.execution_timeout,
            config.sweep_batch_size,
        ),
        retry: RetryInitiator::new(ledger.clone(), tools, dispatcher),
        providers: ProviderRegistry::new(http, config.default_provider.clone()),
        pipeline,
        ledger,
        provider_configs,
        config,
    })
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/tools/callback", post(handlers::tool_callback))
        .route("/api/executions/{execution_id}", get(handlers::get_execution))
        .route(
            "/api/executions/{execution_id}/retry",
            post(handlers::retry_execution),
        )
        .route(
            "/api/conversations/{conversation_id}/executions",
            get(handlers::list_conversation_executions),
        )
        .route(
            "/api/conversations/{conversation_id}/agent-messages",
            post(handlers::agent_message),
        )
        .route("/api/sweeps", post(handlers::run_sweep))
        .route(
            "/api/tenants/{tenant_id}/providers/health",
            get(handlers::providers_health),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run() {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();

    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to postgres (set DATABASE_URL or POSTGRES_* env vars)");

    sqlx::migrate!("./migrations")
        .run(&db)
        .await
        .expect("failed to run sqlx migrations");

    let store = Arc::new(PgStore::new(db));
    let port = config.port;
    let sweep_interval = config.sweep_interval;
    let state = build_state(config, store.clone(), store.clone(), store);

    let sweeper = state.sweeper.clone().spawn(sweep_interval);
    let app = build_router(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind TCP listener");

    info!(port, "tool automation server running at http://localhost:{port}");
    axum::serve(listener, app)
        .await
        .expect("server runtime failure");
    sweeper.abort();
}
