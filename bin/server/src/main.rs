use beyond_ops_ai::{AnthropicBackend, AnthropicConfig, Orchestrator};
use beyond_ops_conversation::ConversationStore;
use beyond_ops_integration::{
    AircallClient, AircallConfig, CrmConnector, DisabledConnector, SalesforceClient,
    SalesforceConfig, TelephonyConnector,
};
use beyond_ops_kv::{KvStore, UpstashClient};
use beyond_ops_server::{AppState, ServerConfig, router};
use beyond_ops_tools::ToolExecutor;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env().expect("failed to load configuration");
    tracing::info!("Loaded configuration");

    // One key-value client for the whole process.
    let kv: Arc<dyn KvStore> = Arc::new(
        UpstashClient::from_sources(&config.kv_sources())
            .expect("key-value store is not configured"),
    );
    let store = ConversationStore::new(kv, config.conversations.store_settings());

    let crm: Arc<dyn CrmConnector> = match SalesforceConfig::from_parts(
        config.salesforce_instance_url.as_deref(),
        config.salesforce_access_token.as_deref(),
        config.salesforce_api_version.as_deref(),
    ) {
        Ok(crm_config) => Arc::new(
            SalesforceClient::new(crm_config).expect("failed to build Salesforce client"),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "CRM tools will report errors");
            Arc::new(DisabledConnector::new("salesforce"))
        }
    };

    let telephony: Arc<dyn TelephonyConnector> = match AircallConfig::from_parts(
        config.aircall_api_id.as_deref(),
        config.aircall_api_token.as_deref(),
        config.aircall_base_url.as_deref(),
    ) {
        Ok(telephony_config) => Arc::new(
            AircallClient::new(telephony_config).expect("failed to build Aircall client"),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "call activity tools will report errors");
            Arc::new(DisabledConnector::new("aircall"))
        }
    };

    let tools = Arc::new(ToolExecutor::new(crm, telephony, config.finance.tool_settings()));

    let model_config = AnthropicConfig::from_parts(
        config.anthropic_api_key.as_deref(),
        config.anthropic_model.as_deref(),
        config.anthropic_base_url.as_deref(),
        config.chat.max_tokens,
    )
    .expect("invalid model configuration");
    tracing::info!(model = %model_config.model, "Using model");
    let model =
        Arc::new(AnthropicBackend::new(model_config).expect("failed to build model client"));

    let orchestrator = Orchestrator::new(model, tools, config.chat.settings());
    let state = Arc::new(AppState::new(store, orchestrator, config.conversations.list_limit));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("failed to bind to address");

    tracing::info!("listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
