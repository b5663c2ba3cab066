use petro_analyst::{
    api::{start_server, ApiState},
    gateway::{EventLog, OutboundRateLimiter},
    AppConfig, Pipeline, SessionRegistry,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;
    if !config.openai.is_configured() && !config.gemini.is_configured() {
        warn!("Neither OPENAI_API_KEY nor GEMINI_API_KEY is set; answers will use limited mode");
    }

    info!("Petro Analyst - API Server");
    info!("Port: {}", config.api_port);

    let events = Arc::new(EventLog::default());
    let limiter = Arc::new(OutboundRateLimiter::per_minute(config.outbound_calls_per_minute));
    let pipeline = Pipeline::from_config(&config, Arc::clone(&limiter), events.clone())?;

    let state = ApiState {
        pipeline: Arc::new(pipeline),
        sessions: Arc::new(SessionRegistry::with_limits(
            config.pipeline.max_retained_turns,
            config.pipeline.session_idle_ttl,
            config.pipeline.max_sessions,
        )),
        events,
        limiter,
    };

    info!("Pipeline initialized, starting API server");
    start_server(state, config.api_port).await?;

    Ok(())
}
