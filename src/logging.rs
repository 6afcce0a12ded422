use std::env;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Initializes the logging and tracing system.
///
/// Two modes, selected by `APP_ENV`:
/// - `development` (default): pretty console output.
/// - `production`: JSON lines for aggregation.
pub fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("forward_bot=info,teloxide=info,axum=info"));

    let environment = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

    let registry = Registry::default().with(env_filter);

    if environment == "production" {
        let json_layer = fmt::layer().json().with_target(true);
        registry.with(json_layer).init();
    } else {
        let fmt_layer = fmt::layer().pretty().with_target(true);
        registry.with(fmt_layer).init();
    }

    tracing::info!(env = %environment, "logging initialized");
}
