use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use axum_prometheus::PrometheusMetricLayer;
use menu_commerce::commerce::{CommerceState, PgCommerceStore, RazorpayGateway, SystemIdentity};
use menu_commerce::{commerce_router, config};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, EnvFilter};

async fn root() -> &'static str {
    "Menu Commerce API"
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(config::DATABASE_URL.as_str())
        .await?;

    // Run migrations if available
    if let Err(error) = sqlx::migrate!().run(&pool).await {
        if *config::ALLOW_MIGRATION_FAILURE {
            tracing::warn!(
                ?error,
                "Database migrations failed but continuing due to ALLOW_MIGRATION_FAILURE"
            );
        } else {
            return Err(Box::new(error) as Box<dyn std::error::Error>);
        }
    }

    if config::GATEWAY_KEY_SECRET.is_empty() {
        tracing::warn!("GATEWAY_KEY_SECRET is empty; every payment callback will be rejected");
    }
    let gateway = RazorpayGateway::new(
        config::GATEWAY_BASE_URL.as_str(),
        config::GATEWAY_KEY_ID.as_str(),
        config::GATEWAY_KEY_SECRET.as_str(),
        config::gateway_timeout(),
    )
    .map_err(|error| Box::<dyn std::error::Error>::from(error.to_string()))?;

    let state = CommerceState::assemble(
        Arc::new(PgCommerceStore::new(pool.clone())),
        Arc::new(gateway),
        config::gateway_retry_policy(),
        config::expiry_clock(),
        config::PLAN_CURRENCY.as_str(),
        Arc::new(SystemIdentity::new(config::SYSTEM_ACTOR_ID.as_str())),
        *config::RENEWAL_WINDOW_DAYS,
    );

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let app = Router::new()
        .route("/", get(root))
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .merge(commerce_router(state))
        .layer(prometheus_layer);

    let addr: SocketAddr = format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::BIND_PORT)
        .parse()
        .map_err(|error| Box::new(error) as Box<dyn std::error::Error>)?;
    tracing::info!(%addr, "Listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
