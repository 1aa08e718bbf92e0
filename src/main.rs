use anyhow::Result;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Redirect},
    routing::{any, post},
    Extension, Json, Router,
};
use request_logger::{AccessLogger, ErrorLogger, LoggerConfig, RouteError, RouteFields};
use serde_json::Value;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, thiserror::Error)]
#[error("not ok")]
struct NotOk;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing()?;

    let config_path = std::env::var("CONFIG_PATH")
        .unwrap_or_else(|_| "config/request-logger.yaml".to_string());
    let config = LoggerConfig::load(&config_path)?;
    info!("Logger configuration loaded from {}", config_path);

    let app = create_app(config);

    let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Demo app listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn create_app(config: LoggerConfig) -> Router {
    Router::new()
        .route("/ok", any(ok))
        .route("/redirect", any(redirect))
        .route("/not-found", any(not_found))
        .route("/error", any(error))
        .route("/users", post(create_user))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(AccessLogger::new(config.access).layer())
                .layer(ErrorLogger::new(config.error).layer()),
        )
}

async fn ok() -> &'static str {
    "ok"
}

async fn redirect() -> Redirect {
    Redirect::to("/ok")
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "not found")
}

async fn error() -> Result<&'static str, RouteError> {
    Err(NotOk.into())
}

async fn create_user(Json(user): Json<Value>) -> impl IntoResponse {
    let route = RouteFields::default().with_body_field("name");
    (StatusCode::CREATED, Extension(route), Json(user))
}

fn init_tracing() -> Result<()> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());

    let subscriber = tracing_subscriber::registry();

    match log_format.as_str() {
        "json" => {
            subscriber
                .with(tracing_subscriber::fmt::layer().json())
                .with(tracing_subscriber::EnvFilter::from_default_env())
                .init();
        }
        _ => {
            subscriber
                .with(tracing_subscriber::fmt::layer())
                .with(tracing_subscriber::EnvFilter::from_default_env())
                .init();
        }
    }

    Ok(())
}
