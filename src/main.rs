use sqlx::postgres::PgPoolOptions;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use omok_auth::accounts::GoogleTokenInfoVerifier;
use omok_auth::auth::SystemClock;
use omok_auth::configuration::get_configuration;
use omok_auth::repository::PgStore;
use omok_auth::startup::{run, AppServices};
use omok_auth::telemetry::init_telemetry;

const GOOGLE_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_telemetry();

    tracing::info!("Starting application");

    let configuration = match get_configuration() {
        Ok(config) => {
            tracing::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!("Failed to read configuration: {}", e);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Configuration error",
            ));
        }
    };

    if let Err(e) = configuration.jwt.validate() {
        tracing::error!("Invalid token settings: {}", e);
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            e.to_string(),
        ));
    }
    tracing::info!(jwt = ?configuration.jwt, "Token settings validated");

    tracing::info!("Attempting to connect to database");
    let pool = PgPoolOptions::new()
        .max_connections(configuration.database.max_connections)
        .connect(&configuration.database.connection_string())
        .await
        .map_err(|e| {
            tracing::error!("Failed to create connection pool: {}", e);
            std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "Database connection error",
            )
        })?;
    tracing::info!("Database connection pool created successfully");

    let http_client = reqwest::Client::builder()
        .timeout(GOOGLE_HTTP_TIMEOUT)
        .build()
        .map_err(|e| {
            tracing::error!("Failed to build HTTP client: {}", e);
            std::io::Error::new(std::io::ErrorKind::Other, "HTTP client error")
        })?;
    if configuration.google.web_client_id.is_empty() {
        tracing::warn!("google.web_client_id is not set, /link-google will fail");
    }
    let google = Arc::new(GoogleTokenInfoVerifier::new(
        configuration.google.clone(),
        http_client,
    ));

    let services = AppServices::new(
        PgStore::new(pool),
        configuration.jwt.clone(),
        google,
        Arc::new(SystemClock),
    );

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(&address)?;
    tracing::info!("Server listening on: {}", address);

    run(listener, services)?.await
}
