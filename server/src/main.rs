use clap::Parser;
use std::net::SocketAddr;
use tokio::net::TcpListener;

use booking_server::auth::jwt::{self, JwtSettings};
use booking_server::config::{generate_config_template, Cli, Config};
use booking_server::state::AppState;
use booking_server::{db, routes};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Handle --generate-config: print template and exit
    if cli.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load(&cli)?;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("booking_server=info"));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(env_filter).init();
    }

    tracing::info!("Booking real-time server v{} starting", env!("CARGO_PKG_VERSION"));

    let db = db::init_db(&config.data_dir)?;

    let key = if config.jwt.key.is_empty() {
        tracing::warn!("No [jwt] key configured, using the key in the data directory");
        jwt::load_or_generate_jwt_secret(&config.data_dir)?
    } else {
        config.jwt.key.clone().into_bytes()
    };
    let jwt_settings = JwtSettings {
        issuer: config.jwt.issuer.clone(),
        audience: config.jwt.audience.clone(),
        key,
    };

    let app_state = AppState::new(db, jwt_settings).with_keepalive((&config.keepalive).into());
    let app = routes::build_router(app_state, &config.cors, &config.rate_limit);

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
