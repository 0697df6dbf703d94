use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use tubely::{
    app, build_state, config,
    services::{auth::issue_access_token, video_store::run_migrations},
};

/// Lifetime of tokens printed by `--issue-token`.
const ISSUED_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config + run mode ---
    let (cfg, mode) = config::AppConfig::from_env_and_args()?;

    if let Some(user) = mode.issue_token {
        let token = issue_access_token(user, &cfg.jwt_secret, ISSUED_TOKEN_TTL)?;
        tracing::info!(user_id = %user, "Issued access token");
        println!("{token}");
        return Ok(());
    }

    tracing::info!("Starting tubely with config: {:?}", cfg);

    // --- Ensure assets directory exists ---
    if !Path::new(&cfg.assets_dir).exists() {
        fs::create_dir_all(&cfg.assets_dir)?;
        tracing::info!("Created assets directory at {}", cfg.assets_dir);
    }

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    tracing::debug!("Connecting using raw URL => {}", db_url);

    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?,
    );

    // --- Handle migration mode ---
    if mode.migrate_only || mode.auto_migrate {
        run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        if mode.migrate_only {
            return Ok(()); // exit after migration
        }
    }

    // --- Build state + router ---
    let state = build_state(&cfg, db).await?;
    let app = app(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
