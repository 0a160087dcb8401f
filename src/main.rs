use anyhow::{Context, Result};
use chrono::Utc;
use dialoguer::Confirm;
use std::sync::Arc;

use gdrive_mcp::auth::{
    AuthManager, Authorizer, CredentialBundle, CredentialStore, FileCredentialStore,
    GoogleTokenEndpoint, InteractiveAuthorizer, PersistedCredentialRecord, RefreshTokenAuthorizer,
};
use gdrive_mcp::config::{Command, Config, LogFormat};
use gdrive_mcp::http_client::GoogleHttpClient;
use gdrive_mcp::mcp::McpServer;
use gdrive_mcp::tools::ToolDispatcher;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let config = Config::load()?;
    config.validate()?;

    init_logging(&config);

    tracing::debug!(
        credentials_path = %config.credentials_path.display(),
        command = ?config.command,
        "Configuration loaded"
    );

    match config.command {
        Command::Serve => serve(config).await,
        Command::Auth => authorize(config).await,
        Command::Status => status(&config),
    }
}

/// Initialize logging; stdout carries the protocol so everything goes to stderr
fn init_logging(config: &Config) {
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.with_ansi(false).init(),
    }
}

fn token_endpoint(config: &Config) -> Result<GoogleTokenEndpoint> {
    GoogleTokenEndpoint::new(
        config.token_url.clone(),
        config.client_id.clone(),
        config.client_secret()?.to_string(),
        std::time::Duration::from_secs(config.token_refresh_timeout),
    )
}

/// Serve tools over stdin/stdout until EOF or a shutdown signal
async fn serve(config: Config) -> Result<()> {
    tracing::info!("🚀 gdrive-mcp {} starting...", env!("CARGO_PKG_VERSION"));

    // Initialize authentication manager
    let store = Arc::new(FileCredentialStore::new(config.credentials_path.clone()));
    let endpoint = Arc::new(token_endpoint(&config)?);

    let mut manager = AuthManager::new(store, endpoint, config.refresh_settings())
        .with_client_id(config.client_id.clone());
    if let Some(refresh_token) = &config.refresh_token {
        manager = manager.with_authorizer(Arc::new(RefreshTokenAuthorizer::new(refresh_token.clone())));
    }
    let auth_manager = Arc::new(manager);

    // Fail fast: without a credential every tool call would fail
    auth_manager
        .check_startup_credentials(&config.credentials_path)
        .await?;

    auth_manager.setup_token_refresh();

    let http_client = Arc::new(GoogleHttpClient::new(
        auth_manager.clone(),
        config.http_options(),
    )?);
    tracing::info!("✅ HTTP client initialized");

    let dispatcher = Arc::new(ToolDispatcher::new(http_client, config.max_download_bytes));
    let server = McpServer::new(dispatcher);

    tracing::info!("🚀 Serving MCP over stdio");

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();

    let interrupted = tokio::select! {
        result = server.run(stdin, stdout) => {
            result?;
            false
        }
        _ = shutdown_signal() => true,
    };

    auth_manager.shutdown().await;
    tracing::info!("👋 Server shutdown complete");

    if interrupted {
        // A pending blocking stdin read would otherwise hold up runtime shutdown
        std::process::exit(0);
    }

    Ok(())
}

/// Interactive authorization: consent URL, pasted code, persisted record
async fn authorize(config: Config) -> Result<()> {
    let store = FileCredentialStore::new(config.credentials_path.clone());

    let existing = match store.read_record() {
        Ok(record) => record.is_some(),
        Err(e) => {
            tracing::warn!("Existing credential file is unreadable: {}", e);
            true
        }
    };

    if existing {
        let overwrite = Confirm::new()
            .with_prompt(format!(
                "Credentials already stored at {}. Replace them?",
                store.path().display()
            ))
            .default(false)
            .interact()
            .context("Failed to read confirmation")?;

        if !overwrite {
            eprintln!("Keeping existing credentials.");
            return Ok(());
        }
    }

    let endpoint = token_endpoint(&config)?;
    let authorizer = InteractiveAuthorizer::new(
        config.auth_url.clone(),
        config.client_id.clone(),
        config.redirect_uri.clone(),
    );

    let grant = authorizer.authorize(&endpoint).await?;

    let now = Utc::now();
    let refresh_token = grant.refresh_token.clone().unwrap_or_default();
    let bundle = CredentialBundle::from_grant(grant, refresh_token, now);
    let record = PersistedCredentialRecord::new(Some(config.client_id.clone()), bundle, now);

    store.save(&record)?;

    eprintln!();
    eprintln!("✅ Credentials saved to {}", store.path().display());
    Ok(())
}

/// Print the persisted record state without any network access
fn status(config: &Config) -> Result<()> {
    let store = FileCredentialStore::new(config.credentials_path.clone());

    println!("  Credentials: {}", store.path().display());

    let record = match store.read_record()? {
        Some(record) => record,
        None => {
            println!("  State:       not authorized (run `gdrive-mcp auth`)");
            return Ok(());
        }
    };

    let now = Utc::now();
    let bundle = &record.credentials;
    let credential = bundle.credential();

    println!(
        "  Client ID:   {}",
        record.client_id.as_deref().unwrap_or("(not recorded)")
    );
    if record.client_id.as_deref().is_some_and(|id| id != config.client_id) {
        println!("  Warning:     stored for a different client ID than configured");
    }
    println!("  Saved at:    {}", record.saved_at);
    println!("  Token:       {}", credential.redacted());
    println!("  Expires at:  {}", bundle.expires_at);
    if bundle.is_expired(now) {
        println!("  State:       access token expired (will refresh on next use)");
    } else {
        let remaining = bundle.expires_at - now;
        println!(
            "  State:       valid for {}m {}s",
            remaining.num_minutes(),
            remaining.num_seconds() % 60
        );
    }
    println!(
        "  Refresh:     {}",
        if bundle.refresh_token.is_empty() {
            "missing"
        } else {
            "present"
        }
    );

    Ok(())
}

/// Handle graceful shutdown signal
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown...");
        },
    }
}
