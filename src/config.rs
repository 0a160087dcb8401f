use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::auth::{RefreshSettings, DEFAULT_REDIRECT_URI, GOOGLE_AUTH_URL, GOOGLE_TOKEN_URL};
use crate::http_client::{HttpClientOptions, DRIVE_API_BASE, SHEETS_API_BASE};
use crate::tools::DEFAULT_MAX_DOWNLOAD_BYTES;

/// Lifetime of a Google access token; the refresh margin must stay below it
const ACCESS_TOKEN_LIFETIME_SECS: u64 = 3600;

/// Google Drive and Sheets tools over the Model Context Protocol
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// OAuth client ID
    #[arg(long, env = "GDRIVE_CLIENT_ID", global = true)]
    pub client_id: Option<String>,

    /// OAuth client secret
    #[arg(long, env = "GDRIVE_CLIENT_SECRET", global = true, hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Refresh token used to bootstrap credentials when none are stored
    #[arg(long, env = "GDRIVE_REFRESH_TOKEN", global = true, hide_env_values = true)]
    pub refresh_token: Option<String>,

    /// Path of the persisted credential record
    #[arg(short = 'c', long, env = "GDRIVE_CREDENTIALS_PATH", global = true)]
    pub credentials_path: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text", global = true)]
    pub log_format: String,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Serve tools over stdio (default)
    Serve,
    /// Authorize interactively and store the resulting credentials
    Auth,
    /// Show the stored credential state without contacting Google
    Status,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub command: Command,

    // OAuth client
    pub client_id: String,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
    pub credentials_path: PathBuf,

    // Token lifecycle (seconds)
    pub token_refresh_margin: u64,
    pub token_refresh_timeout: u64,
    pub token_refresh_retry_interval: u64,

    // HTTP client
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,
    pub http_max_retries: u32,
    pub max_download_bytes: u64,

    // Endpoints
    pub token_url: String,
    pub auth_url: String,
    pub redirect_uri: String,
    pub drive_api_base: String,
    pub sheets_api_base: String,

    // Logging
    pub log_level: String,
    pub log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LogFormat {
    Text,
    Json,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > .env > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();
        Self::from_args(args)
    }

    pub fn from_args(args: CliArgs) -> Result<Self> {
        let config = Config {
            command: args.command.unwrap_or(Command::Serve),

            client_id: args
                .client_id
                .filter(|s| !s.trim().is_empty())
                .context("GDRIVE_CLIENT_ID is required (use --client-id or set GDRIVE_CLIENT_ID env var)")?,

            // `status` never talks to Google, so only the other commands need the secret
            client_secret: args.client_secret.filter(|s| !s.trim().is_empty()),

            refresh_token: args.refresh_token.filter(|s| !s.trim().is_empty()),

            credentials_path: match args.credentials_path {
                Some(path) => expand_tilde(&path),
                None => default_credentials_path()
                    .context("Could not determine a config directory; set GDRIVE_CREDENTIALS_PATH")?,
            },

            token_refresh_margin: env_or("TOKEN_REFRESH_MARGIN", 300),
            token_refresh_timeout: env_or("TOKEN_REFRESH_TIMEOUT", 30),
            token_refresh_retry_interval: env_or("TOKEN_REFRESH_RETRY_INTERVAL", 60),

            http_connect_timeout: env_or("HTTP_CONNECT_TIMEOUT", 10),
            http_request_timeout: env_or("HTTP_REQUEST_TIMEOUT", 60),
            http_max_retries: env_or("HTTP_MAX_RETRIES", 3),
            max_download_bytes: env_or("MAX_DOWNLOAD_BYTES", DEFAULT_MAX_DOWNLOAD_BYTES),

            token_url: env_string_or("GOOGLE_TOKEN_URL", GOOGLE_TOKEN_URL),
            auth_url: env_string_or("GOOGLE_AUTH_URL", GOOGLE_AUTH_URL),
            redirect_uri: env_string_or("GOOGLE_REDIRECT_URI", DEFAULT_REDIRECT_URI),
            drive_api_base: env_string_or("GOOGLE_DRIVE_API_BASE", DRIVE_API_BASE),
            sheets_api_base: env_string_or("GOOGLE_SHEETS_API_BASE", SHEETS_API_BASE),

            log_level: args.log_level,
            log_format: parse_log_format(&args.log_format),
        };

        if config.command != Command::Status {
            config.client_secret()?;
        }

        Ok(config)
    }

    /// Client secret for token exchanges
    pub fn client_secret(&self) -> Result<&str> {
        self.client_secret
            .as_deref()
            .context("GDRIVE_CLIENT_SECRET is required (use --client-secret or set GDRIVE_CLIENT_SECRET env var)")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.token_refresh_timeout == 0 {
            anyhow::bail!("TOKEN_REFRESH_TIMEOUT must be greater than zero");
        }

        if self.token_refresh_margin >= ACCESS_TOKEN_LIFETIME_SECS {
            anyhow::bail!(
                "TOKEN_REFRESH_MARGIN must be below the {}s access token lifetime (got {})",
                ACCESS_TOKEN_LIFETIME_SECS,
                self.token_refresh_margin
            );
        }

        if self.token_refresh_retry_interval == 0 {
            anyhow::bail!("TOKEN_REFRESH_RETRY_INTERVAL must be greater than zero");
        }

        if self.max_download_bytes == 0 {
            anyhow::bail!("MAX_DOWNLOAD_BYTES must be greater than zero");
        }

        for (name, value) in [
            ("GOOGLE_TOKEN_URL", &self.token_url),
            ("GOOGLE_AUTH_URL", &self.auth_url),
            ("GOOGLE_DRIVE_API_BASE", &self.drive_api_base),
            ("GOOGLE_SHEETS_API_BASE", &self.sheets_api_base),
        ] {
            reqwest::Url::parse(value).with_context(|| format!("{} is not a valid URL: {}", name, value))?;
        }

        if self.credentials_path.is_dir() {
            anyhow::bail!(
                "GDRIVE_CREDENTIALS_PATH points to a directory: {}",
                self.credentials_path.display()
            );
        }

        Ok(())
    }

    pub fn refresh_settings(&self) -> RefreshSettings {
        RefreshSettings {
            margin: chrono::Duration::seconds(self.token_refresh_margin as i64),
            timeout: Duration::from_secs(self.token_refresh_timeout),
            retry_interval: Duration::from_secs(self.token_refresh_retry_interval),
        }
    }

    pub fn http_options(&self) -> HttpClientOptions {
        HttpClientOptions {
            drive_api_base: self.drive_api_base.clone(),
            sheets_api_base: self.sheets_api_base.clone(),
            connect_timeout: self.http_connect_timeout,
            request_timeout: self.http_request_timeout,
            max_retries: self.http_max_retries,
        }
    }
}

/// Default record location: `<config dir>/gdrive-mcp/credentials.json`
pub fn default_credentials_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("gdrive-mcp").join("credentials.json"))
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Parse log format from string
fn parse_log_format(s: &str) -> LogFormat {
    match s.to_lowercase().as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}
