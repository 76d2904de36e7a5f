use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::auth::DEFAULT_SESSION_TTL_HOURS;
use crate::metadata::{PKG_DESCRIPTION, PKG_NAME, PKG_VERSION};

#[derive(Parser, Debug, Clone)]
#[command(name = PKG_NAME)]
#[command(version = PKG_VERSION)]
#[command(about = PKG_DESCRIPTION, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the HTTP API
    Serve(ServeArguments),
    /// Mint a session token for a user and print it
    Session {
        #[command(flatten)]
        store: StoreArguments,
        /// User id the session authenticates as
        #[arg(long)]
        user: String,
        /// Sessions older than this many hours are pruned
        #[arg(long, env = "ROADMAP_SESSION_TTL_HOURS", default_value_t = DEFAULT_SESSION_TTL_HOURS)]
        session_ttl_hours: u32,
    },
    /// Load a generated roadmap draft for a user (creates or replaces)
    Import {
        #[command(flatten)]
        store: StoreArguments,
        #[arg(long)]
        user: String,
        /// File holding the generated JSON, optionally wrapped in a code fence
        #[arg(long)]
        file: PathBuf,
    },
    /// Print a user's roadmap, progress and summary as JSON
    Show {
        #[command(flatten)]
        store: StoreArguments,
        #[arg(long)]
        user: String,
    },
    /// Print version information
    Version,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// JSON document under the data directory
    File,
    /// Process memory; nothing survives a restart
    Memory,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

#[derive(Args, Debug, Clone)]
pub struct StoreArguments {
    /// Storage backend
    #[arg(long, env = "ROADMAP_STORE", value_enum, default_value_t = StoreKind::File)]
    pub store: StoreKind,

    /// Directory holding roadmaps.json (defaults to the platform data dir)
    #[arg(long, env = "ROADMAP_DATA_DIR")]
    pub data_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArguments {
    #[command(flatten)]
    pub store: StoreArguments,

    /// HTTP bind address
    #[arg(long, env = "ROADMAP_HTTP_ADDR", default_value = "127.0.0.1:5000")]
    pub http_addr: String,

    /// Name of the cookie carrying the session token
    #[arg(long, env = "ROADMAP_SESSION_COOKIE", default_value = "roadmap.sid")]
    pub session_cookie: String,

    /// Development mode exposes internal error detail in 500 responses
    #[arg(long, env = "ROADMAP_ENV", value_enum, default_value_t = Environment::Production)]
    pub environment: Environment,

    /// Largest accepted request body, in bytes
    #[arg(long, env = "ROADMAP_MAX_BODY_BYTES", default_value_t = 256 * 1024)]
    pub max_body_bytes: usize,

    /// Session lifetime in hours; older sessions are rejected and revoked
    #[arg(long, env = "ROADMAP_SESSION_TTL_HOURS", default_value_t = DEFAULT_SESSION_TTL_HOURS)]
    pub session_ttl_hours: u32,

    /// Mint a session for this user at startup and print its token (repeatable).
    /// The only way to get a session into a memory store.
    #[arg(long = "session-for", value_name = "USER")]
    pub session_for: Vec<String>,
}

impl ServeArguments {
    /// Validate CLI/environment-derived arguments.
    pub fn validate(&self) -> Result<(), String> {
        self.http_addr
            .parse::<SocketAddr>()
            .map_err(|e| format!("Invalid ROADMAP_HTTP_ADDR '{}': {e}", self.http_addr))?;
        let cookie = self.session_cookie.trim();
        if cookie.is_empty() || cookie.contains([';', '=', ' ']) {
            return Err(format!(
                "Invalid ROADMAP_SESSION_COOKIE '{}'",
                self.session_cookie
            ));
        }
        if self.max_body_bytes == 0 {
            return Err("ROADMAP_MAX_BODY_BYTES must be greater than zero".to_string());
        }
        if self.session_ttl_hours == 0 {
            return Err("ROADMAP_SESSION_TTL_HOURS must be greater than zero".to_string());
        }
        if self.session_for.iter().any(|u| u.trim().is_empty()) {
            return Err("--session-for needs a non-empty user id".to_string());
        }
        Ok(())
    }
}
