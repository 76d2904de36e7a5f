mod auth;
mod cli;
mod config;
mod draft;
mod error;
mod http;
mod metadata;
mod progress;
mod server;
mod storage;
mod types;

use std::sync::Arc;

use chrono::Duration;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command};
use crate::config::{ServerConfig, open_store};
use crate::draft::RoadmapDraft;
use crate::http::AppState;
use crate::metadata::{PKG_NAME, PKG_VERSION};
use crate::progress::{ImportOutcome, ProgressService};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => {
            let config = ServerConfig::from_args(&args)?;
            let store = open_store(&args.store)?;
            tracing::info!(
                version = PKG_VERSION,
                store = store.backend_name(),
                "Starting roadmap progress service"
            );
            for user in &args.session_for {
                let session = auth::issue_session(store.as_ref(), user, config.session_ttl).await?;
                println!("{user}\t{}", session.token);
            }
            let listener = tokio::net::TcpListener::bind(config.http_addr).await?;
            let state = Arc::new(AppState::new(ProgressService::new(store), config));
            server::serve(listener, state, async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to listen for ctrl-c");
                    std::future::pending::<()>().await;
                }
            })
            .await?;
        }
        Command::Session {
            store,
            user,
            session_ttl_hours,
        } => {
            let store = open_store(&store)?;
            let ttl = Duration::hours(i64::from(session_ttl_hours));
            let session = auth::issue_session(store.as_ref(), &user, ttl).await?;
            println!("{}", session.token);
        }
        Command::Import { store, user, file } => {
            let text = tokio::fs::read_to_string(&file).await?;
            let draft = RoadmapDraft::from_generated_text(&text)?;
            let service = ProgressService::new(open_store(&store)?);
            let (roadmap, outcome) = service.import(&user, &draft.interest, draft.nodes).await?;
            let verb = match outcome {
                ImportOutcome::Created => "Created",
                ImportOutcome::Replaced => "Replaced",
            };
            println!(
                "{verb} roadmap {} for {user} ({} nodes, interest '{}')",
                roadmap.id,
                roadmap.nodes.len(),
                roadmap.interest
            );
        }
        Command::Show { store, user } => {
            let service = ProgressService::new(open_store(&store)?);
            let view = service.fetch(&user).await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Command::Version => {
            println!("{PKG_NAME} {PKG_VERSION}");
        }
    }

    Ok(())
}
