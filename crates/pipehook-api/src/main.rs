//! pipehook webhook server

use anyhow::Context;
use clap::Parser;
use pipehook_api::services::github::GitHubFetcher;
use pipehook_api::services::router::EventRouter;
use pipehook_api::{AppState, routes};
use pipehook_config::{SystemConfig, load_system_config};
use pipehook_kube::{KubeSubmitter, KubeVolumeCreator};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pipehook-server")]
#[command(about = "Turns GitHub webhooks into Tekton PipelineRuns", long_about = None)]
struct Args {
    /// Server configuration file (KDL)
    #[arg(long, env = "PIPEHOOK_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, env = "PIPEHOOK_LISTEN")]
    listen: Option<String>,

    /// Namespace to create volumes and PipelineRuns in
    #[arg(long, env = "PIPEHOOK_NAMESPACE")]
    namespace: Option<String>,

    /// Token for reading definitions from GitHub
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    /// Secret used to verify webhook signatures
    #[arg(long, env = "PIPEHOOK_WEBHOOK_SECRET", hide_env_values = true)]
    webhook_secret: Option<String>,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,
}

impl Args {
    fn system_config(&self) -> anyhow::Result<SystemConfig> {
        let mut config = match &self.config {
            Some(path) => load_system_config(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => SystemConfig::default(),
        };

        if let Some(listen) = &self.listen {
            config.server.listen = listen.clone();
        }
        if let Some(namespace) = &self.namespace {
            config.server.namespace = namespace.clone();
        }
        if let Some(secret) = &self.webhook_secret {
            config.server.webhook_secret = Some(secret.clone());
        }
        Ok(config)
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let config = args.system_config()?;

    info!(namespace = %config.server.namespace, "Connecting to Kubernetes...");
    let client = pipehook_kube::default_client().await?;
    let router = EventRouter::new(
        &config,
        Arc::new(GitHubFetcher::new(
            &config.server.github_api,
            args.github_token.clone(),
        )),
        Arc::new(KubeVolumeCreator::with_client(client.clone())),
        Arc::new(KubeSubmitter::with_client(client)),
    );

    let state = AppState::new(router, config.server.webhook_secret.clone());
    let app = routes::router(state).layer(TraceLayer::new_for_http());

    info!("Starting server on {}", config.server.listen);
    let listener = TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.server.listen))?;
    axum::serve(listener, app).await?;

    Ok(())
}
