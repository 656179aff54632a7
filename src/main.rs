use std::{any::Any, net::SocketAddr, path::PathBuf, sync::Arc};

use axum::{
    Router,
    response::{IntoResponse, Response},
};
use clap::Parser;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

mod config;
mod middleware;
mod models;
mod observability;
mod routes;
mod services;

#[cfg(test)]
mod tests;

use config::{AppConfig, ClientRegistry};
use routes::ApiError;
use services::{LangSmithClient, MetricsSource, SourceError, UsageService};

/// Config file picked up from the working directory when `--config` is not given.
const DEFAULT_CONFIG_FILE: &str = "cyclemeter.toml";

/// Shared, read-only state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub usage: UsageService,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, source: Arc<dyn MetricsSource>) -> Self {
        let usage = UsageService::from_config(source, &config.langsmith);
        Self { config, usage }
    }

    /// State backed by the LangSmith API.
    pub fn from_config(config: Arc<AppConfig>) -> Result<Self, SourceError> {
        let client = LangSmithClient::from_config(&config.langsmith)?;
        Ok(Self::new(config, Arc::new(client)))
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.config.clients
    }
}

#[derive(Parser, Debug)]
#[command(version, about = "Billing-cycle token usage API", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (defaults to ./cyclemeter.toml if it exists,
    /// otherwise the built-in default configuration)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Start the API server (default)
    Serve,
    /// Write the default configuration file
    Init {
        /// Path to create the config file (defaults to ./cyclemeter.toml)
        #[arg(short, long)]
        output: Option<String>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Print the billing window for a cycle day as JSON
    Window {
        /// Day of month the billing cycle starts on (1-31)
        #[arg(long)]
        cycle_day: u32,
        /// Reference date (YYYY-MM-DD), defaults to today (UTC)
        #[arg(long)]
        date: Option<String>,
    },
    /// List configured clients and their dashboard URLs
    Clients,
}

/// Load configuration, returning the file it came from (if any).
fn load_config(explicit_path: Option<&str>) -> Result<(AppConfig, Option<PathBuf>), String> {
    let path = match explicit_path {
        Some(path) => {
            let path = PathBuf::from(path);
            if !path.exists() {
                return Err(format!("Config file not found: {}", path.display()));
            }
            Some(path)
        }
        None => Some(PathBuf::from(DEFAULT_CONFIG_FILE)).filter(|p| p.exists()),
    };

    let config = match &path {
        Some(path) => AppConfig::from_file(path),
        None => AppConfig::from_str(config::default_config_toml()),
    }
    .map_err(|e| e.to_string())?;

    Ok((config, path))
}

pub fn build_app(config: &AppConfig, state: AppState) -> Router {
    with_middleware(config, Router::new().nest("/api", routes::api_routes())).with_state(state)
}

/// Add the fallbacks and middleware stack shared by every route.
pub(crate) fn with_middleware(config: &AppConfig, routes: Router<AppState>) -> Router<AppState> {
    let mut app = routes
        .method_not_allowed_fallback(routes::method_not_allowed)
        .fallback(routes::endpoint_not_found)
        .layer(axum::middleware::from_fn(middleware::request_id_middleware));

    if let Some(cors_layer) = config.server.cors.clone().into_layer() {
        app = app.layer(cors_layer);
    }

    app.layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
}

/// Render a handler panic as the standard 500 envelope.
fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else {
        "unknown panic payload".to_string()
    };

    ApiError::Internal(format!("handler panicked: {detail}")).into_response()
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Some(Command::Init { output, force }) => run_init(output, force),
        Some(Command::Window { cycle_day, date }) => run_window(cycle_day, date.as_deref()),
        Some(Command::Clients) => run_clients(args.config.as_deref()),
        Some(Command::Serve) | None => run_server(args.config.as_deref()).await,
    }
}

/// Write the default configuration file.
fn run_init(output: Option<String>, force: bool) {
    let output_path = PathBuf::from(output.as_deref().unwrap_or(DEFAULT_CONFIG_FILE));

    if output_path.exists() && !force {
        eprintln!(
            "Config file already exists: {}\nUse --force to overwrite.",
            output_path.display()
        );
        std::process::exit(1);
    }

    if let Some(parent) = output_path.parent()
        && !parent.as_os_str().is_empty()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        eprintln!("Failed to create directory {}: {}", parent.display(), e);
        std::process::exit(1);
    }

    if let Err(e) = std::fs::write(&output_path, config::default_config_toml()) {
        eprintln!("Failed to write config file: {}", e);
        std::process::exit(1);
    }

    println!("Created config file: {}", output_path.display());
    println!();
    println!("Set your LangSmith API key, then start the server:");
    println!("  export {}=...", config::API_KEY_ENV);
    println!("  cyclemeter serve --config {}", output_path.display());
}

/// Print the billing window containing a date.
fn run_window(cycle_day: u32, date: Option<&str>) {
    let reference = match date
        .map(|d| chrono::NaiveDate::parse_from_str(d, "%Y-%m-%d"))
        .transpose()
    {
        Ok(reference) => reference,
        Err(e) => {
            eprintln!("Invalid --date (expected YYYY-MM-DD): {}", e);
            std::process::exit(1);
        }
    };

    let window = match services::compute_window(cycle_day, reference) {
        Ok(window) => window,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let report = serde_json::json!({
        "cycle_day": cycle_day,
        "start": window.start,
        "end": window.end,
        "period_days": window.period_days(),
        "calendar_days": window.calendar_days().len(),
    });

    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Failed to serialize window: {}", e);
            std::process::exit(1);
        }
    }
}

/// List configured clients.
fn run_clients(explicit_config_path: Option<&str>) {
    let (config, _) = match load_config(explicit_config_path) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if config.clients.is_empty() {
        println!("No clients configured.");
        return;
    }

    for (id, client) in config.clients.iter() {
        println!("{id}");
        println!("  name:      {}", client.name);
        println!("  project:   {}", client.project);
        println!("  cycle day: {}", client.cycle_day);
        if let Some(url) = config.server.client_dashboard_url(id) {
            println!("  dashboard: {url}");
        }
    }
    if let Some(url) = config.server.admin_dashboard_url() {
        println!();
        println!("Admin dashboard: {url}");
    }
}

async fn run_server(explicit_config_path: Option<&str>) {
    let (config, config_path) = match load_config(explicit_config_path) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("Failed to initialize tracing: {}", e);
        std::process::exit(1);
    }

    match &config_path {
        Some(path) => tracing::info!(config_file = %path.display(), "Starting cyclemeter"),
        None => tracing::info!("Starting cyclemeter with built-in default configuration"),
    }

    if !config.langsmith.has_api_key() {
        tracing::warn!(
            "{} is not configured. Usage endpoints will fail until it is set.",
            config::API_KEY_ENV
        );
    }

    for (id, client) in config.clients.iter() {
        tracing::info!(
            client_id = %id,
            name = %client.name,
            project = %client.project,
            cycle_day = client.cycle_day,
            dashboard = config.server.client_dashboard_url(id).as_deref().unwrap_or("-"),
            "Client configured"
        );
    }
    if let Some(url) = config.server.admin_dashboard_url() {
        tracing::info!(dashboard = %url, "Admin dashboard");
    }

    let config = Arc::new(config);
    let state = match AppState::from_config(config.clone()) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "Failed to create LangSmith client");
            std::process::exit(1);
        }
    };
    let app = build_app(&config, state);

    let bind_addr = SocketAddr::new(config.server.host, config.server.port);
    let listener = match tokio::net::TcpListener::bind(bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(address = %bind_addr, error = %e, "Failed to bind");
            std::process::exit(1);
        }
    };

    tracing::info!("Server listening on http://{}", bind_addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }

    tracing::info!("Shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, finishing in-flight requests");
}
