use std::{fs, io};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use axum::extract::Request;
use axum::ServiceExt;
use axum_server::tls_rustls::RustlsConfig;
use clap::{Parser, Subcommand};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tokio::fs::File;
use tower_http::normalize_path::NormalizePathLayer;
use tower_layer::Layer;
use tracing::metadata::LevelFilter;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter, EnvFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use skiff_api::api;
use skiff_api::app_state::AppState;
use skiff_api::config::{self, Config, DatabaseConfig, LogConfig};
use skiff_api::database::Database;
use skiff_api::dto::user::ProjectRole;
use skiff_api::mail::SmtpMailer;
use skiff_api::registry::{cache::{self, RepositoryCache}, RegistryClient};

#[derive(Debug, Parser)]
#[command(name = "skiff-api", version, about = "Web console API for a Docker registry")]
struct Cli {
    /// Path of the TOML config file
    #[arg(long, env = "SKIFF_CONFIG", default_value = "config.toml")]
    config_path: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Create a console user
    CreateUser {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        sysadmin: bool,
    },
    /// Create a project owned by an existing user
    CreateProject {
        #[arg(long)]
        name: String,
        #[arg(long)]
        owner: String,
        #[arg(long)]
        public: bool,
    },
    /// Give a user a role in a project
    AddMember {
        #[arg(long)]
        project: String,
        #[arg(long)]
        username: String,
        /// One of admin, developer or guest
        #[arg(long, default_value = "guest")]
        role: String,
    },
}

/// Create directory tree up to the file in `path`.
fn create_path_to(path: &str) -> io::Result<()> {
    let path = PathBuf::from(path);

    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    Ok(())
}

fn init_logging(logc: &LogConfig) -> anyhow::Result<Vec<WorkerGuard>> {
    // Create log directory if it doesn't exist
    let log_path = &logc.path;
    fs::create_dir_all(log_path)?;

    // Get a rolling file appender depending on the config
    let file_appender = match logc.roll_period {
        config::RollPeriod::Minutely => tracing_appender::rolling::minutely(log_path, "skiff.log"),
        config::RollPeriod::Hourly => tracing_appender::rolling::hourly(log_path, "skiff.log"),
        config::RollPeriod::Daily => tracing_appender::rolling::daily(log_path, "skiff.log"),
        config::RollPeriod::Never => tracing_appender::rolling::never(log_path, "skiff.log"),
    };

    // Create non blocking loggers
    let (file_appender_nb, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_nb, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    // Get json or text layers
    let (json_a, json_b, plain_a, plain_b) = match logc.format {
        config::LogFormat::Json => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(file_appender_nb)
                    .json()
            ),
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(stdout_nb)
                    .json()
            ),
            None,
            None
        ),
        config::LogFormat::Human => (
            None,
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(file_appender_nb)
                    .with_ansi(false)
            ),
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(stdout_nb)
            )
        )
    };

    // Change filter to only log skiff_api or everything
    let targets_filter = if logc.env_filter.is_some() {
        None
    } else {
        Some(
            filter::Targets::new()
                .with_target("skiff_api", logc.level)
                .with_default(LevelFilter::INFO)
        )
    };

    // Get env filter if specified
    let env_filter = match &logc.env_filter {
        Some(env_filter) => Some(EnvFilter::from_str(env_filter)
            .with_context(|| format!("invalid log env_filter '{}'", env_filter))?),
        None => None,
    };

    tracing_subscriber::registry()
        .with(json_a)
        .with(json_b)
        .with(plain_a)
        .with(plain_b)
        .with(targets_filter)
        .with(env_filter)
        .init();

    Ok(vec![file_guard, stdout_guard])
}

async fn connect_database(config: &DatabaseConfig) -> anyhow::Result<Pool<Sqlite>> {
    let sqlite_config = match config {
        DatabaseConfig::Sqlite(sqlite) => sqlite,
    };

    // Create a database file if it doesn't exist already
    if !Path::new(&sqlite_config.path).exists() {
        create_path_to(&sqlite_config.path)?;
        File::create(&sqlite_config.path).await?;
    }

    let connection_options = SqliteConnectOptions::from_str(&format!("sqlite://{}", &sqlite_config.path))?
        .journal_mode(SqliteJournalMode::Wal);
    let pool = SqlitePoolOptions::new()
        .max_connections(15)
        .connect_with(connection_options).await?;
    pool.run_migrations().await?;

    Ok(pool)
}

async fn serve(mut config: Config, pool: Pool<Sqlite>) -> anyhow::Result<()> {
    // set jwt key
    config.jwt_key = pool.get_jwt_secret().await?;

    let registry = RegistryClient::new(&config.registry)?;
    let mailer = SmtpMailer::new(&config.mail)?;
    let repositories = Arc::new(RepositoryCache::new());

    let refresher = cache::spawn_refresher(
        repositories.clone(),
        registry.clone(),
        config.registry.catalog_account.clone(),
        Duration::from_secs(config.registry.catalog_refresh_secs.max(1)),
    );

    let app_addr = SocketAddr::from_str(&format!("{}:{}", config.listen_address, config.listen_port))?;
    let tls_config = config.tls.clone();
    info!("Using registry at {}", registry.base_url());

    let state = Arc::new(AppState::new(Arc::new(pool), registry, repositories, Arc::new(mailer), config));
    let app = NormalizePathLayer::trim_trailing_slash().layer(api::router(state));

    match tls_config {
        Some(tls) if tls.enable => {
            info!("Starting https server, listening on {}", app_addr);

            let config = RustlsConfig::from_pem_file(&tls.cert, &tls.key).await?;

            axum_server::bind_rustls(app_addr, config)
                .serve(ServiceExt::<Request>::into_make_service(app))
                .await?;
        },
        _ => {
            info!("Starting http server, listening on {}", app_addr);

            let listener = tokio::net::TcpListener::bind(app_addr).await?;
            axum::serve(listener, ServiceExt::<Request>::into_make_service(app))
                .await?;
        }
    }

    refresher.abort();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::new(&cli.config_path)
        .with_context(|| format!("failed to load config from '{}'", cli.config_path.display()))?;

    let _logging_guards = init_logging(&config.log)?;
    let pool = connect_database(&config.database).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, pool).await?,
        Command::CreateUser { username, email, password, sysadmin } => {
            let user = pool.create_user(&username, &email, &password, sysadmin).await?;
            info!("Created user '{}' with id {}", user.username, user.user_id);
        },
        Command::CreateProject { name, owner, public } => {
            let owner = pool.get_user_by_username(&owner).await?
                .ok_or_else(|| anyhow!("user '{}' does not exist", owner))?;

            let project = pool.create_project(&name, public, owner.user_id).await?;
            info!("Created project '{}' with id {}", project.name, project.project_id);
        },
        Command::AddMember { project, username, role } => {
            let role = ProjectRole::try_from(role.as_str())?;
            let project = pool.get_project_by_name(&project).await?
                .ok_or_else(|| anyhow!("project '{}' does not exist", project))?;
            let user = pool.get_user_by_username(&username).await?
                .ok_or_else(|| anyhow!("user '{}' does not exist", username))?;

            pool.add_project_member(project.project_id, user.user_id, role).await?;
            info!("Added '{}' to '{}' as {:?}", user.username, project.name, role);
        },
    }

    Ok(())
}
