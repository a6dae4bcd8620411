use anyhow::Context;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::{Args, Parser, Subcommand};
use printd::api::{self, ApiState, SubmitPrintRequest};
use printd::auth::UserDirectory;
use printd::client::EndpointClient;
use printd::config::{DaemonConfig, EndpointConfig, ServerConfig};
use printd::job_poller::JobPoller;
use printd::sqlite_store::SqliteJobStore;
use printd::telemetry::TelemetryCollector;
use printd::{logging, sentry_init, shutdown};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "printd", version, about = "Print queue server and print daemon")]
struct Cli {
    /// Also write logs to a daily-rotated file in this directory
    #[arg(long, global = true, env = "PRINTD_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the print queue server
    Serve {
        /// Server config file (JSON)
        #[arg(long, env = "PRINTD_SERVER_CONFIG")]
        config: PathBuf,
        /// Override the listen address
        #[arg(long)]
        listen: Option<String>,
        /// Override the database file
        #[arg(long)]
        database: Option<PathBuf>,
    },
    /// Poll print servers and print their jobs
    Daemon(DaemonArgs),
    /// Submit a file for printing
    Submit {
        #[command(flatten)]
        server: ServerArgs,
        /// Language tag used for syntax highlighting
        #[arg(long, short)]
        language: Option<String>,
        /// Name to submit the file under, the file's own name by default
        #[arg(long)]
        filename: Option<String>,
        file: PathBuf,
    },
}

#[derive(Args)]
struct ServerArgs {
    /// Base URL of the printing API
    #[arg(long, env = "PRINTD_URL")]
    url: Option<String>,
    #[arg(long, env = "PRINTD_USERNAME")]
    username: Option<String>,
    #[arg(long, env = "PRINTD_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

impl ServerArgs {
    fn endpoint(&self) -> anyhow::Result<EndpointConfig> {
        let url = self.url.clone().context("--url is required")?;
        let username = self.username.clone().context("--username is required")?;
        let password = self.password.clone().context("--password is required")?;
        Ok(EndpointConfig {
            name: "default".to_string(),
            url,
            username,
            password,
            auto_done: None,
        })
    }
}

#[derive(Args)]
struct DaemonArgs {
    /// Daemon config file (JSON); otherwise a single endpoint from the flags
    #[arg(long, env = "PRINTD_DAEMON_CONFIG")]
    config: Option<PathBuf>,
    #[command(flatten)]
    server: ServerArgs,
    /// Printer destination, system default when unset
    #[arg(long, short = 'P')]
    printer: Option<String>,
    /// Leave printed jobs claimed instead of marking them done
    #[arg(long)]
    no_auto_done: bool,
    /// Do not wait for the print queue to drain between jobs
    #[arg(long)]
    no_wait: bool,
}

impl DaemonArgs {
    fn into_config(self) -> anyhow::Result<DaemonConfig> {
        let mut config = match &self.config {
            Some(path) => DaemonConfig::load(path)?,
            None => DaemonConfig {
                endpoints: vec![self.server.endpoint()?],
                ..Default::default()
            },
        };

        if self.printer.is_some() {
            config.printer = self.printer;
        }
        if self.no_auto_done {
            config.auto_done = false;
        }
        if self.no_wait {
            config.wait_for_queue = false;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _log_guard = logging::init(cli.log_dir.as_deref());

    // Must be kept alive
    let _sentry_guard = sentry_init::init();

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Serve {
            config,
            listen,
            database,
        } => serve(config, listen, database).await,
        Command::Daemon(args) => daemon(args).await,
        Command::Submit {
            server,
            language,
            filename,
            file,
        } => submit(server, language, filename, file).await,
    }
}

async fn serve(
    config_path: PathBuf,
    listen: Option<String>,
    database: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut config = ServerConfig::load(&config_path)?;
    if let Some(listen) = listen {
        config.listen = listen;
    }
    if database.is_some() {
        config.database = database;
    }
    config.validate()?;

    info!("printd {} print server starting", env!("CARGO_PKG_VERSION"));

    let db_path = config.database_path();
    let store = SqliteJobStore::open(&db_path).await?;
    info!("Database opened at {}", db_path.display());

    let cancel = shutdown::install_shutdown_handler()?;
    let state = ApiState {
        store: Arc::new(store),
        users: Arc::new(UserDirectory::new(&config.users)),
        size_limit_kb: config.source_size_limit_kb,
        start_time: Instant::now(),
    };

    api::start_api_server(&config.listen, state, cancel).await?;
    Ok(())
}

async fn daemon(args: DaemonArgs) -> anyhow::Result<()> {
    let config = args.into_config()?;

    info!("printd {} print daemon starting", env!("CARGO_PKG_VERSION"));

    let cancel = shutdown::install_shutdown_handler()?;
    let telemetry = Arc::new(TelemetryCollector::new());
    let poller = JobPoller::from_config(&config, telemetry)?;

    poller.run(cancel).await?;
    Ok(())
}

async fn submit(
    server: ServerArgs,
    language: Option<String>,
    filename: Option<String>,
    file: PathBuf,
) -> anyhow::Result<()> {
    let endpoint = server.endpoint()?;
    let client = EndpointClient::new(&endpoint, Duration::from_secs(30))?;

    let filename = match filename {
        Some(name) => name,
        None => file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .context("cannot derive a filename from the path")?,
    };

    let bytes = tokio::fs::read(&file)
        .await
        .with_context(|| format!("File '{}' not found (or not readable).", file.display()))?;

    let response = client
        .submit(&SubmitPrintRequest {
            filename,
            language,
            content: STANDARD.encode(bytes),
        })
        .await?;

    println!("{}", response.message);
    Ok(())
}
