use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use finpal::error::{ApiError, ErrorCode};
use finpal::services::csv_import::{self, ColumnMapping, CsvFile, ImportConfig};
use finpal::services::transactions::TransactionFilters;
use finpal::services::{accounts, analytics, auth, budgets, categories, investments, transactions};
use finpal::state::Feature;
use finpal::storage::{FileStore, StoreError};
use finpal::{ClientConfig, FinPal};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("local storage: {0}")]
    Store(#[from] StoreError),
    #[error("read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

impl CliError {
    fn code(&self) -> &'static str {
        match self {
            Self::Api(error) => error.error_code(),
            Self::Store(_) => "E_STORAGE",
            Self::ReadFile { .. } => "E_READ_FILE",
            Self::InvalidJson(_) => "E_JSON",
        }
    }

    fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Api(error) if error.requires_setup() => Some("configure a backend with `finpal-cli backend set <url>`"),
            Self::Api(error) if error.requires_login() => Some("sign in again with `finpal-cli login`"),
            Self::Api(ApiError::AuthenticationFailed) => Some("check your credentials or sign in again"),
            _ => None,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "finpal-cli", about = "FinPal personal finance API client")]
struct Cli {
    /// Directory holding the persisted session, backend, and preferences.
    #[arg(long, env = "FINPAL_DATA_DIR", default_value = ".finpal")]
    data_dir: PathBuf,

    /// Log pipeline activity to stderr.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Backend(BackendCommand),
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "FINPAL_PASSWORD")]
        password: String,
    },
    Register {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long, env = "FINPAL_PASSWORD")]
        password: String,
    },
    Logout,
    Whoami,
    Accounts(AccountsCommand),
    Budgets {
        #[command(subcommand)]
        command: ListOnly,
    },
    Transactions {
        #[command(subcommand)]
        command: TransactionsSubcommand,
    },
    Categories {
        #[command(subcommand)]
        command: ListOnly,
    },
    Portfolios {
        #[command(subcommand)]
        command: ListOnly,
    },
    Quote {
        symbol: String,
        #[arg(long)]
        exchange: Option<String>,
    },
    Dashboard,
    Import(ImportCommand),
    Features(FeaturesCommand),
    DarkMode {
        #[arg(value_enum)]
        state: Option<DarkModeArg>,
    },
}

#[derive(Args, Debug)]
struct BackendCommand {
    #[command(subcommand)]
    command: BackendSubcommand,
}

#[derive(Subcommand, Debug)]
enum BackendSubcommand {
    Show,
    Set { url: String },
    Default,
    Clear,
}

#[derive(Args, Debug)]
struct AccountsCommand {
    #[command(subcommand)]
    command: AccountsSubcommand,
}

#[derive(Subcommand, Debug)]
enum AccountsSubcommand {
    List,
    Get { id: i64 },
    Balance { id: i64 },
}

#[derive(Subcommand, Debug)]
enum ListOnly {
    List,
}

#[derive(Subcommand, Debug)]
enum TransactionsSubcommand {
    List {
        #[arg(long)]
        page: Option<u32>,
        #[arg(long)]
        per_page: Option<u32>,
        #[arg(long)]
        search: Option<String>,
    },
}

#[derive(Args, Debug)]
struct ImportCommand {
    #[command(subcommand)]
    command: ImportSubcommand,
}

#[derive(Subcommand, Debug)]
enum ImportSubcommand {
    Preview {
        file: PathBuf,
    },
    Run {
        file: PathBuf,
        #[arg(long)]
        account: i64,
        #[arg(long, default_value = csv_import::DEFAULT_DATE_FORMAT)]
        date_format: String,
    },
}

#[derive(Args, Debug)]
struct FeaturesCommand {
    #[command(subcommand)]
    command: FeaturesSubcommand,
}

#[derive(Subcommand, Debug)]
enum FeaturesSubcommand {
    List,
    Enable { feature: Feature },
    Disable { feature: Feature },
    Reset,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum DarkModeArg {
    On,
    Off,
    Toggle,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::WARN };
    tracing_subscriber::fmt().with_writer(std::io::stderr).with_max_level(level).init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error [{}]: {error}", error.code());
            if let Some(hint) = error.hint() {
                eprintln!("hint: {hint}");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let storage = Arc::new(FileStore::open(cli.data_dir.clone())?);
    let app = FinPal::open(storage, ClientConfig::from_env())?;

    match cli.command {
        Command::Backend(backend) => run_backend(&app, backend.command),
        Command::Login { email, password } => {
            let response = auth::login(app.api(), &auth::LoginCredentials { email, password }).await?;
            print_json(&response.user)
        }
        Command::Register { username, email, password } => {
            let response = auth::register(app.api(), &auth::RegisterData { username, email, password }).await?;
            print_json(&response.user)
        }
        Command::Logout => {
            auth::logout(app.api()).await;
            println!("signed out");
            Ok(())
        }
        Command::Whoami => print_json(&auth::me(app.api()).await?),
        Command::Accounts(accounts) => run_accounts(&app, accounts.command).await,
        Command::Budgets { command: ListOnly::List } => print_json(&budgets::list(app.api()).await?),
        Command::Transactions { command: TransactionsSubcommand::List { page, per_page, search } } => {
            let filters = TransactionFilters { page, per_page, search, ..TransactionFilters::default() };
            print_json(&transactions::list(app.api(), &filters).await?)
        }
        Command::Categories { command: ListOnly::List } => print_json(&categories::list(app.api()).await?),
        Command::Portfolios { command: ListOnly::List } => {
            print_json(&investments::portfolios::list(app.api()).await?)
        }
        Command::Quote { symbol, exchange } => {
            print_json(&investments::quote(app.api(), &symbol, exchange.as_deref()).await?)
        }
        Command::Dashboard => print_json(&analytics::dashboard(app.api()).await?),
        Command::Import(import) => run_import(&app, import.command).await,
        Command::Features(features) => run_features(&app, features.command),
        Command::DarkMode { state } => {
            let prefs = app.preferences();
            let enabled = match state {
                None => prefs.dark_mode(),
                Some(DarkModeArg::On) => {
                    prefs.set_dark_mode(true);
                    true
                }
                Some(DarkModeArg::Off) => {
                    prefs.set_dark_mode(false);
                    false
                }
                Some(DarkModeArg::Toggle) => prefs.toggle_dark_mode(),
            };
            println!("dark mode: {}", if enabled { "on" } else { "off" });
            Ok(())
        }
    }
}

fn run_backend(app: &FinPal, command: BackendSubcommand) -> Result<(), CliError> {
    match command {
        BackendSubcommand::Show => {}
        BackendSubcommand::Set { url } => {
            if app.change_backend(&url)? {
                eprintln!("backend changed; signed out");
            }
        }
        BackendSubcommand::Default => {
            app.backend().use_default();
            app.session().logout();
        }
        BackendSubcommand::Clear => app.reset_backend(),
    }
    let location = app.backend().snapshot();
    print_json(&serde_json::json!({
        "backend_url": app.backend().api_base_url(),
        "is_configured": location.is_configured,
    }))
}

async fn run_accounts(app: &FinPal, command: AccountsSubcommand) -> Result<(), CliError> {
    match command {
        AccountsSubcommand::List => print_json(&accounts::list(app.api()).await?),
        AccountsSubcommand::Get { id } => print_json(&accounts::get(app.api(), id).await?),
        AccountsSubcommand::Balance { id } => print_json(&accounts::balance(app.api(), id).await?),
    }
}

async fn run_import(app: &FinPal, command: ImportSubcommand) -> Result<(), CliError> {
    match command {
        ImportSubcommand::Preview { file } => {
            let csv = read_csv(&file)?;
            let preview = csv_import::preview(app.api(), &csv).await?;
            let mapping = ColumnMapping::auto_detect(&preview.columns);
            print_json(&serde_json::json!({ "preview": preview, "suggested_mapping": mapping }))
        }
        ImportSubcommand::Run { file, account, date_format } => {
            let csv = read_csv(&file)?;
            let preview = csv_import::preview(app.api(), &csv).await?;
            let mapping = ColumnMapping::auto_detect(&preview.columns);
            let config = ImportConfig { date_format, ..ImportConfig::for_account(account) };
            print_json(&csv_import::import(app.api(), &csv, &mapping, &config).await?)
        }
    }
}

fn run_features(app: &FinPal, command: FeaturesSubcommand) -> Result<(), CliError> {
    let features = app.features();
    match command {
        FeaturesSubcommand::List => {}
        FeaturesSubcommand::Enable { feature } => features.enable(feature),
        FeaturesSubcommand::Disable { feature } => features.disable(feature),
        FeaturesSubcommand::Reset => features.reset(),
    }
    for feature in Feature::ALL {
        let state = if features.is_enabled(feature) { "on" } else { "off" };
        println!("{:<12} {state}", feature.as_str());
    }
    Ok(())
}

fn read_csv(path: &Path) -> Result<CsvFile, CliError> {
    let bytes = std::fs::read(path).map_err(|source| CliError::ReadFile { path: path.to_path_buf(), source })?;
    let file_name = path.file_name().map_or_else(|| "import.csv".to_string(), |n| n.to_string_lossy().into_owned());
    Ok(CsvFile { file_name, bytes })
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
