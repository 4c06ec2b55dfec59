//! Thinkring CLI: account administration against the server's database.
//!
//! Usage: thinkring-cli [--db PATH] user <create|create-test|list>

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use thinkring_lib::auth::{self, AuthError};
use thinkring_lib::config;
use thinkring_lib::db::Database;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const TEST_USERNAME: &str = "testuser";
const TEST_PASSWORD: &str = "testpass123";
const TEST_EMAIL: &str = "test@example.com";

#[derive(Parser)]
#[command(name = "thinkring-cli")]
#[command(version, about = "Thinkring administration CLI", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Database path (default: auto-detect)
    #[arg(long, global = true, env = "THINKRING_DB")]
    db: Option<PathBuf>,

    /// Output as JSON for scripting
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// User accounts
    User {
        #[command(subcommand)]
        cmd: UserCommands,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Create a user
    Create {
        #[arg(long)]
        username: String,
        #[arg(long, default_value = "")]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Create the development account testuser / testpass123
    CreateTest,
    /// List users
    List,
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "thinkring_lib=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), String> {
    let db_path = cli.db.unwrap_or_else(config::find_database);
    config::ensure_database_dir(&db_path).map_err(|e| e.to_string())?;
    let db = Database::new(&db_path).map_err(|e| format!("Failed to open {}: {}", db_path.display(), e))?;

    match cli.command {
        Commands::User { cmd } => run_user(&db, cmd, cli.json),
    }
}

fn run_user(db: &Database, cmd: UserCommands, json: bool) -> Result<(), String> {
    match cmd {
        UserCommands::Create { username, email, password } => {
            let user = db
                .transaction(|repo| auth::register_user(repo, &username, &email, &password))
                .map_err(|e| e.to_string())?;
            if json {
                println!("{}", serde_json::to_string(&user).map_err(|e| e.to_string())?);
            } else {
                println!("Created user {} ({})", user.username, user.id);
            }
        }
        UserCommands::CreateTest => {
            match db.transaction(|repo| auth::register_user(repo, TEST_USERNAME, TEST_EMAIL, TEST_PASSWORD)) {
                Ok(user) => println!("Created test user {} / {} ({})", TEST_USERNAME, TEST_PASSWORD, user.id),
                Err(AuthError::UsernameTaken(_)) => {
                    tracing::warn!(username = TEST_USERNAME, "test user already exists");
                    eprintln!("Test user '{}' already exists", TEST_USERNAME);
                }
                Err(e) => return Err(e.to_string()),
            }
        }
        UserCommands::List => {
            let users = db.transaction(|repo| repo.list_users()).map_err(|e| e.to_string())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&users).map_err(|e| e.to_string())?);
            } else if users.is_empty() {
                println!("No users");
            } else {
                for user in users {
                    println!("{}  {:<20} {}", user.id, user.username, user.email);
                }
            }
        }
    }
    Ok(())
}
