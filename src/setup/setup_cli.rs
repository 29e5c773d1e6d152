use clap::{Parser, Subcommand};
use kb_backend::config::Config;
use kb_backend::models::db_operations::users_db_operations;
use kb_backend::models::Role;
use kb_backend::setup::db_setup;
use rusqlite::Connection;
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "setup_cli", author, version, about = "Schema, reference data and user bootstrap for the knowledge base.", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the .env configuration file.
    #[arg(long, required = true, value_name = "FILE")]
    env_file: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Db {
        #[command(subcommand)]
        action: DbAction,
    },
    User {
        #[command(subcommand)]
        action: UserAction,
    },
}

#[derive(Subcommand, Debug)]
enum DbAction {
    /// Creates every table and index.
    Setup,
    /// Inserts baseline institution types, cities and education forms.
    SeedReference,
}

#[derive(Subcommand, Debug)]
enum UserAction {
    Create {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        /// admin, editor or reader
        #[arg(long, default_value = "editor")]
        role: String,
        #[arg(long)]
        full_name: Option<String>,
    },
    List,
    ChangePassword {
        #[arg(long)]
        email: String,
        #[arg(long)]
        new_password: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let config = Config::from_env(&cli.env_file)
        .expect("FATAL: Failed to load or parse configuration.");

    match &cli.command {
        Commands::Db { action } => match action {
            DbAction::Setup => setup_database(&config),
            DbAction::SeedReference => seed_reference(&config),
        },
        Commands::User { action } => match action {
            UserAction::Create { email, password, role, full_name } => {
                create_user(&config, email, password, role, full_name.as_deref());
            }
            UserAction::List => list_users(&config),
            UserAction::ChangePassword { email, new_password } => change_password(&config, email, new_password),
        },
    }
}

fn open_existing(config: &Config) -> Option<Connection> {
    let db_path = config.kb_db_path();
    if !db_path.exists() {
        eprintln!("❌ Error: Database not found at '{}'. Please run `setup_cli db setup` first.", db_path.display());
        return None;
    }
    match Connection::open(&db_path) {
        Ok(conn) => match conn.execute_batch(db_setup::CONNECTION_PRAGMAS) {
            Ok(_) => Some(conn),
            Err(e) => {
                eprintln!("❌ Error configuring database connection: {}", e);
                None
            }
        },
        Err(e) => {
            eprintln!("❌ Error opening database: {}", e);
            None
        }
    }
}

fn setup_database(config: &Config) {
    let db_path = config.kb_db_path();
    println!("\nSetting up knowledge-base database at '{}'...", db_path.display());

    if let Some(parent_dir) = db_path.parent() {
        fs::create_dir_all(parent_dir).expect("Could not create database directory.");
    }

    let mut conn = Connection::open(&db_path).expect("Could not create database file.");
    match db_setup::setup_kb_db(&mut conn) {
        Ok(_) => println!("✅ Database setup completed successfully."),
        Err(e) => eprintln!("❌ Error setting up database: {}", e),
    }
}

fn seed_reference(config: &Config) {
    let Some(mut conn) = open_existing(config) else { return };
    match db_setup::seed_reference_data(&mut conn) {
        Ok(_) => println!("✅ Reference data seeded."),
        Err(e) => eprintln!("❌ Error seeding reference data: {}", e),
    }
}

fn create_user(config: &Config, email: &str, password: &str, role: &str, full_name: Option<&str>) {
    let role = match role {
        "admin" | "editor" | "reader" => Role::parse(role),
        other => {
            eprintln!("❌ Error: Unknown role '{}'. Use 'admin', 'editor' or 'reader'.", other);
            return;
        }
    };
    let Some(conn) = open_existing(config) else { return };
    match users_db_operations::create_user(&conn, email, password, role, full_name) {
        Ok(id) => println!("✅ User '{}' ({}) created with id {}.", email, role.as_str(), id),
        Err(e) => eprintln!("❌ Error creating user: {}. The email might already be registered.", e),
    }
}

fn list_users(config: &Config) {
    let Some(conn) = open_existing(config) else { return };
    match users_db_operations::read_all_users(&conn) {
        Ok(users) => {
            println!("Listing users:");
            for user in users {
                println!(
                    "- [{}] {} ({}){}",
                    user.id,
                    user.email,
                    user.role.as_str(),
                    user.full_name.map(|n| format!(" {}", n)).unwrap_or_default()
                );
            }
        }
        Err(e) => eprintln!("❌ Error fetching users: {}", e),
    }
}

fn change_password(config: &Config, email: &str, new_password: &str) {
    let Some(conn) = open_existing(config) else { return };
    match users_db_operations::change_password(&conn, email, new_password) {
        Ok(0) => eprintln!("❌ Error: No user with email '{}' found.", email),
        Ok(_) => println!("✅ Password for '{}' changed successfully.", email),
        Err(e) => eprintln!("❌ Error updating password: {}", e),
    }
}
