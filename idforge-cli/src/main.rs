//! idforge CLI
//!
//! Command-line client for an identity-management environment.
//!
//! # Usage
//!
//! ```bash
//! # Store client credentials and verify them
//! idforge auth login --client-id ... --client-secret ... --environment-id ...
//!
//! # List users as JSON
//! idforge --format json users list
//!
//! # Remove stored credentials
//! idforge auth logout
//! ```

use anyhow::{Context as _, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use idforge_core::{NewUser, Region, ResourceRef, Secret, StoredCredentials};
use serde::Serialize;
use tracing_subscriber::{EnvFilter, fmt};

mod client;

use client::{Context, explain_auth_error, explain_request_error};

#[derive(Parser)]
#[command(name = "idforge")]
#[command(about = "Manage users, groups and applications of an identity environment")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = Format::Text)]
    format: Format,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage stored credentials and tokens
    Auth {
        #[command(subcommand)]
        command: AuthCommand,
    },

    /// Manage users
    Users {
        #[command(subcommand)]
        command: UserCommand,
    },

    /// Manage groups
    Groups {
        #[command(subcommand)]
        command: GroupCommand,
    },

    /// Inspect populations
    Populations {
        #[command(subcommand)]
        command: LookupCommand,
    },

    /// Inspect applications
    Applications {
        #[command(subcommand)]
        command: LookupCommand,
    },
}

#[derive(Subcommand)]
enum AuthCommand {
    /// Verify and store client credentials
    Login {
        #[arg(long, env = "IDFORGE_CLIENT_ID")]
        client_id: String,

        #[arg(long, env = "IDFORGE_CLIENT_SECRET", hide_env_values = true)]
        client_secret: String,

        #[arg(long, env = "IDFORGE_ENVIRONMENT_ID")]
        environment_id: String,

        /// Region code (na, eu, ca, ap, au); defaults to the configured region
        #[arg(long)]
        region: Option<Region>,
    },

    /// Delete stored credentials and forget the cached token
    Logout,

    /// Show whether credentials and a valid token are available
    Status,

    /// Print a bearer token for the stored credentials
    Token,
}

#[derive(Subcommand)]
enum UserCommand {
    /// List users
    List {
        /// Filter expression, e.g. `email eq "ada@example.com"`
        #[arg(long)]
        filter: Option<String>,
    },

    /// Show one user
    Get { user_id: String },

    /// Create a user
    Create {
        #[arg(long)]
        username: String,

        #[arg(long)]
        email: String,

        /// Population to place the user in
        #[arg(long)]
        population: Option<String>,
    },

    /// Delete a user
    Delete { user_id: String },
}

#[derive(Subcommand)]
enum GroupCommand {
    /// List groups
    List,

    /// Show one group
    Get { group_id: String },

    /// Delete a group
    Delete { group_id: String },
}

#[derive(Subcommand)]
enum LookupCommand {
    /// List all
    List,

    /// Show one by id
    Get { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let context = Context::load()?;
    let format = cli.format;

    match cli.command {
        Commands::Auth { command } => run_auth(&context, command, format).await,
        Commands::Users { command } => run_users(&context, command, format).await,
        Commands::Groups { command } => run_groups(&context, command, format).await,
        Commands::Populations { command } => run_populations(&context, command, format).await,
        Commands::Applications { command } => run_applications(&context, command, format).await,
    }
}

fn init_logging(verbose: bool) {
    fmt()
        .with_env_filter(log_filter(verbose, std::env::var("RUST_LOG").ok().as_deref()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// `--verbose` wins over `RUST_LOG`.
fn log_filter(verbose: bool, rust_log: Option<&str>) -> EnvFilter {
    const VERBOSE: &str = "idforge=debug,idforge_core=debug";

    if verbose {
        return EnvFilter::new(VERBOSE);
    }
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new("warn"))
}

/// Print `value` as pretty JSON or through `text`.
fn emit<T: Serialize>(format: Format, value: &T, text: impl FnOnce(&T)) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(value)?),
        Format::Text => text(value),
    }
    Ok(())
}

fn or_dash(value: Option<&str>) -> &str {
    value.unwrap_or("-")
}

async fn run_auth(context: &Context, command: AuthCommand, format: Format) -> Result<()> {
    let manager = &context.manager;

    match command {
        AuthCommand::Login {
            client_id,
            client_secret,
            environment_id,
            region,
        } => {
            let region = region.unwrap_or(context.config.region);
            let credentials = StoredCredentials::for_region(
                client_id,
                Secret::new(client_secret),
                environment_id,
                region,
            );

            let token = manager
                .exchange_credentials_for_token(&credentials)
                .await
                .context("credentials were not accepted")?;
            manager
                .store_credentials(&credentials)
                .await
                .context("failed to store credentials")?;
            manager.token_cell().set(token.clone());

            emit(
                format,
                &serde_json::json!({
                    "environmentId": credentials.environment_id,
                    "region": region.code(),
                    "tokenExpiresAt": token.expires_at,
                }),
                |_| {
                    println!(
                        "Logged in to environment {} ({})",
                        credentials.environment_id, region
                    );
                },
            )
        }

        AuthCommand::Logout => {
            manager.clear_auth().await?;
            emit(format, &serde_json::json!({"loggedOut": true}), |_| {
                println!("Stored credentials removed");
            })
        }

        AuthCommand::Status => {
            let status = manager.get_auth_status().await;
            emit(format, &status, |status| {
                println!("Credentials:  {}", if status.has_credentials { "stored" } else { "none" });
                println!("Client ID:    {}", or_dash(status.client_id.as_deref()));
                println!("Environment:  {}", or_dash(status.environment_id.as_deref()));
                match status.token_expires_at {
                    Some(at) if status.has_valid_token => println!(
                        "Token:        valid until {} ({} min left)",
                        at,
                        (at - Utc::now()).num_minutes()
                    ),
                    Some(at) => println!("Token:        expiring at {}", at),
                    None => println!("Token:        none cached"),
                }
            })
        }

        AuthCommand::Token => {
            let token = manager.get_access_token().await.map_err(explain_auth_error)?;
            let expires_at = manager.token_cell().get().map(|t| t.expires_at);
            emit(
                format,
                &serde_json::json!({
                    "accessToken": token.expose(),
                    "expiresAt": expires_at,
                }),
                |_| println!("{}", token.expose()),
            )
        }
    }
}

async fn run_users(context: &Context, command: UserCommand, format: Format) -> Result<()> {
    let client = context.identity_client().await?;

    match command {
        UserCommand::List { filter } => {
            let users = client
                .list_users(filter.as_deref())
                .await
                .map_err(explain_request_error)?;
            emit(format, &users, |users| {
                for user in users {
                    println!(
                        "{}\t{}\t{}",
                        user.id,
                        user.username,
                        or_dash(user.email.as_deref())
                    );
                }
            })
        }

        UserCommand::Get { user_id } => {
            let user = client.get_user(&user_id).await.map_err(explain_request_error)?;
            emit(format, &user, |user| {
                println!("ID:          {}", user.id);
                println!("Username:    {}", user.username);
                println!("Email:       {}", or_dash(user.email.as_deref()));
                println!(
                    "Population:  {}",
                    or_dash(user.population.as_ref().map(|p| p.id.as_str()))
                );
                if let Some(enabled) = user.enabled {
                    println!("Enabled:     {}", enabled);
                }
            })
        }

        UserCommand::Create {
            username,
            email,
            population,
        } => {
            let new_user = NewUser {
                username,
                email,
                name: None,
                population: population.map(|id| ResourceRef { id }),
            };
            let user = client
                .create_user(&new_user)
                .await
                .map_err(explain_request_error)?;
            emit(format, &user, |user| {
                println!("Created user {} ({})", user.username, user.id);
            })
        }

        UserCommand::Delete { user_id } => {
            client
                .delete_user(&user_id)
                .await
                .map_err(explain_request_error)?;
            emit(format, &serde_json::json!({"deleted": user_id}), |_| {
                println!("Deleted user {}", user_id);
            })
        }
    }
}

async fn run_groups(context: &Context, command: GroupCommand, format: Format) -> Result<()> {
    let client = context.identity_client().await?;

    match command {
        GroupCommand::List => {
            let groups = client.list_groups().await.map_err(explain_request_error)?;
            emit(format, &groups, |groups| {
                for group in groups {
                    println!("{}\t{}", group.id, group.name);
                }
            })
        }

        GroupCommand::Get { group_id } => {
            let group = client.get_group(&group_id).await.map_err(explain_request_error)?;
            emit(format, &group, |group| {
                println!("ID:           {}", group.id);
                println!("Name:         {}", group.name);
                println!("Description:  {}", or_dash(group.description.as_deref()));
            })
        }

        GroupCommand::Delete { group_id } => {
            client
                .delete_group(&group_id)
                .await
                .map_err(explain_request_error)?;
            emit(format, &serde_json::json!({"deleted": group_id}), |_| {
                println!("Deleted group {}", group_id);
            })
        }
    }
}

async fn run_populations(context: &Context, command: LookupCommand, format: Format) -> Result<()> {
    let client = context.identity_client().await?;

    match command {
        LookupCommand::List => {
            let populations = client
                .list_populations()
                .await
                .map_err(explain_request_error)?;
            emit(format, &populations, |populations| {
                for population in populations {
                    let users = population
                        .user_count
                        .map(|n| n.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!("{}\t{}\t{}", population.id, population.name, users);
                }
            })
        }

        LookupCommand::Get { id } => {
            let population = client
                .get_population(&id)
                .await
                .map_err(explain_request_error)?;
            emit(format, &population, |population| {
                println!("ID:           {}", population.id);
                println!("Name:         {}", population.name);
                println!("Description:  {}", or_dash(population.description.as_deref()));
            })
        }
    }
}

async fn run_applications(context: &Context, command: LookupCommand, format: Format) -> Result<()> {
    let client = context.identity_client().await?;

    match command {
        LookupCommand::List => {
            let applications = client
                .list_applications()
                .await
                .map_err(explain_request_error)?;
            emit(format, &applications, |applications| {
                for app in applications {
                    println!(
                        "{}\t{}\t{}",
                        app.id,
                        app.name,
                        or_dash(app.protocol.as_deref())
                    );
                }
            })
        }

        LookupCommand::Get { id } => {
            let app = client
                .get_application(&id)
                .await
                .map_err(explain_request_error)?;
            emit(format, &app, |app| {
                println!("ID:        {}", app.id);
                println!("Name:      {}", app.name);
                println!("Protocol:  {}", or_dash(app.protocol.as_deref()));
                if let Some(enabled) = app.enabled {
                    println!("Enabled:   {}", enabled);
                }
            })
        }
    }
}
