//! Operator tool for managing users and API keys.
//!
//! Works directly on the user database; run it on the host next to the
//! server. The raw key is printed exactly once at creation and cannot be
//! recovered afterwards.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use mixflow_server::rate_limit::Plan;
use mixflow_server::user::{generate_raw_key, hash_key, SqliteUserStore, UserStore};

#[derive(Parser, Debug)]
#[clap(name = "cli-keys", about = "Manage mixflow users and API keys")]
struct CliArgs {
    /// Path to the user database.
    #[clap(long)]
    pub db_path: PathBuf,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a user on the given plan.
    CreateUser {
        name: String,
        #[clap(long, default_value = "free")]
        plan: String,
    },
    /// Generate and register a new API key for a user.
    CreateKey { user_id: String },
    /// List all users.
    ListUsers,
    /// List a user's API keys.
    ListKeys { user_id: String },
    /// Enable or disable a user.
    SetUserActive {
        user_id: String,
        #[clap(long)]
        active: bool,
    },
    /// Enable or disable a single API key.
    SetKeyActive {
        key_id: String,
        #[clap(long)]
        active: bool,
    },
}

fn main() -> Result<()> {
    let args = CliArgs::parse();
    let store = SqliteUserStore::new(&args.db_path)?;

    match args.command {
        Command::CreateUser { name, plan } => {
            let Some(plan) = Plan::parse(&plan) else {
                bail!("Unknown plan '{}'; expected free, starter, pro, scale or enterprise", plan);
            };
            let user = store.create_user(&name, plan)?;
            println!("Created user {} ({}) on plan {}", user.id, user.name, user.plan.as_str());
        }
        Command::CreateKey { user_id } => {
            let Some(user) = store.get_user(&user_id)? else {
                bail!("No user with id {}", user_id);
            };
            let raw_key = generate_raw_key();
            let record = store.insert_api_key(&user.id, &hash_key(&raw_key))?;
            println!("Created key {} for user {}", record.id, user.name);
            println!();
            println!("  {}", raw_key);
            println!();
            println!("Store it now; it will not be shown again.");
        }
        Command::ListUsers => {
            for user in store.list_users()? {
                println!(
                    "{}  {}  plan={}  active={}",
                    user.id,
                    user.name,
                    user.plan.as_str(),
                    user.is_active
                );
            }
        }
        Command::ListKeys { user_id } => {
            for key in store.list_api_keys(&user_id)? {
                println!(
                    "{}  active={}  created_at={}  last_used_at={}",
                    key.id,
                    key.is_active,
                    key.created_at,
                    key.last_used_at
                        .map(|t| t.to_string())
                        .unwrap_or_else(|| "never".to_string())
                );
            }
        }
        Command::SetUserActive { user_id, active } => {
            store.set_user_active(&user_id, active)?;
            println!("User {} active={}", user_id, active);
        }
        Command::SetKeyActive { key_id, active } => {
            store.set_api_key_active(&key_id, active)?;
            println!("Key {} active={}", key_id, active);
        }
    }

    Ok(())
}
