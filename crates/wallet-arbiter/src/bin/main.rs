//! Extension wallet arbiter CLI
//!
//! `serve` runs the background arbiter: dApp requests arrive as
//! newline-delimited JSON on stdin and responses leave on stdout, while the
//! wallet UI approves or denies them over the loopback approval surface.
//! Logs always go to stderr so stdout stays protocol-clean.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use zeroize::Zeroizing;

use wallet_arbiter::{AccessPolicy, ArbiterServer, StdioTransport};
use wallet_core::storage::default_data_dir;
use wallet_core::{Address, SecretKey, Wallet, WalletState};

/// Extension wallet - credential vault and dApp request arbiter
#[derive(Parser, Debug)]
#[command(name = "wallet-arbiter")]
#[command(author = "Symbia Labs")]
#[command(version = "0.1.0")]
#[command(about = "Extension wallet - credential vault and dApp request arbiter")]
struct Args {
    /// Data directory (defaults to the platform data directory)
    #[arg(long, env = "EXTENSION_WALLET_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Wallet password (prompted for when absent)
    #[arg(long, env = "EXTENSION_WALLET_PASSWORD", hide_env_values = true, global = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve dApp requests on stdio
    Serve {
        /// Port for the loopback approval surface
        #[arg(long, env = "EXTENSION_WALLET_APPROVAL_PORT", default_value = "7345")]
        approval_port: u16,

        /// Bearer token for the approval surface (generated and written to
        /// `approval.token` in the data directory when absent)
        #[arg(long, env = "EXTENSION_WALLET_APPROVAL_TOKEN", hide_env_values = true)]
        approval_token: Option<String>,

        /// Origin of the wallet UI allowed to call the approval surface
        #[arg(long = "ui-origin", env = "EXTENSION_WALLET_UI_ORIGIN", value_delimiter = ',')]
        ui_origins: Vec<String>,

        /// Do not start the approval surface
        #[arg(long)]
        no_approval: bool,

        /// Refresh account balances in the background
        #[arg(long)]
        refresh: bool,
    },
    /// Create the vault for this installation
    Init,
    /// Generate a new account
    NewAccount {
        #[arg(long)]
        name: Option<String>,
    },
    /// Import an account from a hex private key (prompted)
    ImportAccount {
        #[arg(long)]
        name: Option<String>,
    },
    /// List accounts
    Accounts,
    /// Remove an address from every dApp session
    Revoke { address: String },
    /// Re-encrypt every private key under a new password
    ChangePassword,
}

fn password(args: &Args, prompt: &str) -> std::io::Result<String> {
    match &args.password {
        Some(password) => Ok(password.clone()),
        None => rpassword::prompt_password(prompt),
    }
}

/// Write the approval token where only this user can read it
async fn write_token(data_dir: &Path, token: &str) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(data_dir).await?;
    let path = data_dir.join("approval.token");
    let temp_path = path.with_extension("tmp");

    tokio::fs::write(&temp_path, token).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    tokio::fs::rename(&temp_path, &path).await?;
    Ok(path)
}

fn new_password() -> Result<String, Box<dyn std::error::Error>> {
    let password = rpassword::prompt_password("New password: ")?;
    let confirm = rpassword::prompt_password("Confirm password: ")?;
    if password != confirm {
        return Err("Passwords do not match".into());
    }
    Ok(password)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let wallet = match &args.data_dir {
        Some(dir) => Wallet::open(dir.clone()).await,
        None => Wallet::open_default().await,
    }
    .map_err(|e| format!("Failed to open wallet: {}", e))?;

    if !matches!(args.command, Command::Init)
        && wallet.state().await? == WalletState::NotInitialized
    {
        return Err("Wallet not initialized. Run `wallet-arbiter init` first.".into());
    }

    match &args.command {
        Command::Serve {
            approval_port,
            approval_token,
            ui_origins,
            no_approval,
            refresh,
        } => {
            let wallet = Arc::new(wallet);
            let refresher = if *refresh {
                Some(wallet.start_refresher().await?)
            } else {
                None
            };

            let mut server =
                ArbiterServer::new(wallet, Arc::new(StdioTransport::stdio())).await;
            if !no_approval {
                let mut policy = match approval_token {
                    Some(token) => AccessPolicy::new(*approval_port, token.clone()),
                    None => {
                        let policy = AccessPolicy::generate(*approval_port);
                        let data_dir = match &args.data_dir {
                            Some(dir) => dir.clone(),
                            None => default_data_dir()?,
                        };
                        let path = write_token(&data_dir, policy.token()).await?;
                        info!("Approval token written to {:?}", path);
                        policy
                    }
                };
                for origin in ui_origins {
                    policy = policy.allow_origin(origin.clone());
                }
                server = server.with_approval(policy);
            }

            info!("Serving dApp requests on stdio");
            let result = server.run().await;

            if let Some(refresher) = refresher {
                refresher.stop();
            }
            result.map_err(|e| e.to_string())?;
        }
        Command::Init => {
            let password = match &args.password {
                Some(password) => password.clone(),
                None => new_password()?,
            };
            let handle = wallet.initialize(&password).await?;
            println!("Vault created ({})", handle.password_tag);
        }
        Command::NewAccount { name } => {
            let password = password(&args, "Wallet password: ")?;
            let account = wallet.generate_account(name.clone(), &password).await?;
            println!("{}", account.address()?);
        }
        Command::ImportAccount { name } => {
            let encoded = Zeroizing::new(rpassword::prompt_password("Private key (hex): ")?);
            let private_key = SecretKey::new(
                hex::decode(encoded.trim()).map_err(|_| "Private key must be hex encoded")?,
            );
            let password = password(&args, "Wallet password: ")?;
            let account = wallet
                .import_account(private_key, name.clone(), &password)
                .await?;
            println!("{}", account.address()?);
        }
        Command::Accounts => {
            for account in wallet.accounts.list().await? {
                println!(
                    "{}  {}",
                    account.address()?,
                    account.name.as_deref().unwrap_or("-")
                );
            }
        }
        Command::Revoke { address } => {
            let address = Address::parse(address)?;
            let outcome = wallet.sessions.revoke_address(&address).await?;
            println!(
                "{} sessions updated, {} removed",
                outcome.updated.len(),
                outcome.removed.len()
            );
        }
        Command::ChangePassword => {
            let old = password(&args, "Current password: ")?;
            let new = new_password()?;
            wallet.change_password(&old, &new).await?;
            println!("Password changed");
        }
    }

    Ok(())
}
