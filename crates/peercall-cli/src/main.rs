//! Peercall CLI: accounts, peer announce/lookup and the terminal call flow.

#![forbid(unsafe_code)]

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use peercall_cli::{client::DEFAULT_SERVER, place_call, GatewayClient};
use peercall_common::{generate_peer_id, CallStatus};

#[derive(Parser, Debug)]
#[command(name = "peercall")]
#[command(about = "Peercall CLI tools")]
struct Args {
    /// Gateway base URL
    #[arg(long, env = "PEERCALL_SERVER", default_value = DEFAULT_SERVER)]
    server: String,

    /// Session token from `peercall login`
    #[arg(long, env = "PEERCALL_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an account
    Signup {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },

    /// Log in and print a session token
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },

    /// Show the account behind the current token
    Whoami,

    /// Revoke the current token
    Logout,

    /// Announce a peer id for a username
    Announce {
        username: String,
        /// Peer id to publish; a fresh one is minted when omitted
        #[arg(long)]
        peer_id: Option<String>,
    },

    /// Resolve a username to its peer id
    Lookup { username: String },

    /// Place a call to another user
    Call {
        /// Username to call
        target: String,
        /// Log in with these credentials instead of using --token
        #[arg(long, requires = "password")]
        email: Option<String>,
        #[arg(long, requires = "email")]
        password: Option<String>,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    peercall_common::init_tracing_with_default(&args.log_level);

    let mut client = GatewayClient::new(args.server.clone()).with_token(args.token.clone());

    match args.command {
        Command::Signup {
            name,
            email,
            password,
        } => {
            let user = client.signup(&name, &email, &password).await?;
            println!("Created user {} ({}) with id {}", user.name, user.email, user.id);
        }
        Command::Login { email, password } => {
            let login = client.login(&email, &password).await?;
            println!("Logged in as {}", login.user.name);
            println!("Session expires {}", login.expires_at);
            println!("export PEERCALL_TOKEN={}", login.token);
        }
        Command::Whoami => {
            let session = client.session().await?;
            println!(
                "{} <{}> (id {})",
                session.user.name, session.user.email, session.user.id
            );
        }
        Command::Logout => {
            if client.logout().await? {
                println!("Session revoked");
            } else {
                println!("Session was already gone");
            }
        }
        Command::Announce { username, peer_id } => {
            let peer_id = peer_id.unwrap_or_else(|| generate_peer_id(&username));
            client.announce(&username, &peer_id).await?;
            println!("{} -> {}", username, peer_id);
        }
        Command::Lookup { username } => match client.lookup(&username).await? {
            Some(peer_id) => println!("{}", peer_id),
            None => bail!("User {} is not online or not found", username),
        },
        Command::Call {
            target,
            email,
            password,
        } => {
            if let (Some(email), Some(password)) = (email, password) {
                client.login(&email, &password).await?;
            }
            let caller = client.session().await?.user.name;

            let session = place_call(&client, &caller, &target, |call| {
                println!("[{}] {}", call.target(), call.status());
            })
            .await?;

            match session.status() {
                CallStatus::Calling => println!(
                    "Calling {} at {}; media setup continues in the peer connection",
                    session.target(),
                    session.remote_peer_id().unwrap_or_default()
                ),
                _ => bail!(
                    "{}",
                    session.last_error().unwrap_or("call could not be placed")
                ),
            }
        }
        Command::Version => {
            println!("peercall {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
