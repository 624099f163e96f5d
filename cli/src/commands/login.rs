//! `imgrelay login` command - Store registry credentials.

use std::io::BufRead;

use clap::Args;
use imgrelay_runtime::oci::CredentialStore;

#[derive(Args)]
pub struct LoginArgs {
    /// Registry server (default: index.docker.io)
    pub server: Option<String>,

    /// Username
    #[arg(short, long)]
    pub username: Option<String>,

    /// Password
    #[arg(short, long)]
    pub password: Option<String>,

    /// Read password from stdin
    #[arg(long)]
    pub password_stdin: bool,

    /// Remove stored credentials instead
    #[arg(long, conflicts_with_all = ["username", "password", "password_stdin"])]
    pub logout: bool,
}

pub async fn execute(args: LoginArgs) -> Result<(), Box<dyn std::error::Error>> {
    let server = args.server.unwrap_or_else(|| "index.docker.io".to_string());
    let store = CredentialStore::default_path()?;

    if args.logout {
        if store.remove(&server)? {
            println!("Removed credentials for {server}");
        } else {
            println!("Not logged in to {server}");
        }
        return Ok(());
    }

    let username = match args.username {
        Some(u) => u,
        None => prompt("Username: ")?,
    };
    let password = match (args.password, args.password_stdin) {
        (_, true) => read_line()?,
        (Some(p), false) => p,
        (None, false) => prompt("Password: ")?,
    };

    if username.is_empty() || password.is_empty() {
        return Err("Username and password are required".into());
    }

    store.store(&server, &username, &password)?;
    println!("Login Succeeded");
    Ok(())
}

fn prompt(label: &str) -> std::io::Result<String> {
    eprint!("{label}");
    read_line()
}

fn read_line() -> std::io::Result<String> {
    let mut input = String::new();
    std::io::stdin().lock().read_line(&mut input)?;
    Ok(input.trim().to_string())
}
