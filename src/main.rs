//! etcdv3 command-line client
//!
//! ## Usage
//!
//! ```bash
//! etcdv3 --endpoints=10.0.0.1:2379,10.0.0.2:2379 put key value
//! etcdv3 --resolver=dns+srv --endpoints=_etcd-client._tcp.example.com get key
//! etcdv3 get a --range-end=b
//! etcdv3 resolve
//! etcdv3 serve --listen=127.0.0.1:2379
//! ```
//!
//! ## Environment Variables
//!
//! - `ETCD_ENDPOINTS`: comma-separated endpoints (default: "127.0.0.1:2379")
//! - `ETCD_RESOLVER`: `static`, `dns` or `dns+srv` (default: "static")
//! - `ETCD_USER` / `ETCD_PASSWORD`: credentials for token authentication
//! - `RUST_LOG`: Logging level (default: "etcdv3=info")

use anyhow::Context;
use clap::{Parser, Subcommand};
use etcdv3::{Client, MemoryStore, DEFAULT_RESOLVER};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_ENDPOINTS: &str = "127.0.0.1:2379";

#[derive(Parser, Debug)]
#[command(name = "etcdv3")]
#[command(about = "A command-line client for etcd v3 clusters")]
struct Args {
    /// Comma-separated endpoints [env: ETCD_ENDPOINTS]
    #[arg(long, value_name = "ENDPOINTS")]
    endpoints: Option<String>,

    /// Resolver: static, dns or dns+srv [env: ETCD_RESOLVER]
    #[arg(long, value_name = "RESOLVER")]
    resolver: Option<String>,

    /// User name for authentication [env: ETCD_USER]
    #[arg(long)]
    user: Option<String>,

    /// Password for authentication [env: ETCD_PASSWORD]
    #[arg(long)]
    password: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a value
    Put { key: String, value: String },
    /// Read a key, or a range of keys with --range-end
    Get {
        key: String,
        #[arg(long, value_name = "END")]
        range_end: Option<String>,
    },
    /// Print the addresses the endpoints resolve to
    Resolve,
    /// Run the embedded in-memory server
    Serve {
        #[arg(long, value_name = "ADDR", default_value = "127.0.0.1:2379")]
        listen: SocketAddr,
    },
}

/// Take the command-line value, falling back to the environment.
fn setting(arg: Option<String>, var: &str) -> Option<String> {
    arg.or_else(|| std::env::var(var).ok())
        .filter(|value| !value.trim().is_empty())
}

async fn connect(args: &Args) -> anyhow::Result<Client> {
    let endpoints = setting(args.endpoints.clone(), "ETCD_ENDPOINTS")
        .unwrap_or_else(|| DEFAULT_ENDPOINTS.to_string());
    let resolver = setting(args.resolver.clone(), "ETCD_RESOLVER")
        .unwrap_or_else(|| DEFAULT_RESOLVER.to_string());

    tracing::debug!("Connecting to {} using {} resolver", endpoints, resolver);

    let mut builder = Client::builder().endpoints([endpoints]).resolver(resolver);
    if let Some(user) = setting(args.user.clone(), "ETCD_USER") {
        builder = builder.user(user);
    }
    if let Some(password) = setting(args.password.clone(), "ETCD_PASSWORD") {
        builder = builder.password(password);
    }

    builder.build().await.context("Invalid client configuration")
}

async fn serve(args: &Args, listen: SocketAddr) -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let user = setting(args.user.clone(), "ETCD_USER");
    let password = setting(args.password.clone(), "ETCD_PASSWORD");
    if let (Some(user), Some(password)) = (user, password) {
        tracing::info!("Authentication enabled for {}", user);
        store.add_user(&user, &password);
    }

    let server = etcdv3::serve_embedded(store, listen)
        .await
        .with_context(|| format!("Failed to start server on {}", listen))?;
    tracing::info!("gRPC: {}", server.addr());
    server.wait().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "etcdv3=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let output = match &args.command {
        Command::Serve { listen } => return serve(&args, *listen).await,
        Command::Put { key, value } => {
            let client = connect(&args).await?;
            let response = client.put(key.as_str(), value.as_str()).await?;
            client.shutdown();
            serde_json::to_string_pretty(&response)?
        }
        Command::Get { key, range_end } => {
            let client = connect(&args).await?;
            let response = match range_end {
                Some(end) => client.get_range(key.as_str(), end.as_str()).await?,
                None => client.get(key.as_str()).await?,
            };
            client.shutdown();
            serde_json::to_string_pretty(&response)?
        }
        Command::Resolve => {
            let client = connect(&args).await?;
            let addresses: Vec<String> = client
                .addresses()
                .iter()
                .map(ToString::to_string)
                .collect();
            client.shutdown();
            serde_json::to_string_pretty(&addresses)?
        }
    };

    println!("{}", output);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_put() {
        let args = Args::try_parse_from(["etcdv3", "--endpoints", "a,b", "put", "k", "v"]).unwrap();
        assert_eq!(args.endpoints.as_deref(), Some("a,b"));
        assert!(matches!(args.command, Command::Put { ref key, ref value } if key == "k" && value == "v"));
    }

    #[test]
    fn test_parse_get_with_range_end() {
        let args = Args::try_parse_from(["etcdv3", "get", "a", "--range-end", "b"]).unwrap();
        assert!(matches!(
            args.command,
            Command::Get { ref key, range_end: Some(ref end) } if key == "a" && end == "b"
        ));
    }

    #[test]
    fn test_parse_serve_default_listen() {
        let args = Args::try_parse_from(["etcdv3", "serve"]).unwrap();
        assert!(matches!(args.command, Command::Serve { listen } if listen.port() == 2379));
    }

    #[test]
    fn test_parse_requires_command() {
        assert!(Args::try_parse_from(["etcdv3"]).is_err());
    }

    #[test]
    fn test_setting_prefers_argument() {
        assert_eq!(
            setting(Some("cli".into()), "ETCDV3_TEST_UNSET_VARIABLE").as_deref(),
            Some("cli")
        );
        assert_eq!(setting(None, "ETCDV3_TEST_UNSET_VARIABLE"), None);
        assert_eq!(setting(Some("  ".into()), "ETCDV3_TEST_UNSET_VARIABLE"), None);
    }
}
