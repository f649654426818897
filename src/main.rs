use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use chatline::server;
use chatline::state::{NamePolicy, ServerState};

/// Line-delimited chat relay server.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on.
    #[clap(short, long, default_value = "0.0.0.0:5000")]
    address: String,

    /// Reject a second connection claiming an already-active display name.
    #[clap(long)]
    unique_names: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let policy = if args.unique_names {
        NamePolicy::Unique
    } else {
        NamePolicy::Permissive
    };

    let listener = TcpListener::bind(&args.address).await?;

    server::run(listener, ServerState::new(policy)).await
}
