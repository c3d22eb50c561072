use anyhow::Result;
use clap::{Parser, Subcommand};
use contract_catalog::config::Config;
use contract_catalog::query::commands::{cmd_purge, cmd_show, cmd_stats};
use contract_catalog::repository::{AddressRepository, Database, SourceRepository};

#[derive(Parser)]
#[command(name = "catalog")]
#[command(about = "Inspect and prune the contract catalog", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record counts per network
    Stats {
        #[arg(long)]
        network: Option<String>,
    },
    /// Everything stored for one address
    Show {
        address: String,
        #[arg(long, default_value = "ethereum")]
        network: String,
    },
    /// Delete EOAs, unverified contracts and contracts without source
    Purge {
        #[arg(long)]
        network: Option<String>,

        /// Actually delete; without it only the count is reported
        #[arg(long, default_value = "false")]
        execute: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    let cli = Cli::parse();

    let database_url = Config::database_url();
    let db = Database::new(&database_url)?;
    let address_repo = AddressRepository::new(&db.conn);
    let source_repo = SourceRepository::new(&db.conn);

    match cli.command {
        Commands::Stats { network } => {
            cmd_stats(&address_repo, network.as_deref())?;
        }
        Commands::Show { address, network } => {
            cmd_show(&address_repo, &source_repo, &network, &address)?;
        }
        Commands::Purge { network, execute } => {
            cmd_purge(&address_repo, network.as_deref(), execute)?;
        }
    }

    Ok(())
}
