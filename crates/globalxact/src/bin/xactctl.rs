//! Admin client for on-disk transaction set state.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use globalxact::record::Record;
use globalxact::{admin, recover_file, LogStore, PgConnector};

#[derive(Parser)]
#[command(name = "xactctl")]
#[command(about = "Admin client for global transaction sets", long_about = None)]
struct Args {
    /// Database data root holding the `extglobalxact` directory.
    #[arg(long)]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List unresolved transaction sets.
    List,
    /// Print the recorded state of one transaction set.
    Show { name: String },
    /// Drive an unresolved transaction set to resolution and remove its file.
    Cleanup { name: String },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let store = LogStore::open(&args.data_dir)?;

    match args.command {
        Command::List => {
            for name in admin::list_sets(&store)? {
                println!("{name}");
            }
        }
        Command::Show { name } => {
            for record in admin::read_set(&store, &name)? {
                match record {
                    Record::Phase(phase) => println!("phase {phase}"),
                    Record::Action(action) => println!(
                        "{} {} {} {}",
                        action.phase, action.url, action.txn_name, action.status
                    ),
                }
            }
        }
        Command::Cleanup { name } => {
            let phase = recover_file(&store.path_for(&name), &PgConnector)?;
            println!("{name}: {phase}");
        }
    }
    Ok(())
}
