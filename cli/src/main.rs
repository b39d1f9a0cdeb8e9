use clap::{Parser, Subcommand};
use std::{path::PathBuf, process, sync::Arc};
use stevedore::{
    snapshot, Manifest, RegistryClient, RegistryName, SnapshotFormat, SyncContext, SyncOptions,
    DEFAULT_THREADS,
};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "stevedore", version, about = "Promotes container images between registries")]
struct Cli {
    /// Log level filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile destination registries with promotion manifests
    Promote {
        /// Promotion manifest files
        #[arg(required = true)]
        manifests: Vec<PathBuf>,

        /// Worker-pool size for reads and edge execution
        #[arg(long, default_value_t = DEFAULT_THREADS)]
        threads: usize,

        /// Apply the plan; without this flag operations are only previewed
        #[arg(long)]
        confirm: bool,

        /// Allow edges that reassign an existing tag to another digest
        #[arg(long)]
        permit_moves: bool,

        /// Delete destination digests that no manifest references
        #[arg(long)]
        thin: bool,

        /// Authenticate writes with each destination's declared service
        /// account
        #[arg(long)]
        use_service_account: bool,
    },

    /// Print the observed inventory of one registry
    Snapshot {
        /// Registry root to read, like gcr.io/prod-artifacts
        registry: RegistryName,

        /// Output format, yaml or csv
        #[arg(long, default_value = "yaml")]
        format: SnapshotFormat,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(cli.log_level.as_str()),
    )
    .init();

    let code = match cli.command {
        Command::Promote {
            manifests,
            threads,
            confirm,
            permit_moves,
            thin,
            use_service_account,
        } => {
            promote(
                manifests,
                SyncOptions {
                    threads,
                    dry_run: !confirm,
                    use_service_account,
                    permit_moves,
                    thin,
                },
            )
            .await
        }
        Command::Snapshot { registry, format } => snapshot_registry(registry, format).await,
    };
    process::exit(code);
}

async fn promote(paths: Vec<PathBuf>, options: SyncOptions) -> i32 {
    let mut manifests = Vec::new();
    for path in &paths {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) => {
                eprintln!("cannot read {}: {}", path.display(), err);
                return 1;
            }
        };
        match Manifest::parse_yaml(&text) {
            Ok(manifest) => manifests.push(manifest),
            Err(err) => {
                eprintln!("bad manifest {}: {}", path.display(), err);
                return 1;
            }
        }
    }

    let mut ctx = match SyncContext::new(manifests, options) {
        Ok(ctx) => ctx,
        Err(err) => {
            eprintln!("{}", err);
            return 1;
        }
    };

    let client = match RegistryClient::builder()
        .registry_contexts(ctx.registries())
        .use_service_account(options.use_service_account)
        .build()
    {
        Ok(client) => client,
        Err(err) => {
            eprintln!("{}", err);
            return 1;
        }
    };

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupted, finishing in-flight edges");
            signal_cancel.cancel();
        }
    });

    let executor = Arc::new(client.clone());
    let results = match ctx.promote(&client, executor, &cancel).await {
        Ok(results) => results,
        Err(err) => {
            eprintln!("{}", err);
            return 1;
        }
    };

    println!(
        "{} succeeded, {} failed, {} cancelled",
        results.succeeded.len(),
        results.failed.len(),
        results.cancelled.len()
    );
    let errors = ctx.take_errors();
    for error in &errors {
        eprintln!("{}", error);
    }
    if errors.is_empty() && results.ok() {
        0
    } else {
        1
    }
}

async fn snapshot_registry(registry: RegistryName, format: SnapshotFormat) -> i32 {
    let client = match RegistryClient::new() {
        Ok(client) => client,
        Err(err) => {
            eprintln!("{}", err);
            return 1;
        }
    };
    use stevedore::InventorySource;
    let inventory = match client.read_registry(&registry).await {
        Ok(inventory) => inventory,
        Err(err) => {
            eprintln!("cannot read {}: {}", registry, err);
            return 1;
        }
    };
    match snapshot::render(&inventory, format) {
        Ok(text) => {
            print!("{}", text);
            0
        }
        Err(err) => {
            eprintln!("{}", err);
            return 1;
        }
    }
}
