use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use shardkv_core::{
    HttpReplicationSource, KvStore, MigrateOperation, ReplicationWorker, ScaleDirection,
    ShardTable, build_peer_client,
};
use shardkv_server::{Config, Forwarder, ServerState, serve};
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "shardkv")]
#[command(about = "Statically sharded key-value store with read-only replicas")]
struct Cli {
    /// Path to the database file
    #[arg(long, default_value = "")]
    db_location: String,

    /// HTTP host and port to listen on
    #[arg(long, default_value = "127.0.0.1:8080")]
    http_addr: String,

    /// Static sharding configuration file
    #[arg(long, default_value = "sharding.toml")]
    config_file: String,

    /// Name of the shard this node serves
    #[arg(long, default_value = "")]
    shard: String,

    /// Run as the read-only replica of the shard
    #[arg(long)]
    replica: bool,

    /// Run the data migration instead of the server
    #[arg(long)]
    migrate: bool,

    /// Direction of the migration
    #[arg(long, value_enum, default_value_t = Scale::Up)]
    scale: Scale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Scale {
    Up,
    Down,
}

impl From<Scale> for ScaleDirection {
    fn from(scale: Scale) -> Self {
        match scale {
            Scale::Up => ScaleDirection::Up,
            Scale::Down => ScaleDirection::Down,
        }
    }
}

impl Cli {
    fn validate(&self) -> anyhow::Result<()> {
        if self.migrate && self.replica {
            bail!("cannot migrate a read-replica");
        }
        if self.db_location.trim().is_empty() {
            bail!("must provide --db-location");
        }
        if self.shard.trim().is_empty() {
            bail!("must provide --shard");
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shardkv=info,shardkv_core=info,shardkv_server=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    if let Err(error) = run(cli).await {
        tracing::error!("{:#}", error);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    cli.validate()?;

    let cfg = Config::from_file(&cli.config_file)
        .with_context(|| format!("parsing config {:?}", cli.config_file))?;

    let table = Arc::new(
        ShardTable::build(&cfg.shard_entries(), &cli.shard).context("parsing shards config")?,
    );

    let store = Arc::new(
        KvStore::open(&cli.db_location, cli.replica)
            .with_context(|| format!("opening database {:?}", cli.db_location))?,
    );

    tracing::info!(
        "Started DB server shard-id={} addr=http://{} replica={}",
        table.current_index(),
        cli.http_addr,
        cli.replica
    );

    let client = build_peer_client(cfg.network.request_timeout())?;

    if cli.replica {
        let primary_addr = table
            .current_address()
            .context("primary address not found for replica shard")?;
        tracing::info!("Replicating from primary {}", primary_addr);

        let source = HttpReplicationSource::new(client.clone(), primary_addr);
        let worker = ReplicationWorker::new(store.clone(), source, cfg.replication.settings());
        tokio::spawn(worker.run());
    }

    if cli.migrate {
        MigrateOperation::new().run(cli.scale.into())?;
        return Ok(());
    }

    let state = Arc::new(ServerState::new(store, table, Forwarder::new(client)));
    let listener = tokio::net::TcpListener::bind(&cli.http_addr)
        .await
        .with_context(|| format!("binding {}", cli.http_addr))?;

    serve(listener, state).await?;
    Ok(())
}
