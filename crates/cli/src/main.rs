use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use kube::CustomResourceExt;
use serde::Serialize;
use stratum_controller::{ControllerConfig, Reconciler};
use stratum_core::{ClusterKey, LedgerCluster, LedgerClusterSpec, ResourceStore};
use stratum_kubehub::{ControllerOptions, KubeStore};
use stratum_store::MemStore;
use stratum_wallet::{Generator, GENESIS_BALANCE};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "stratumctl", version, about = "Ledger cluster operator")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Kubernetes namespace (default: all for `run`, "default" otherwise)
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controller against the current kube context
    Run {
        /// Node and benchmark image
        #[arg(long, env = "STRATUM_IMAGE")]
        image: Option<String>,
        /// Directory holding persisted wallets
        #[arg(long = "wallet-dir", env = "STRATUM_WALLET_DIR")]
        wallet_dir: Option<PathBuf>,
        /// Seconds between periodic re-checks of a settled cluster
        #[arg(long = "resync-secs", env = "STRATUM_RESYNC_SECS", default_value_t = 300)]
        resync_secs: u64,
        /// Seconds to back off after a failed pass
        #[arg(long = "retry-secs", env = "STRATUM_RETRY_SECS", default_value_t = 5)]
        retry_secs: u64,
    },
    /// Print the LedgerCluster CRD as YAML
    Crd,
    /// Generate (or reuse) wallets and print the genesis ledger
    Genesis {
        #[arg(long = "rich-wallets")]
        rich_wallets: u32,
        #[arg(long = "wallet-dir", env = "STRATUM_WALLET_DIR", default_value = "config")]
        wallet_dir: PathBuf,
    },
    /// Show stage and nodes of a cluster
    Status {
        name: String,
    },
    /// Drive the reconciler against an in-memory platform
    Simulate {
        #[arg(long)]
        size: i32,
        #[arg(long = "rich-wallets", default_value_t = 0)]
        rich_wallets: u32,
        #[arg(long = "benchmarks", default_value_t = 0)]
        benchmarks: u32,
        #[arg(long = "passes", default_value_t = 12)]
        passes: u32,
    },
}

fn init_tracing() {
    let env = std::env::var("STRATUM_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("STRATUM_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid STRATUM_METRICS_ADDR; expected host:port");
        }
    }
}

#[derive(Serialize)]
struct SimRow {
    pass: u32,
    stage: String,
    nodes: usize,
    benchmarks: usize,
    requeue_ms: Option<u128>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { image, wallet_dir, resync_secs, retry_secs } => {
            let mut cfg = ControllerConfig::from_env();
            if let Some(image) = image {
                cfg.image = image;
            }
            if let Some(dir) = wallet_dir {
                cfg.wallet_dir = dir;
            }
            info!(image = %cfg.image, wallet_dir = %cfg.wallet_dir.display(), ns = ?cli.namespace, "run invoked");

            let client = stratum_kubehub::get_kube_client().await?;
            let store = Arc::new(KubeStore::new(client.clone()));
            let generator = Generator::new(cfg.wallet_dir.clone());
            let reconciler = Arc::new(Reconciler::new(store, generator, cfg));
            let opts = ControllerOptions {
                namespace: cli.namespace.clone(),
                resync: Duration::from_secs(resync_secs),
                retry: Duration::from_secs(retry_secs),
            };
            stratum_kubehub::run_controller(client, opts, move |key: ClusterKey| {
                let reconciler = reconciler.clone();
                async move { reconciler.reconcile(&key).await.map(|o| o.requeue_after) }
            })
            .await?;
        }
        Commands::Crd => {
            let crd = LedgerCluster::crd();
            match cli.output {
                Output::Human => print!("{}", serde_yaml::to_string(&crd)?),
                Output::Json => println!("{}", serde_json::to_string_pretty(&crd)?),
            }
        }
        Commands::Genesis { rich_wallets, wallet_dir } => {
            let generator = Generator::new(wallet_dir);
            let ledger = generator
                .build_ledger(rich_wallets)
                .with_context(|| format!("generating wallets under {}", generator.dir().display()))?;
            match cli.output {
                Output::Human => {
                    println!("{} funded wallet(s) under {}", ledger.len(), generator.dir().display());
                    for key in ledger.0.keys() {
                        println!("{}  {}", key, GENESIS_BALANCE);
                    }
                }
                Output::Json => println!("{}", ledger.to_document()?),
            }
        }
        Commands::Status { name } => {
            let ns = cli.namespace.as_deref().unwrap_or("default");
            let client = stratum_kubehub::get_kube_client().await?;
            let store = KubeStore::new(client);
            let cluster = store
                .get_cluster(ns, &name)
                .await?
                .with_context(|| format!("LedgerCluster {}/{} not found", ns, name))?;
            match cli.output {
                Output::Human => {
                    println!("{}/{}  size={}  stage={}", ns, name, cluster.spec.size, cluster.stage());
                    for node in cluster.node_names() {
                        println!("  {}", node);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&cluster.status)?),
            }
        }
        Commands::Simulate { size, rich_wallets, benchmarks, passes } => {
            let dir = tempfile::tempdir().context("creating scratch wallet directory")?;
            let store = Arc::new(MemStore::new());
            let mut cluster = LedgerCluster::new("sim", LedgerClusterSpec { size, rich_wallets, benchmark_pods: benchmarks });
            cluster.metadata.namespace = Some("default".into());
            store.sim_apply_cluster(cluster);
            let cfg = ControllerConfig { wait_delay: Duration::from_millis(1), ..ControllerConfig::default() };
            let reconciler = Reconciler::new(store.clone(), Generator::new(dir.path()), cfg);
            let key = ClusterKey::new("default", "sim");

            let mut rows = Vec::new();
            for pass in 1..=passes {
                let outcome = reconciler.reconcile(&key).await?;
                store.sim_sync_deployments();
                store.sim_assign_addresses();
                let Some(current) = store.cluster("default", "sim") else { break };
                let row = SimRow {
                    pass,
                    stage: current.stage().to_string(),
                    nodes: current.node_names().len(),
                    benchmarks: store.pod_names("default").iter().filter(|n| n.starts_with("sim-benchmark-")).count(),
                    requeue_ms: outcome.requeue_after.map(|d| d.as_millis()),
                };
                if cli.output == Output::Human {
                    let actions: Vec<String> =
                        store.take_journal().into_iter().map(|a| format!("{:?} {}/{}", a.verb, a.kind, a.name)).collect();
                    println!(
                        "pass {:>3}  {:<10} nodes={:<3} benchmarks={:<3} {}",
                        row.pass,
                        row.stage,
                        row.nodes,
                        row.benchmarks,
                        actions.join(", ")
                    );
                }
                rows.push(row);
            }
            if cli.output == Output::Json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            }
        }
    }

    Ok(())
}
