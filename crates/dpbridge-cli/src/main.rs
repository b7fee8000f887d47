//! Command-line interface for the dpbridge datapoint translation engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use dpbridge_core::config::env_vars;
use dpbridge_core::{CapabilityValue, EngineConfig, EventBus};
use dpbridge_devices::{
    CapabilityDevice, Catalog, DeviceDescriptor, Engine, EndpointHandle, LoopbackEndpoint,
    NetworkNode, RecordingDevice, ReportFrame, TraitLibrary,
};

/// dpbridge - Translate vendor datapoint reports into device capabilities.
#[derive(Parser, Debug)]
#[command(name = "dpbridge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Engine configuration file (TOML).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Fingerprint catalog, overrides the configuration.
    #[arg(long, global = true)]
    fingerprints: Option<PathBuf>,

    /// Profile catalog, overrides the configuration.
    #[arg(long, global = true)]
    profiles: Option<PathBuf>,

    /// Skip trait validation when building the engine.
    #[arg(long, global = true)]
    lenient: bool,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Check both catalogs against each other and the built-in traits.
    Validate {
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Resolve a manufacturer/model pair to its profile.
    Lookup {
        /// Manufacturer name as announced by the node.
        manufacturer: String,
        /// Model identifier as announced by the node.
        model: String,
    },
    /// Decode a hex-encoded proprietary cluster payload.
    Decode {
        /// Payload bytes, e.g. `000101020004000000d7`.
        payload: String,
    },
    /// Pair a simulated device and feed it report payloads.
    Replay {
        /// Manufacturer name of the simulated node.
        manufacturer: String,
        /// Model identifier of the simulated node.
        model: String,
        /// Extra capabilities the simulated device exposes.
        #[arg(long = "capability")]
        capabilities: Vec<String>,
        /// Hex payloads, one report each.
        #[arg(required = true)]
        frames: Vec<String>,
    },
    /// Match a list of network nodes against the fingerprint catalog.
    Discover {
        /// JSON file with an array of nodes.
        #[arg(required = true)]
        nodes: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = load_config(&args)?;
    match args.command {
        Command::Validate { json } => run_validate(&config, json),
        Command::Lookup {
            manufacturer,
            model,
        } => run_lookup(config, &manufacturer, &model).await,
        Command::Decode { payload } => run_decode(&payload),
        Command::Replay {
            manufacturer,
            model,
            capabilities,
            frames,
        } => run_replay(config, &manufacturer, &model, capabilities, &frames).await,
        Command::Discover { nodes } => run_discover(config, &nodes).await,
    }
}

/// Logs go to stderr so command output on stdout stays machine-readable.
fn init_tracing(verbose: bool) {
    let json_logging = env_vars::flag(env_vars::LOG_JSON).unwrap_or(false);

    let default_level = if verbose { "dpbridge=debug" } else { "dpbridge=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_config(args: &Args) -> Result<EngineConfig> {
    let mut config = EngineConfig::load_or_default(args.config.as_deref())
        .with_context(|| match &args.config {
            Some(p) => format!("Failed to load config {}", p.display()),
            None => "Failed to build default config".to_string(),
        })?;
    if let Some(p) = &args.fingerprints {
        config.fingerprints_path = p.clone();
    }
    if let Some(p) = &args.profiles {
        config.profiles_path = p.clone();
    }
    if args.lenient {
        config.strict_validation = false;
    }
    Ok(config)
}

async fn build_engine(config: EngineConfig) -> Result<Engine> {
    let catalog = Catalog::from_config(&config).context("Failed to load catalog")?;
    let registry = catalog.into_registry().await?;
    let events = EventBus::with_capacity(config.event_capacity);
    let engine = Engine::new(Arc::new(registry), TraitLibrary::with_defaults(), config, events).await?;
    Ok(engine)
}

fn decode_hex(payload: &str) -> Result<Vec<u8>> {
    let cleaned: String = payload
        .trim()
        .trim_start_matches("0x")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    hex::decode(&cleaned).with_context(|| format!("Invalid hex payload '{}'", payload))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ========== validate ==========

#[derive(Serialize)]
struct ValidationSummary {
    fingerprints: usize,
    profiles: usize,
    errors: Vec<String>,
    warnings: Vec<String>,
}

fn run_validate(config: &EngineConfig, json: bool) -> Result<()> {
    let catalog = Catalog::from_config(config).context("Failed to load catalog")?;
    let report = catalog.validate(&TraitLibrary::with_defaults());

    let summary = ValidationSummary {
        fingerprints: catalog.fingerprints.len(),
        profiles: catalog.profiles.len(),
        errors: report.errors.iter().map(ToString::to_string).collect(),
        warnings: report.warnings.iter().map(ToString::to_string).collect(),
    };

    if json {
        print_json(&summary)?;
    } else {
        for e in &summary.errors {
            println!("error: {}", e);
        }
        for w in &summary.warnings {
            println!("warning: {}", w);
        }
        println!(
            "{} fingerprints, {} profiles: {} errors, {} warnings",
            summary.fingerprints,
            summary.profiles,
            summary.errors.len(),
            summary.warnings.len()
        );
    }

    if !summary.errors.is_empty() {
        anyhow::bail!("catalog validation failed with {} error(s)", summary.errors.len());
    }
    Ok(())
}

// ========== lookup ==========

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LookupResult<'a> {
    profile_id: &'a str,
    display_name: String,
    endpoints: &'a [u8],
    profile: &'a dpbridge_devices::Profile,
}

async fn run_lookup(config: EngineConfig, manufacturer: &str, model: &str) -> Result<()> {
    let engine = build_engine(config).await?;
    let descriptor = DeviceDescriptor::new(manufacturer, model);
    let matched = engine
        .registry()
        .lookup(&descriptor)
        .await?
        .with_context(|| format!("No profile registered for {}", descriptor))?;

    print_json(&LookupResult {
        profile_id: &matched.profile.id,
        display_name: matched.fingerprint.label(),
        endpoints: matched.fingerprint.endpoint_ids(),
        profile: &matched.profile,
    })
}

// ========== decode ==========

#[derive(Serialize)]
struct DecodedFrame {
    seq: u16,
    datapoints: Vec<dpbridge_devices::Datapoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn run_decode(payload: &str) -> Result<()> {
    let bytes = decode_hex(payload)?;
    let frame = ReportFrame::parse(&bytes).context("Failed to parse frame")?;
    let (datapoints, error) = frame.collect_lossy();
    print_json(&DecodedFrame {
        seq: frame.seq(),
        datapoints,
        error: error.map(|e| e.to_string()),
    })
}

// ========== replay ==========

#[derive(Serialize)]
struct ReplayStep {
    seq: Option<u16>,
    updates: Vec<CapabilityUpdate>,
    unmapped: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct CapabilityUpdate {
    capability: String,
    value: CapabilityValue,
}

async fn run_replay(
    config: EngineConfig,
    manufacturer: &str,
    model: &str,
    extra_capabilities: Vec<String>,
    frames: &[String],
) -> Result<()> {
    let payloads = frames
        .iter()
        .map(|f| decode_hex(f))
        .collect::<Result<Vec<_>>>()?;

    let engine = build_engine(config).await?;
    let descriptor = DeviceDescriptor::new(manufacturer, model);
    let matched = engine
        .registry()
        .lookup(&descriptor)
        .await?
        .with_context(|| format!("No profile registered for {}", descriptor))?;

    let capabilities = matched
        .profile
        .capabilities
        .iter()
        .cloned()
        .chain(extra_capabilities);
    let recording = Arc::new(RecordingDevice::new(descriptor.to_string(), capabilities));
    let device: Arc<dyn CapabilityDevice> = recording.clone();

    let endpoint_id = matched.fingerprint.endpoint_ids()[0];
    let endpoint: Arc<dyn EndpointHandle> = Arc::new(LoopbackEndpoint::new(endpoint_id));
    let node = NetworkNode::new(manufacturer, model, "0x0000").with_endpoint(endpoint);

    let paired = engine.pair(device, &node).await?;
    for skipped in paired.skipped() {
        eprintln!("skipped {}: {}", skipped.capability, skipped.reason);
    }

    for payload in &payloads {
        let outcome = paired.dispatcher().dispatch_frame(payload).await;
        let updates = recording
            .take_history()
            .into_iter()
            .map(|(capability, value)| CapabilityUpdate { capability, value })
            .collect();
        let step = ReplayStep {
            seq: outcome.seq,
            updates,
            unmapped: outcome.unmapped,
            error: outcome.error,
        };
        println!("{}", serde_json::to_string(&step)?);
    }

    paired.teardown();
    Ok(())
}

// ========== discover ==========

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeSpec {
    manufacturer_name: String,
    model_id: String,
    network_address: String,
    #[serde(default = "default_endpoints")]
    endpoints: Vec<u8>,
}

fn default_endpoints() -> Vec<u8> {
    vec![1]
}

impl NodeSpec {
    fn into_node(self) -> NetworkNode {
        self.endpoints.iter().fold(
            NetworkNode::new(self.manufacturer_name, self.model_id, self.network_address),
            |node, id| {
                let endpoint: Arc<dyn EndpointHandle> = Arc::new(LoopbackEndpoint::new(*id));
                node.with_endpoint(endpoint)
            },
        )
    }
}

async fn run_discover(config: EngineConfig, nodes_path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(nodes_path)
        .with_context(|| format!("Failed to read {}", nodes_path.display()))?;
    let specs: Vec<NodeSpec> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", nodes_path.display()))?;
    let nodes: Vec<NetworkNode> = specs.into_iter().map(NodeSpec::into_node).collect();

    let engine = build_engine(config).await?;
    let candidates = engine.discover(&nodes).await;
    tracing::info!(nodes = nodes.len(), matched = candidates.len(), "Discovery finished");
    print_json(&candidates)
}
