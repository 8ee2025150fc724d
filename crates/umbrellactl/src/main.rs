// # umbrellactl - Umbrella reconciliation operator tool
//
// A thin shell over umbrella-core. It never talks to the remote API: it
// inspects the reconciliation records, prints resource descriptors and checks
// desired configuration files before they are handed to the host.
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### State Store
// - `UMBRELLA_STATE_STORE_TYPE`: Type of state store (file, memory)
// - `UMBRELLA_STATE_STORE_PATH`: Path to state file (for file store)
// - `UMBRELLA_STALE_AFTER_SECS`: Age after which a record is reported stale
//
// ### Remote API
// - `UMBRELLA_HOST`, `UMBRELLA_APIKEY`, `UMBRELLA_APISECRET`: checked by
//   `umbrellactl config` the same way the provider resolves them
//
// ### Logging
// - `UMBRELLA_LOG_LEVEL`: trace, debug, info, warn, error
//
// ## Usage
//
// ```bash
// export UMBRELLA_STATE_STORE_TYPE=file
// export UMBRELLA_STATE_STORE_PATH=/var/lib/umbrella/state.json
//
// umbrellactl config
// umbrellactl schema tunnel
// umbrellactl validate site desired.json
// umbrellactl state list
// umbrellactl state show tunnel 42
// ```

use anyhow::{Context, Result, bail};
use std::env;
use std::process::ExitCode;
use tracing::{Level, debug, error};
use tracing_subscriber::FmtSubscriber;

use umbrella_core::mapper;
use umbrella_core::schema::{Field, ObjectSchema};
use umbrella_core::{
    ApiSettings, Object, ProviderConfig, RecordKey, ReconcilerConfig, ResourceKind, StateStore,
    StateStoreConfig,
};

/// Exit codes for different termination scenarios
#[derive(Debug, Clone, Copy)]
enum CtlExitCode {
    Success = 0,
    /// Configuration or usage error
    ConfigError = 1,
    /// Runtime error (state store, invalid document)
    RuntimeError = 2,
}

impl From<CtlExitCode> for ExitCode {
    fn from(code: CtlExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

const USAGE: &str = "usage:
  umbrellactl config
  umbrellactl schema <kind>
  umbrellactl validate <kind> <file.json>
  umbrellactl state list
  umbrellactl state show <kind> <id>

kinds: site, va, tunnel, dclist";

/// Parsed command line
#[derive(Debug)]
enum Command {
    Config,
    Schema(ResourceKind),
    Validate(ResourceKind, String),
    StateList,
    StateShow(RecordKey),
}

impl Command {
    fn parse(args: &[String]) -> Result<Self> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let command = match args.as_slice() {
            ["config"] => Command::Config,
            ["schema", kind] => Command::Schema(kind.parse()?),
            ["validate", kind, file] => Command::Validate(kind.parse()?, file.to_string()),
            ["state", "list"] => Command::StateList,
            ["state", "show", kind, id] => {
                let id = id
                    .parse()
                    .with_context(|| format!("'{}' is not a numeric identifier", id))?;
                Command::StateShow(RecordKey::new(kind.parse()?, id))
            }
            _ => bail!("{}", USAGE),
        };
        Ok(command)
    }

    fn needs_state(&self) -> bool {
        matches!(self, Command::StateList | Command::StateShow(_))
    }
}

/// Application configuration
struct Config {
    state_store_type: String,
    state_store_path: Option<String>,
    stale_after_secs: Option<u64>,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        let stale_after_secs = match env::var("UMBRELLA_STALE_AFTER_SECS") {
            Ok(raw) => Some(
                raw.parse()
                    .with_context(|| format!("UMBRELLA_STALE_AFTER_SECS '{}' is not a number", raw))?,
            ),
            Err(_) => None,
        };

        Ok(Self {
            state_store_type: env::var("UMBRELLA_STATE_STORE_TYPE")
                .unwrap_or_else(|_| "file".to_string()),
            state_store_path: env::var("UMBRELLA_STATE_STORE_PATH").ok(),
            stale_after_secs,
            log_level: env::var("UMBRELLA_LOG_LEVEL").unwrap_or_else(|_| "warn".to_string()),
        })
    }

    fn log_level(&self) -> Result<Level> {
        let level = match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => bail!(
                "UMBRELLA_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        };
        Ok(level)
    }

    fn state_store(&self) -> Result<StateStoreConfig> {
        let config = match self.state_store_type.as_str() {
            "memory" => StateStoreConfig::Memory,
            "file" => match &self.state_store_path {
                Some(path) => StateStoreConfig::File { path: path.clone() },
                None => bail!(
                    "UMBRELLA_STATE_STORE_PATH is required when UMBRELLA_STATE_STORE_TYPE=file. \
                    Set it via: export UMBRELLA_STATE_STORE_PATH=/var/lib/umbrella/state.json"
                ),
            },
            other => bail!(
                "UMBRELLA_STATE_STORE_TYPE '{}' is not supported. \
                Supported types: file, memory",
                other
            ),
        };
        config.validate()?;
        Ok(config)
    }

    fn reconciler(&self) -> Result<ReconcilerConfig> {
        let mut config = ReconcilerConfig::default();
        if let Some(secs) = self.stale_after_secs {
            config.stale_after_secs = secs;
        }
        config.validate()?;
        Ok(config)
    }

    /// Full provider configuration, with API credentials taken from `env`
    ///
    /// No provider attributes are set, so every credential comes from its
    /// environment variable.
    fn provider_with<F>(&self, env: F) -> Result<ProviderConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = ProviderConfig {
            api: ApiSettings::from_attributes_with(&Object::new(), env)?,
            state_store: self.state_store()?,
            reconciler: self.reconciler()?,
        };
        config.validate()?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();

    let command = match Command::parse(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{}", e);
            return CtlExitCode::ConfigError.into();
        }
    };

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return CtlExitCode::ConfigError.into();
        }
    };

    let log_level = match config.log_level() {
        Ok(level) => level,
        Err(e) => {
            eprintln!("Configuration validation error: {}", e);
            return CtlExitCode::ConfigError.into();
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return CtlExitCode::ConfigError.into();
    }

    // Store settings only matter to the state subcommands
    let settings = if command.needs_state() {
        match config.state_store().and_then(|s| Ok((s, config.reconciler()?))) {
            Ok(settings) => Some(settings),
            Err(e) => {
                eprintln!("Configuration validation error: {}", e);
                return CtlExitCode::ConfigError.into();
            }
        }
    } else {
        None
    };

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return CtlExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        match (command, settings) {
            (Command::Config, _) => show_config(&config),
            (Command::Schema(kind), _) => print_schema(kind),
            (Command::Validate(kind, file), _) => validate_file(kind, &file).await,
            (Command::StateList, Some((store, reconciler))) => {
                list_state(&store, &reconciler).await
            }
            (Command::StateShow(key), Some((store, _))) => show_state(&store, key).await,
            (command, None) => bail!("no state store configured for {:?}", command),
        }
    });

    match result {
        Ok(()) => CtlExitCode::Success.into(),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("error: {:#}", e);
            CtlExitCode::RuntimeError.into()
        }
    }
}

/// Resolve and print the provider configuration; the API secret stays redacted
fn show_config(config: &Config) -> Result<()> {
    let provider = config.provider_with(|name| env::var(name).ok())?;
    debug!("Resolved provider configuration {:?}", provider);

    println!("api: {:?}", provider.api);
    match &provider.state_store {
        StateStoreConfig::File { path } => println!("state store: file {}", path),
        StateStoreConfig::Memory => println!("state store: memory"),
    }
    println!(
        "reconciler: event channel {}, stale after {}s",
        provider.reconciler.event_channel_capacity, provider.reconciler.stale_after_secs
    );
    Ok(())
}

/// Print the attribute descriptor of a kind
fn print_schema(kind: ResourceKind) -> Result<()> {
    let schema = kind.schema();
    println!("{} ({})", kind.type_name(), schema.description);
    if !schema.addressable {
        println!("  data source only: {}", schema.unsupported_hint);
    } else if !schema.supports_create {
        println!("  create not supported: {}", schema.unsupported_hint);
    }
    print_fields(&schema.root, 1);
    Ok(())
}

fn print_fields(schema: &ObjectSchema, depth: usize) {
    let indent = "  ".repeat(depth);
    for field in &schema.fields {
        println!("{}{}", indent, describe_field(field));
        if let Some(nested) = field.nested().or_else(|| field.element_schema()) {
            print_fields(nested, depth + 1);
        }
    }
}

fn describe_field(field: &Field) -> String {
    let mut line = format!(
        "{}: {} [{:?}, {:?}]",
        field.name,
        field.ty.name(),
        field.presence,
        field.access
    );
    if field.wire != field.name {
        line.push_str(&format!(" wire={}", field.wire));
    }
    if field.sensitive {
        line.push_str(" sensitive");
    }
    if !field.description.is_empty() {
        line.push_str(&format!(" - {}", field.description));
    }
    line
}

/// Check a desired-configuration document against the descriptor
async fn validate_file(kind: ResourceKind, file: &str) -> Result<()> {
    let schema = kind.schema();
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read {}", file))?;
    let document: serde_json::Value =
        serde_json::from_str(&content).with_context(|| format!("{} is not valid JSON", file))?;

    if let Some(map) = document.as_object() {
        let undeclared: Vec<&str> = map
            .keys()
            .map(String::as_str)
            .filter(|key| schema.root.field(key).is_none())
            .collect();
        if !undeclared.is_empty() {
            bail!("{} declares no attribute(s) {:?}", kind.type_name(), undeclared);
        }
    }

    let desired = mapper::decode_state(&document, &schema.root)?;
    debug!("Decoded {} desired tree with {} attributes", kind, desired.len());

    schema.validate_desired(
        umbrella_core::ResourceRef::new_instance(kind),
        &desired,
        false,
    )?;

    println!("{}: valid {}", file, kind.type_name());
    Ok(())
}

/// List every reconciliation record
async fn list_state(store: &StateStoreConfig, reconciler: &ReconcilerConfig) -> Result<()> {
    let store = umbrella_core::state::open(store).await?;
    let keys = store.list_records().await?;
    let max_age = reconciler.stale_after();

    if keys.is_empty() {
        println!("no records");
        return Ok(());
    }

    for key in keys {
        let Some(record) = store.get_record(&key).await? else {
            continue;
        };
        let marker = if record.is_stale(max_age) { " (stale)" } else { "" };
        println!(
            "{}\t{}{}",
            key,
            record.last_reconciled.to_rfc3339(),
            marker
        );
    }
    Ok(())
}

/// Print one record with sensitive values masked
async fn show_state(store: &StateStoreConfig, key: RecordKey) -> Result<()> {
    let store = umbrella_core::state::open(store).await?;
    let Some(record) = store.get_record(&key).await? else {
        bail!("no record for {}", key);
    };

    let schema = key.kind.schema();
    let tree = mapper::decode_state(&record.attributes, &schema.root)?;
    let shown = mapper::redact(&tree, &schema.root).to_json()?;

    println!("# {} reconciled {}", key, record.last_reconciled.to_rfc3339());
    println!("{}", serde_json::to_string_pretty(&shown)?);
    Ok(())
}
