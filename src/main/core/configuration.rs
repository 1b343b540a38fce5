//! vnet's configuration and cli parsing code using [serde] and [clap].
//!
//! Scenario files are YAML. Options that can also be given on the command line are `Option`
//! types that derive [`Merge`], so that a command-line value overrides the scenario file, which
//! in turn overrides the built-in default. vnet uses [schemars] to get each option's description
//! (its doc comment) and default value so that it can be shown in the CLI help text.
//!
//! This code only checks that the format of the file is correct. Whether the values make sense
//! together (for example that every script step names a declared socket) is checked when the
//! scenario is built.

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;
use std::str::FromStr;

use clap::{Args, Parser, Subcommand};
use merge::Merge;
use once_cell::sync::Lazy;
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};

use crate::core::engine::EngineConfig;

const START_HELP_TEXT: &str = "\
    Run guest programs over a deterministic virtual UDP network.";

#[derive(Debug, Clone, Parser)]
#[clap(name = "vnet", about = START_HELP_TEXT, version)]
#[clap(next_display_order = None)]
pub struct CliOptions {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run a scenario file
    Run(RunOptions),
    /// Decode hex-encoded frames and print their headers
    Decode(DecodeOptions),
    /// Print the JSON schema of scenario files
    Schema,
}

#[derive(Debug, Clone, Args)]
#[clap(next_display_order = None)]
pub struct RunOptions {
    /// Path to the scenario file. Use '-' to read from stdin
    pub scenario: String,

    /// Write every transmitted frame to a pcap file
    #[clap(long, value_name = "path")]
    pub pcap: Option<PathBuf>,

    /// Exit after printing the final configuration
    #[clap(long)]
    pub show_config: bool,

    /// Print the network statistics as JSON when the run ends
    #[clap(long)]
    pub stats: bool,

    #[clap(flatten)]
    pub general: GeneralOptions,

    #[clap(flatten)]
    pub engine: EngineOptions,
}

#[derive(Debug, Clone, Args)]
pub struct DecodeOptions {
    /// Frames start with a 14-byte Ethernet header
    #[clap(long)]
    pub ethernet: bool,

    /// Hex-encoded frames. Whitespace and ':' separators are ignored
    #[clap(required = true, value_name = "hex")]
    pub frames: Vec<String>,
}

/// Options contained in a scenario file.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ScenarioFile {
    #[serde(default)]
    pub general: GeneralOptions,

    #[serde(default)]
    pub engine: EngineOptions,

    #[serde(default)]
    pub network: NetworkOptions,

    #[serde(default)]
    pub name_servers: Vec<NameServerOptions>,

    /// Rules are tried in order; the first one that applies to a frame decides its fate
    #[serde(default)]
    pub rules: Vec<RuleOptions>,

    // a BTreeMap so that sockets are bound in a deterministic order
    /// Sockets to bind before the script runs, by name
    #[serde(default)]
    pub sockets: BTreeMap<String, SocketAddrV4>,

    #[serde(default)]
    pub script: Vec<Step>,
}

impl FromStr for ScenarioFile {
    type Err = serde_yaml::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_yaml::from_str(s)
    }
}

/// vnet configuration options after processing command-line and scenario file options.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigOptions {
    pub general: GeneralOptions,
    pub engine: EngineOptions,
    pub network: NetworkOptions,
    pub name_servers: Vec<NameServerOptions>,
    pub rules: Vec<RuleOptions>,
    pub sockets: BTreeMap<String, SocketAddrV4>,
    pub script: Vec<Step>,
}

impl ConfigOptions {
    pub fn new(mut file: ScenarioFile, options: &RunOptions) -> Self {
        // sections missing from the file contain only `None` values, so merge them with the real
        // defaults first
        file.general = file
            .general
            .with_defaults(GeneralOptions::new_with_defaults());
        file.engine = file.engine.with_defaults(EngineOptions::new_with_defaults());

        // override scenario options with command line options
        let general = options.general.clone().with_defaults(file.general);
        let engine = options.engine.clone().with_defaults(file.engine);

        Self {
            general,
            engine,
            network: file.network,
            name_servers: file.name_servers,
            rules: file.rules,
            sockets: file.sockets,
            script: file.script,
        }
    }

    pub fn log_level(&self) -> log::Level {
        self.general.log_level.unwrap().into()
    }

    pub fn seed(&self) -> u64 {
        self.general.seed.unwrap()
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            ttl: self.engine.ttl.unwrap(),
            max_defer_attempts: self.engine.max_defer_attempts.unwrap(),
            max_synthetic_hops: self.engine.max_synthetic_hops.unwrap(),
            ephemeral_port_start: self.engine.ephemeral_port_start.unwrap(),
        }
    }
}

/// Help messages used by Clap for command line arguments, combining the doc string with
/// the Serde default.
static GENERAL_HELP: Lazy<std::collections::HashMap<String, String>> =
    Lazy::new(|| generate_help_strs(schema_for!(GeneralOptions)));

// these must all be Option types since they aren't required by the CLI, even if they have a
// default in the scenario file
#[derive(Debug, Clone, Default, Parser, Serialize, Deserialize, Merge, JsonSchema)]
#[clap(next_help_heading = "General (Override scenario file options)")]
#[clap(next_display_order = None)]
#[serde(deny_unknown_fields)]
pub struct GeneralOptions {
    /// Log level of output written on stderr. If vnet was built in release mode, then log
    /// messages at level 'trace' will always be dropped
    #[clap(long, short = 'l', value_name = "level")]
    #[clap(help = GENERAL_HELP.get("log_level").unwrap().as_str())]
    #[serde(default = "default_some_info")]
    pub log_level: Option<LogLevel>,

    /// Seed for rules that make random choices and don't set their own seed
    #[clap(long, value_name = "N")]
    #[clap(help = GENERAL_HELP.get("seed").unwrap().as_str())]
    #[serde(default = "default_some_1")]
    pub seed: Option<u64>,
}

impl GeneralOptions {
    pub fn new_with_defaults() -> Self {
        Self {
            log_level: default_some_info(),
            seed: default_some_1(),
        }
    }

    /// Replace unset (`None`) values of `base` with values from `default`.
    pub fn with_defaults(mut self, default: Self) -> Self {
        self.merge(default);
        self
    }
}

/// Help messages used by Clap for command line arguments, combining the doc string with
/// the Serde default.
static ENGINE_HELP: Lazy<std::collections::HashMap<String, String>> =
    Lazy::new(|| generate_help_strs(schema_for!(EngineOptions)));

#[derive(Debug, Clone, Default, Parser, Serialize, Deserialize, Merge, JsonSchema)]
#[clap(next_help_heading = "Engine (Override scenario file options)")]
#[clap(next_display_order = None)]
#[serde(deny_unknown_fields)]
pub struct EngineOptions {
    /// Time-to-live of every transmitted frame
    #[clap(long, value_name = "hops")]
    #[clap(help = ENGINE_HELP.get("ttl").unwrap().as_str())]
    #[serde(default = "default_some_ttl")]
    pub ttl: Option<u8>,

    /// Number of times a frame can be deferred before it is dropped
    #[clap(long, value_name = "N")]
    #[clap(help = ENGINE_HELP.get("max_defer_attempts").unwrap().as_str())]
    #[serde(default = "default_some_defer_attempts")]
    pub max_defer_attempts: Option<u32>,

    /// Replies to synthesized replies are suppressed past this depth
    #[clap(long, value_name = "N")]
    #[clap(help = ENGINE_HELP.get("max_synthetic_hops").unwrap().as_str())]
    #[serde(default = "default_some_synthetic_hops")]
    pub max_synthetic_hops: Option<u8>,

    /// First port tried when a socket is bound to port 0
    #[clap(long, value_name = "port")]
    #[clap(help = ENGINE_HELP.get("ephemeral_port_start").unwrap().as_str())]
    #[serde(default = "default_some_ephemeral_port")]
    pub ephemeral_port_start: Option<u16>,
}

impl EngineOptions {
    pub fn new_with_defaults() -> Self {
        Self {
            ttl: default_some_ttl(),
            max_defer_attempts: default_some_defer_attempts(),
            max_synthetic_hops: default_some_synthetic_hops(),
            ephemeral_port_start: default_some_ephemeral_port(),
        }
    }

    /// Replace unset (`None`) values of `base` with values from `default`.
    pub fn with_defaults(mut self, default: Self) -> Self {
        self.merge(default);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct NetworkOptions {
    /// Link every pair of nodes. When false, only the listed links exist
    #[serde(default = "default_true")]
    pub fully_connected: bool,

    /// Nodes with no links, which can only reach themselves
    #[serde(default)]
    pub nodes: Vec<Ipv4Addr>,

    /// Undirected links between pairs of nodes
    #[serde(default)]
    pub links: Vec<(Ipv4Addr, Ipv4Addr)>,
}

impl Default for NetworkOptions {
    fn default() -> Self {
        Self {
            fully_connected: true,
            nodes: Vec::new(),
            links: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct NameServerOptions {
    /// The endpoint that queries are sent to
    pub endpoint: SocketAddrV4,

    /// Addresses to answer with, by name
    #[serde(default)]
    pub records: BTreeMap<String, Ipv4Addr>,

    /// Answer every query with this address
    #[serde(default)]
    pub fixed_answer: Option<Ipv4Addr>,
}

/// A rule, which applies to the frames of a flow. A flow with no `from` or `to` matches any
/// sender or destination.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "kebab-case", deny_unknown_fields)]
pub enum RuleOptions {
    /// Drop the first `count` frames of the flow
    DropFirst {
        #[serde(default)]
        from: Option<SocketAddrV4>,
        #[serde(default)]
        to: Option<SocketAddrV4>,
        count: u32,
    },
    /// Deliver `copies` copies (at most 64) of every frame of the flow
    Duplicate {
        #[serde(default)]
        from: Option<SocketAddrV4>,
        #[serde(default)]
        to: Option<SocketAddrV4>,
        copies: u32,
    },
    /// Hold back every `every`-th frame of the flow for one poll
    HoldBack {
        #[serde(default)]
        from: Option<SocketAddrV4>,
        #[serde(default)]
        to: Option<SocketAddrV4>,
        every: u64,
    },
    /// Drop frames of the flow with the given probability
    RandomLoss {
        #[serde(default)]
        from: Option<SocketAddrV4>,
        #[serde(default)]
        to: Option<SocketAddrV4>,
        probability: f64,
        /// Defaults to the general seed
        #[serde(default)]
        seed: Option<u64>,
    },
}

/// A step of the script that drives the scenario's sockets.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "action", rename_all = "kebab-case", deny_unknown_fields)]
pub enum Step {
    /// Send a datagram from a named socket
    Send {
        from: String,
        to: SocketAddrV4,
        payload: Payload,
    },
    /// Let the network deliver queued frames
    Poll {
        #[serde(default = "default_poll_count")]
        count: u32,
    },
    /// Receive a datagram on a named socket, polling until one arrives
    Recv {
        socket: String,
        /// Fail the run unless the payload matches
        #[serde(default)]
        expect: Option<Payload>,
        /// Fail the run unless the datagram came from this endpoint
        #[serde(default)]
        expect_from: Option<SocketAddrV4>,
    },
    /// Close a named socket
    Unbind { socket: String },
    /// Report that the guest reached a milestone
    Milestone { name: String },
}

/// A datagram payload, given either as text or as a list of bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Payload {
    Text(String),
    Bytes(Vec<u8>),
}

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(x) => x.as_bytes(),
            Self::Bytes(x) => x,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
    Trace,
}

impl FromStr for LogLevel {
    type Err = serde_yaml::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_yaml::from_str(s)
    }
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warning => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}

/// The JSON schema of scenario files.
pub fn scenario_schema() -> schemars::schema::RootSchema {
    schema_for!(ScenarioFile)
}

/// Generate help strings for objects in a JSON schema, including the Serde defaults if available.
fn generate_help_strs(
    schema: schemars::schema::RootSchema,
) -> std::collections::HashMap<String, String> {
    let mut defaults = std::collections::HashMap::<String, String>::new();
    for (name, obj) in &schema.schema.object.as_ref().unwrap().properties {
        if let Some(meta) = obj.clone().into_object().metadata {
            let description = meta.description.unwrap_or_default();
            let space = if !description.is_empty() { " " } else { "" };
            match meta.default {
                Some(default) => defaults.insert(
                    name.clone(),
                    format!("{}{}[default: {}]", description, space, default),
                ),
                None => defaults.insert(name.clone(), description.to_string()),
            };
        }
    }
    defaults
}

/// Helper function for serde default `Some(LogLevel::Info)` values.
fn default_some_info() -> Option<LogLevel> {
    Some(LogLevel::Info)
}

/// Helper function for serde default `Some(1)` values.
fn default_some_1() -> Option<u64> {
    Some(1)
}

fn default_some_ttl() -> Option<u8> {
    Some(EngineConfig::default().ttl)
}

fn default_some_defer_attempts() -> Option<u32> {
    Some(EngineConfig::default().max_defer_attempts)
}

fn default_some_synthetic_hops() -> Option<u8> {
    Some(EngineConfig::default().max_synthetic_hops)
}

fn default_some_ephemeral_port() -> Option<u16> {
    Some(EngineConfig::default().ephemeral_port_start)
}

fn default_true() -> bool {
    true
}

fn default_poll_count() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"
        general:
          seed: 7
        network:
          fully_connected: false
          links:
          - [10.0.0.1, 1.2.3.4]
        name_servers:
        - endpoint: 1.2.3.4:53
          records:
            alice: 10.0.0.1
        rules:
        - type: drop-first
          to: 1.2.3.4:53
          count: 1
        - type: random-loss
          probability: 0.5
        sockets:
          alice: 10.0.0.1:1000
        script:
        - action: send
          from: alice
          to: 1.2.3.4:53
          payload: alice
        - action: poll
        - action: recv
          socket: alice
          expect: [10, 0, 0, 1]
        "#;

    fn run_options(args: &[&str]) -> RunOptions {
        let cli = CliOptions::try_parse_from(args).unwrap();
        match cli.command {
            Command::Run(x) => x,
            x => panic!("Unexpected command {x:?}"),
        }
    }

    #[test]
    fn test_parse_scenario() {
        let file: ScenarioFile = SCENARIO.parse().unwrap();

        assert!(!file.network.fully_connected);
        assert_eq!(file.name_servers[0].records["alice"], Ipv4Addr::new(10, 0, 0, 1));
        assert!(matches!(
            file.rules[0],
            RuleOptions::DropFirst {
                from: None,
                count: 1,
                ..
            }
        ));
        assert!(matches!(
            file.rules[1],
            RuleOptions::RandomLoss { seed: None, .. }
        ));
        assert_eq!(file.script.len(), 3);
        assert!(matches!(file.script[1], Step::Poll { count: 1 }));
        match &file.script[2] {
            Step::Recv { expect, .. } => {
                assert_eq!(expect.as_ref().unwrap().as_bytes(), [10, 0, 0, 1])
            }
            x => panic!("Unexpected step {x:?}"),
        }
    }

    #[test]
    fn test_unknown_fields() {
        assert!("general:\n  sed: 1".parse::<ScenarioFile>().is_err());
        assert!("rules:\n- type: drop-first\n  count: 1\n  extra: 2"
            .parse::<ScenarioFile>()
            .is_err());
        assert!("script:\n- action: fly".parse::<ScenarioFile>().is_err());
    }

    #[test]
    fn test_empty_scenario() {
        let file: ScenarioFile = "{}".parse().unwrap();
        let config = ConfigOptions::new(file, &run_options(&["vnet", "run", "-"]));

        assert_eq!(config.log_level(), log::Level::Info);
        assert_eq!(config.seed(), 1);
        assert_eq!(config.engine_config(), EngineConfig::default());
        assert!(config.network.fully_connected);
    }

    #[test]
    fn test_cli_overrides_file() {
        let file: ScenarioFile = "general:\n  log_level: debug\nengine:\n  ttl: 5"
            .parse()
            .unwrap();

        // the file's values are used when the cli doesn't set them
        let config = ConfigOptions::new(file.clone(), &run_options(&["vnet", "run", "-"]));
        assert_eq!(config.log_level(), log::Level::Debug);
        assert_eq!(config.engine_config().ttl, 5);
        assert_eq!(config.seed(), 1);

        let options = run_options(&["vnet", "run", "-", "--log-level", "trace", "--ttl", "9"]);
        let config = ConfigOptions::new(file, &options);
        assert_eq!(config.log_level(), log::Level::Trace);
        assert_eq!(config.engine_config().ttl, 9);
    }

    #[test]
    fn test_cli_commands() {
        let cli = CliOptions::try_parse_from(["vnet", "decode", "--ethernet", "ab", "cd"]).unwrap();
        match cli.command {
            Command::Decode(x) => {
                assert!(x.ethernet);
                assert_eq!(x.frames, ["ab", "cd"]);
            }
            x => panic!("Unexpected command {x:?}"),
        }

        assert!(CliOptions::try_parse_from(["vnet", "decode"]).is_err());
        assert!(matches!(
            CliOptions::try_parse_from(["vnet", "schema"]).unwrap().command,
            Command::Schema
        ));
    }

    #[test]
    fn test_log_level() {
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warning);
        assert!("warn".parse::<LogLevel>().is_err());
        assert_eq!(log::Level::from(LogLevel::Warning), log::Level::Warn);
    }

    #[test]
    fn test_help_strs() {
        let help = generate_help_strs(schema_for!(EngineOptions));
        assert!(help["max_defer_attempts"].ends_with("[default: 16]"));
    }
}
