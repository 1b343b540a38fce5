//! Turns a parsed scenario file into a topology policy, and runs its script against an engine.

use std::collections::HashMap;
use std::io::Write;
use std::net::{SocketAddr, SocketAddrV4};

use vnet_wire::MAX_UDP_PAYLOAD_LEN;

use crate::core::configuration::{ConfigOptions, NameServerOptions, RuleOptions, Step};
use crate::host::guest_socket::GuestUdpSocket;
use crate::host::session::GuestSession;
use crate::network::graph::LinkGraph;
use crate::network::policy::name_server::{NameServer, NameServerBuilder, RegistrationError};
use crate::network::policy::rules::{
    DropFirst, Duplicate, FlowFilter, HoldBack, RandomLoss, Rule,
};
use crate::network::policy::{Links, Scenario};

#[derive(Debug, PartialEq)]
pub enum ConfigError {
    /// The network section is contradictory.
    InvalidNetwork(String),
    /// A name server record could not be registered.
    InvalidRecord {
        endpoint: SocketAddrV4,
        name: String,
        source: RegistrationError,
    },
    /// A rule's parameters are out of range.
    InvalidRule { index: usize, reason: String },
    /// A script step names a socket that the scenario doesn't declare.
    UnknownSocket { step: usize, name: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidNetwork(reason) => write!(f, "invalid network: {reason}"),
            Self::InvalidRecord {
                endpoint,
                name,
                source,
            } => write!(f, "name server {endpoint}: record {name:?}: {source}"),
            Self::InvalidRule { index, reason } => write!(f, "rule {index}: {reason}"),
            Self::UnknownSocket { step, name } => {
                write!(f, "script step {step}: no socket named {name:?}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidRecord { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Build the policy described by a scenario. The scenario's rules are tried before its name
/// servers, so a rule can drop or duplicate a query before it is answered.
pub fn build_policy(config: &ConfigOptions) -> Result<Scenario, ConfigError> {
    let network = &config.network;

    let links = if network.fully_connected {
        if !network.links.is_empty() {
            return Err(ConfigError::InvalidNetwork(
                "links are listed but the network is fully connected".into(),
            ));
        }
        Links::FullyConnected
    } else {
        let mut graph = LinkGraph::new();
        for node in &network.nodes {
            graph.add_node(*node);
        }
        for (a, b) in &network.links {
            graph.add_link(*a, *b);
        }
        log::debug!(
            "Built a network of {} nodes and {} links",
            graph.node_count(),
            graph.link_count()
        );
        Links::Graph(graph)
    };

    let mut scenario = Scenario::new(links);

    for (index, rule) in config.rules.iter().enumerate() {
        scenario.push_rule(build_rule(index, rule, config.seed())?);
    }

    for options in &config.name_servers {
        scenario.push_rule(build_name_server(options)?);
    }

    Ok(scenario)
}

/// Upper bound on the copies a duplicate rule may deliver for one frame.
const MAX_DUPLICATE_COPIES: u32 = 64;

fn build_rule(index: usize, rule: &RuleOptions, default_seed: u64) -> Result<Rule, ConfigError> {
    let filter = |from: &Option<SocketAddrV4>, to: &Option<SocketAddrV4>| FlowFilter {
        from: *from,
        to: *to,
    };

    let rule = match rule {
        RuleOptions::DropFirst { from, to, count } => {
            DropFirst::new(filter(from, to), *count).into()
        }
        RuleOptions::Duplicate { from, to, copies } => {
            if *copies > MAX_DUPLICATE_COPIES {
                return Err(ConfigError::InvalidRule {
                    index,
                    reason: format!("duplicate allows at most {MAX_DUPLICATE_COPIES} copies"),
                });
            }
            Duplicate::new(filter(from, to), *copies).into()
        }
        RuleOptions::HoldBack { from, to, every } => {
            if *every == 0 {
                return Err(ConfigError::InvalidRule {
                    index,
                    reason: "hold-back needs 'every' to be at least 1".into(),
                });
            }
            HoldBack::new(filter(from, to), *every).into()
        }
        RuleOptions::RandomLoss {
            from,
            to,
            probability,
            seed,
        } => {
            if !(0.0..=1.0).contains(probability) {
                return Err(ConfigError::InvalidRule {
                    index,
                    reason: format!("loss probability {probability} is not between 0 and 1"),
                });
            }
            let seed = seed.unwrap_or(default_seed);
            RandomLoss::new(filter(from, to), *probability, seed).into()
        }
    };

    Ok(rule)
}

fn build_name_server(options: &NameServerOptions) -> Result<NameServer, ConfigError> {
    let mut builder = NameServerBuilder::new();

    for (name, addr) in &options.records {
        builder
            .register(*addr, name.clone())
            .map_err(|source| ConfigError::InvalidRecord {
                endpoint: options.endpoint,
                name: name.clone(),
                source,
            })?;
    }

    if let Some(addr) = options.fixed_answer {
        builder.fixed_answer(addr);
    }

    Ok(builder.build(options.endpoint))
}

/// Check that every script step names a socket that the scenario declares.
pub fn validate_script(config: &ConfigOptions) -> Result<(), ConfigError> {
    for (step, action) in config.script.iter().enumerate() {
        let name = match action {
            Step::Send { from, .. } => from,
            Step::Recv { socket, .. } | Step::Unbind { socket } => socket,
            Step::Poll { .. } | Step::Milestone { .. } => continue,
        };

        if !config.sockets.contains_key(name) {
            return Err(ConfigError::UnknownSocket {
                step,
                name: name.clone(),
            });
        }
    }

    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub socket: String,
    pub source: SocketAddr,
    pub payload: Vec<u8>,
}

/// What happened during a script run.
#[derive(Debug, Default)]
pub struct ScriptReport {
    pub received: Vec<Received>,
    /// Steps that failed or whose expectations weren't met.
    pub failures: Vec<String>,
}

impl ScriptReport {
    pub fn succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Bind the scenario's sockets and run its script. Each received datagram is printed to `out`.
///
/// A failed step is recorded in the report and the script moves on to the next step. The
/// sockets are closed when the script ends.
pub fn run_script<'s, 'e>(
    session: &'s GuestSession<'e>,
    config: &ConfigOptions,
    mut out: impl Write,
) -> std::io::Result<ScriptReport> {
    let mut report = ScriptReport::default();
    let mut sockets = HashMap::<&str, GuestUdpSocket<'s, 'e>>::new();

    for (name, endpoint) in &config.sockets {
        match session.bind(*endpoint) {
            Ok(socket) => {
                log::debug!("Bound socket {name} to {endpoint}");
                sockets.insert(name.as_str(), socket);
            }
            Err(e) => report.failures.push(format!("binding {name}: {e}")),
        }
    }

    let mut buf = vec![0u8; MAX_UDP_PAYLOAD_LEN];

    for (index, step) in config.script.iter().enumerate() {
        log::trace!("Running script step {index}: {step:?}");

        match step {
            Step::Send { from, to, payload } => {
                let Some(socket) = sockets.get(from.as_str()) else {
                    report.failures.push(format!("step {index}: {from} is not bound"));
                    continue;
                };
                if let Err(e) = socket.send_to(payload.as_bytes(), *to) {
                    report.failures.push(format!("step {index}: {from}: {e}"));
                }
            }
            Step::Poll { count } => {
                for _ in 0..*count {
                    session.poll();
                }
            }
            Step::Recv {
                socket: name,
                expect,
                expect_from,
            } => {
                let Some(socket) = sockets.get(name.as_str()) else {
                    report.failures.push(format!("step {index}: {name} is not bound"));
                    continue;
                };

                let (len, source) = match socket.recv_from(&mut buf) {
                    Ok(x) => x,
                    Err(e) => {
                        report.failures.push(format!("step {index}: {name}: {e}"));
                        continue;
                    }
                };
                let payload = &buf[..len];

                writeln!(out, "{name} <- {source}: {}", format_payload(payload))?;

                if let Some(expect) = expect {
                    if expect.as_bytes() != payload {
                        report.failures.push(format!(
                            "step {index}: {name} expected {} but received {}",
                            format_payload(expect.as_bytes()),
                            format_payload(payload),
                        ));
                    }
                }
                if let Some(expect_from) = expect_from {
                    if SocketAddr::V4(*expect_from) != source {
                        report.failures.push(format!(
                            "step {index}: {name} expected a datagram from {expect_from} but it \
                             came from {source}"
                        ));
                    }
                }

                report.received.push(Received {
                    socket: name.clone(),
                    source,
                    payload: payload.to_vec(),
                });
            }
            Step::Unbind { socket: name } => {
                if sockets.remove(name.as_str()).is_none() {
                    report.failures.push(format!("step {index}: {name} is not bound"));
                }
            }
            Step::Milestone { name } => session.report_milestone(name),
        }
    }

    Ok(report)
}

/// Printable text is shown quoted, anything else as hex bytes.
pub fn format_payload(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) if !text.chars().any(char::is_control) => format!("{text:?}"),
        _ => {
            let bytes: Vec<String> = payload.iter().map(|x| format!("{x:02x}")).collect();
            format!("[{}]", bytes.join(" "))
        }
    }
}
