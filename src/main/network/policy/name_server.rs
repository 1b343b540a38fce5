use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt::Display;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

use super::rules::ScenarioRule;
use super::{DeliveryDecision, ReplyBuilder};

#[derive(Debug, Default)]
struct Database {
    name_index: HashMap<String, Arc<Record>>,
    addr_index: HashMap<Ipv4Addr, Arc<Record>>,
}

#[derive(Debug)]
struct Record {
    addr: Ipv4Addr,
    name: String,
}

#[derive(Debug, PartialEq)]
pub enum RegistrationError {
    InvalidAddr,
    InvalidName,
    AddrExists,
    NameExists,
}

impl Display for RegistrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistrationError::InvalidAddr => write!(f, "address is invalid for registration"),
            RegistrationError::InvalidName => write!(f, "name is invalid for registration"),
            RegistrationError::NameExists => {
                write!(f, "a registration record already exists for name")
            }
            RegistrationError::AddrExists => {
                write!(f, "a registration record already exists for address")
            }
        }
    }
}

impl std::error::Error for RegistrationError {}

#[derive(Debug, Default)]
pub struct NameServerBuilder {
    db: Database,
    fixed_answer: Option<Ipv4Addr>,
}

impl NameServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, addr: Ipv4Addr, name: String) -> Result<(), RegistrationError> {
        // Make sure we don't register reserved addresses or names.
        if addr.is_loopback() || addr.is_unspecified() || addr.is_broadcast() || addr.is_multicast()
        {
            return Err(RegistrationError::InvalidAddr);
        } else if name.is_empty()
            || name.bytes().any(|x| x.is_ascii_whitespace())
            || name.eq_ignore_ascii_case("localhost")
        {
            return Err(RegistrationError::InvalidName);
        }

        match self.db.addr_index.entry(addr) {
            Entry::Occupied(_) => Err(RegistrationError::AddrExists),
            Entry::Vacant(addr_entry) => match self.db.name_index.entry(name.clone()) {
                Entry::Occupied(_) => Err(RegistrationError::NameExists),
                Entry::Vacant(name_entry) => {
                    let record = Arc::new(Record { addr, name });
                    addr_entry.insert(record.clone());
                    name_entry.insert(record);
                    Ok(())
                }
            },
        }
    }

    /// Answer every query with `addr`, whether or not the name is registered.
    pub fn fixed_answer(&mut self, addr: Ipv4Addr) -> &mut Self {
        self.fixed_answer = Some(addr);
        self
    }

    /// Build a name server that answers queries sent to `endpoint`.
    pub fn build(self, endpoint: SocketAddrV4) -> NameServer {
        NameServer {
            endpoint,
            db: Arc::new(self.db),
            fixed_answer: self.fixed_answer,
        }
    }
}

/// A name server that exists only as a policy rule. A query is a datagram whose payload is a
/// name; the answer is the 4-byte address of that name, or `0.0.0.0` if the name is unknown.
#[derive(Debug, Clone)]
pub struct NameServer {
    endpoint: SocketAddrV4,
    db: Arc<Database>,
    fixed_answer: Option<Ipv4Addr>,
}

impl NameServer {
    pub fn endpoint(&self) -> SocketAddrV4 {
        self.endpoint
    }

    pub fn name_to_addr(&self, name: &str) -> Option<Ipv4Addr> {
        self.db.name_index.get(name).map(|record| record.addr)
    }

    pub fn addr_to_name(&self, addr: Ipv4Addr) -> Option<&str> {
        self.db
            .addr_index
            .get(&addr)
            .map(|record| record.name.as_str())
    }

    /// The number of registered names.
    pub fn len(&self) -> usize {
        self.db.name_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.name_index.is_empty()
    }

    /// The reply payload for a query payload.
    pub fn answer(&self, query: &[u8]) -> [u8; 4] {
        if let Some(addr) = self.fixed_answer {
            return addr.octets();
        }

        let name = String::from_utf8_lossy(query);
        let name = name.trim_matches(|c: char| c.is_ascii_whitespace() || c == '\0');

        match self.name_to_addr(name) {
            Some(addr) => addr.octets(),
            None => {
                log::debug!("Name server {} has no record for {name:?}", self.endpoint);
                Ipv4Addr::UNSPECIFIED.octets()
            }
        }
    }
}

impl ScenarioRule for NameServer {
    fn resolve(
        &mut self,
        _from: SocketAddrV4,
        to: SocketAddrV4,
        _attempt: u32,
    ) -> Option<DeliveryDecision> {
        if to != self.endpoint {
            return None;
        }

        let server = self.clone();
        Some(DeliveryDecision::Reply(ReplyBuilder::new(move |query| {
            server.answer(query).to_vec()
        })))
    }
}
