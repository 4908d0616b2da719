//! The router's data model: QoS profiles, interfaces, the client table and
//! the observer fan-out that drives binders.

use std::collections::HashMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ObserverError, RouterError};

/// A directional value: either a single scalar applied to both
/// directions, or a split `{up, down}` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Directional {
    Scalar(String),
    Split {
        up: Option<String>,
        down: Option<String>,
    },
}

impl Directional {
    pub fn up(&self) -> Option<&str> {
        match self {
            Directional::Scalar(s) => Some(s.as_str()),
            Directional::Split { up, .. } => up.as_deref(),
        }
    }

    pub fn down(&self) -> Option<&str> {
        match self {
            Directional::Scalar(s) => Some(s.as_str()),
            Directional::Split { down, .. } => down.as_deref(),
        }
    }
}

/// Which side of a binding a setting applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// QoS settings: a name, description, and a settings map. Recognized
/// setting names are `bandwidth` and `netem`; unrecognized names are kept
/// but ignored by the binder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QoS {
    pub name: String,
    pub description: String,
    pub settings: HashMap<String, Directional>,
}

impl QoS {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        settings: HashMap<String, Directional>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            settings,
        }
    }

    pub fn setting(&self, name: &str, direction: Direction) -> Option<&str> {
        let value = self.settings.get(name)?;
        match direction {
            Direction::Up => value.up(),
            Direction::Down => value.down(),
        }
    }

    pub fn bandwidth(&self, direction: Direction) -> Option<&str> {
        self.setting("bandwidth", direction)
    }

    pub fn netem(&self, direction: Direction) -> Option<&str> {
        self.setting("netem", direction)
    }
}

/// An outgoing interface and the QoS profiles available on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interface {
    pub name: String,
    pub description: String,
    pub qos: HashMap<String, QoS>,
}

impl Interface {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        qos: HashMap<String, QoS>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            qos,
        }
    }
}

/// A snapshot of the parts of a `Router` an observer is allowed to see.
/// Observers must never retain a pointer back to the live `Router`
/// itself; they only ever receive one of these by value or reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterView {
    pub incoming: Vec<String>,
    pub interfaces: HashMap<String, Interface>,
}

/// A binding or unbinding event, passed to observers alongside a
/// `RouterView`.
#[derive(Debug, Clone, PartialEq)]
pub enum BindEvent {
    Bind {
        client: String,
        interface: String,
        qos: String,
    },
    Unbind {
        client: String,
    },
}

/// Per-client up/down byte counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientStats {
    pub up: Option<u64>,
    pub down: Option<u64>,
}

/// Aggregated statistics for one outgoing interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceStats {
    pub clients: usize,
    pub up: Option<u64>,
    pub down: Option<u64>,
    pub details: HashMap<String, ClientStats>,
}

/// Capability an observer must implement to be registered with a `Router`.
pub trait Binder: Send {
    fn notify(&mut self, router: &RouterView, event: &BindEvent) -> Result<(), ObserverError>;

    /// Returns `Some(self)` if this observer can also serve statistics.
    /// Overridden by observers that implement `StatsProvider`.
    fn as_stats_provider(&self) -> Option<&dyn StatsProvider> {
        None
    }
}

/// Capability an observer may additionally implement to serve
/// per-interface statistics back through `Router::stats`.
pub trait StatsProvider {
    fn stats(&self) -> HashMap<String, InterfaceStats>;
}

/// A router manages outgoing interfaces, their QoS catalogs and a table of
/// bound clients. It does not act on bindings itself — it only notifies
/// registered observers, which perform the actual kernel configuration.
pub struct Router {
    incoming: Vec<String>,
    interfaces: HashMap<String, Interface>,
    clients: HashMap<String, (String, String)>,
    observers: Vec<Box<dyn Binder>>,
    stats_provider: Option<usize>,
}

impl std::fmt::Debug for Router {
    /// Observers are runtime handles, not data, so this lists only their
    /// count rather than trying to print trait objects that carry no
    /// `Debug` bound.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("incoming", &self.incoming)
            .field("interfaces", &self.interfaces)
            .field("clients", &self.clients)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl Router {
    pub fn new(incoming: Vec<String>, interfaces: HashMap<String, Interface>) -> Self {
        Self {
            incoming,
            interfaces,
            clients: HashMap::new(),
            observers: Vec::new(),
            stats_provider: None,
        }
    }

    /// Parses a router configuration document into a fresh `Router` with
    /// no bound clients.
    pub fn load(doc: &RouterDoc) -> Result<Self, ConfigError> {
        for incoming in &doc.clients.0 {
            if doc.interfaces.contains_key(incoming) {
                return Err(ConfigError::OverlappingInterface(incoming.clone()));
            }
        }

        let mut available_qos = HashMap::new();
        for (id, q) in &doc.qos {
            available_qos.insert(
                id.clone(),
                QoS::new(q.name.clone(), q.description.clone(), q.settings()),
            );
        }

        let mut interfaces = HashMap::new();
        for (id, iface) in &doc.interfaces {
            let mut qos = HashMap::new();
            for qid in &iface.qos {
                let q = available_qos.get(qid).ok_or_else(|| ConfigError::UnknownQos {
                    interface: id.clone(),
                    qos: qid.clone(),
                })?;
                qos.insert(qid.clone(), q.clone());
            }
            interfaces.insert(id.clone(), Interface::new(iface.name.clone(), iface.description.clone(), qos));
        }

        Ok(Self::new(doc.clients.0.clone(), interfaces))
    }

    /// Registers a new observer. Observers are notified in registration
    /// order. If the observer also offers `StatsProvider`, it becomes the
    /// designated stats provider (last registration wins).
    pub fn register(&mut self, observer: Box<dyn Binder>) {
        let provides_stats = observer.as_stats_provider().is_some();
        self.observers.push(observer);
        if provides_stats {
            self.stats_provider = Some(self.observers.len() - 1);
        }
    }

    pub fn view(&self) -> RouterView {
        RouterView {
            incoming: self.incoming.clone(),
            interfaces: self.interfaces.clone(),
        }
    }

    pub fn incoming(&self) -> &[String] {
        &self.incoming
    }

    pub fn interfaces(&self) -> &HashMap<String, Interface> {
        &self.interfaces
    }

    pub fn clients(&self) -> &HashMap<String, (String, String)> {
        &self.clients
    }

    fn notify(&mut self, event: &BindEvent) -> Result<(), ObserverError> {
        let view = self.view();
        for obs in self.observers.iter_mut() {
            obs.notify(&view, event)?;
        }
        Ok(())
    }

    /// Binds a client to an outgoing interface and QoS profile.
    ///
    /// Observers are notified *before* the client table is mutated: if an
    /// observer errors, the client is left unbound.
    pub fn bind(&mut self, client: &str, interface: &str, qos: &str) -> Result<(), RouterError> {
        let client: IpAddr = client
            .parse()
            .map_err(|e| RouterError::InvalidClient(client.to_string(), e))?;
        let client = client.to_string();

        if self.clients.contains_key(&client) {
            return Err(RouterError::AlreadyBound(client));
        }
        let iface = self
            .interfaces
            .get(interface)
            .ok_or_else(|| RouterError::UnknownInterface(interface.to_string()))?;
        if !iface.qos.contains_key(qos) {
            return Err(RouterError::UnknownQos {
                interface: interface.to_string(),
                qos: qos.to_string(),
            });
        }

        self.notify(&BindEvent::Bind {
            client: client.clone(),
            interface: interface.to_string(),
            qos: qos.to_string(),
        })?;
        self.clients
            .insert(client.clone(), (interface.to_string(), qos.to_string()));
        tracing::info!(client, interface, qos, "bound client");
        Ok(())
    }

    /// Unbinds a client. A no-op if the client is unknown.
    ///
    /// Observers are notified before the client is removed: if an
    /// observer errors, the client remains bound so a retry is possible.
    pub fn unbind(&mut self, client: &str) -> Result<(), RouterError> {
        if !self.clients.contains_key(client) {
            return Ok(());
        }
        self.notify(&BindEvent::Unbind {
            client: client.to_string(),
        })?;
        self.clients.remove(client);
        tracing::info!(client, "unbound client");
        Ok(())
    }

    /// Returns per-interface statistics, consulting the designated stats
    /// provider (if any) but rebuilding the result from the authoritative
    /// client table so every known interface and bound client appears.
    pub fn stats(&self) -> HashMap<String, InterfaceStats> {
        let provider_stats = self
            .stats_provider
            .and_then(|idx| self.observers[idx].as_stats_provider())
            .map(|p| p.stats())
            .unwrap_or_default();

        let mut result = HashMap::new();
        for interface in self.interfaces.keys() {
            let mut details = HashMap::new();
            for (client, (iface, _qos)) in &self.clients {
                if iface == interface {
                    let stats = provider_stats
                        .get(interface)
                        .and_then(|s| s.details.get(client))
                        .copied()
                        .unwrap_or_default();
                    details.insert(client.clone(), stats);
                }
            }
            let up = provider_stats.get(interface).and_then(|s| s.up);
            let down = provider_stats.get(interface).and_then(|s| s.down);
            result.insert(
                interface.clone(),
                InterfaceStats {
                    clients: details.len(),
                    up,
                    down,
                    details,
                },
            );
        }
        result
    }

    /// Serializes this router's interfaces, incoming list and client
    /// table. Observers are not part of the persisted state: a
    /// deserialized `Router` starts with no observers and an empty
    /// client table, ready to have observers registered before bindings
    /// are replayed with `restore_clients`.
    pub fn to_state(&self) -> RouterState {
        RouterState {
            incoming: self.incoming.clone(),
            interfaces: self.interfaces.clone(),
            clients: self.clients.clone(),
        }
    }

    pub fn from_state(state: RouterState) -> Self {
        Self::new(state.incoming, state.interfaces)
    }

    /// Replays a previously-serialized client table through the normal
    /// `bind` path, so every currently-registered observer rebuilds its
    /// side effects. Used both after `from_state` and by
    /// `PersistentBinder::restore`.
    pub fn restore_clients(
        &mut self,
        clients: HashMap<String, (String, String)>,
    ) -> Vec<(String, RouterError)> {
        let mut failures = Vec::new();
        for (client, (interface, qos)) in clients {
            if let Err(err) = self.bind(&client, &interface, &qos) {
                failures.push((client, err));
            }
        }
        failures
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterState {
    pub incoming: Vec<String>,
    pub interfaces: HashMap<String, Interface>,
    pub clients: HashMap<String, (String, String)>,
}

/// `clients:` accepts either a single interface name or a list of them.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl From<OneOrMany> for Vec<String> {
    fn from(value: OneOrMany) -> Self {
        match value {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Clients(pub Vec<String>);

impl<'de> Deserialize<'de> for Clients {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = OneOrMany::deserialize(deserializer)?;
        Ok(Clients(raw.into()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QosDoc {
    pub name: String,
    pub description: String,
    pub bandwidth: Option<Directional>,
    pub netem: Option<Directional>,
}

impl QosDoc {
    fn settings(&self) -> HashMap<String, Directional> {
        let mut settings = HashMap::new();
        if let Some(b) = &self.bandwidth {
            settings.insert("bandwidth".to_string(), b.clone());
        }
        if let Some(n) = &self.netem {
            settings.insert("netem".to_string(), n.clone());
        }
        settings
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InterfaceDoc {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub qos: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouterDoc {
    pub clients: Clients,
    #[serde(default)]
    pub interfaces: HashMap<String, InterfaceDoc>,
    #[serde(default)]
    pub qos: HashMap<String, QosDoc>,
}

impl RouterDoc {
    pub fn from_yaml(value: &serde_yaml::Value) -> Result<Self, ConfigError> {
        if value.get("clients").is_none() {
            return Err(ConfigError::MissingClients);
        }
        let doc: RouterDoc = serde_yaml::from_value(value.clone())?;
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_router() -> Router {
        let mut settings = HashMap::new();
        settings.insert(
            "bandwidth".to_string(),
            Directional::Scalar("100mbps".to_string()),
        );
        let qos1 = QoS::new("qos1", "basic", settings);
        let mut qos = HashMap::new();
        qos.insert("qos1".to_string(), qos1);
        let mut interfaces = HashMap::new();
        interfaces.insert(
            "eth1".to_string(),
            Interface::new("eth1", "uplink 1", qos.clone()),
        );
        interfaces.insert("eth2".to_string(), Interface::new("eth2", "uplink 2", qos));
        Router::new(vec!["eth0".to_string()], interfaces)
    }

    #[test]
    fn bind_rejects_duplicate_and_unknown() {
        let mut router = sample_router();
        router.bind("192.168.15.2", "eth1", "qos1").unwrap();
        assert!(matches!(
            router.bind("192.168.15.2", "eth1", "qos1"),
            Err(RouterError::AlreadyBound(_))
        ));
        assert!(matches!(
            router.bind("10.0.0.1", "ethX", "qos1"),
            Err(RouterError::UnknownInterface(_))
        ));
        assert!(matches!(
            router.bind("10.0.0.2", "eth1", "qosX"),
            Err(RouterError::UnknownQos { .. })
        ));
    }

    #[test]
    fn unbind_unknown_client_is_noop() {
        let mut router = sample_router();
        assert!(router.unbind("10.0.0.9").is_ok());
    }

    #[test]
    fn stats_rebuilds_from_client_table() {
        let mut router = sample_router();
        router.bind("192.168.15.2", "eth1", "qos1").unwrap();
        let stats = router.stats();
        assert_eq!(stats["eth1"].clients, 1);
        assert!(stats["eth1"].details.contains_key("192.168.15.2"));
        assert_eq!(stats["eth2"].clients, 0);
    }

    #[test]
    fn ipv6_client_address_is_canonicalized() {
        let mut router = sample_router();
        router
            .bind("2001:db8:0:0:0:0:0:1", "eth1", "qos1")
            .unwrap();
        assert!(router.clients().contains_key("2001:db8::1"));
    }

    #[test]
    fn serialize_round_trip_replays_bindings() {
        let mut router = sample_router();
        router.bind("192.168.15.2", "eth1", "qos1").unwrap();
        router.bind("192.168.15.3", "eth2", "qos1").unwrap();
        let state = router.to_state();
        let mut restored = Router::from_state(state);
        assert!(restored.clients().is_empty());
        let original_clients = router.clients().clone();
        let failures = restored.restore_clients(original_clients);
        assert!(failures.is_empty());
        assert_eq!(restored.clients().len(), 2);
    }

    #[test]
    fn load_parses_full_yaml_document() {
        let yaml = serde_yaml::from_str(
            r#"
clients: eth0
interfaces:
  eth1:
    name: First uplink
    description: primary WAN
    qos: [qos1]
  eth2:
    name: Second uplink
    description: backup WAN
    qos: [qos1]
qos:
  qos1:
    name: Basic
    description: a basic profile
    bandwidth: 100mbps
    netem:
      up: delay 100ms 10ms
      down: delay 50ms
"#,
        )
        .unwrap();
        let doc = RouterDoc::from_yaml(&yaml).unwrap();
        let router = Router::load(&doc).unwrap();
        assert_eq!(router.incoming(), &["eth0".to_string()]);
        assert!(router.interfaces().contains_key("eth1"));
        let qos1 = &router.interfaces()["eth1"].qos["qos1"];
        assert_eq!(qos1.bandwidth(Direction::Up), Some("100mbps"));
        assert_eq!(qos1.netem(Direction::Up), Some("delay 100ms 10ms"));
        assert_eq!(qos1.netem(Direction::Down), Some("delay 50ms"));
    }

    #[test]
    fn load_rejects_unknown_qos_reference() {
        let yaml = serde_yaml::from_str(
            r#"
clients: [eth0]
interfaces:
  eth1:
    name: First uplink
    description: primary WAN
    qos: [missing]
qos: {}
"#,
        )
        .unwrap();
        let doc = RouterDoc::from_yaml(&yaml).unwrap();
        assert!(matches!(
            Router::load(&doc),
            Err(ConfigError::UnknownQos { .. })
        ));
    }

    #[test]
    fn load_rejects_interface_used_as_both_incoming_and_outgoing() {
        let yaml = serde_yaml::from_str(
            r#"
clients: [eth0]
interfaces:
  eth0:
    name: Conflicting
    description: also named as an incoming interface
    qos: []
qos: {}
"#,
        )
        .unwrap();
        let doc = RouterDoc::from_yaml(&yaml).unwrap();
        assert!(matches!(
            Router::load(&doc),
            Err(ConfigError::OverlappingInterface(ref iface)) if iface == "eth0"
        ));
    }

    #[test]
    fn from_yaml_rejects_missing_clients_key() {
        let yaml = serde_yaml::from_str("interfaces: {}\nqos: {}\n").unwrap();
        assert!(matches!(
            RouterDoc::from_yaml(&yaml),
            Err(ConfigError::MissingClients)
        ));
    }
}
