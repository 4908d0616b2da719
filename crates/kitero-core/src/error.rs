use thiserror::Error;

/// An error raised by an observer during `notify`, boxed so the `Binder`
/// trait can stay object-safe regardless of which crate implements it.
pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("'clients' key is missing from router configuration")]
    MissingClients,
    #[error("interface {interface:?} references unknown qos {qos:?}")]
    UnknownQos { interface: String, qos: String },
    #[error("mark encoding needs {0} bits, which exceeds 32")]
    MarkOverflow(u32),
    #[error("{0:?} is listed as both an incoming and an outgoing interface")]
    OverlappingInterface(String),
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("unknown outgoing interface {0:?}")]
    UnknownInterface(String),
    #[error("no qos {qos:?} available on interface {interface:?}")]
    UnknownQos { interface: String, qos: String },
    #[error("client {0} is already bound")]
    AlreadyBound(String),
    #[error("invalid client address {0:?}: {1}")]
    InvalidClient(String, std::net::AddrParseError),
    #[error("an observer rejected the binding: {0}")]
    Observer(#[from] ObserverError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AllocError {
    #[error("client {0} already holds a slot")]
    DuplicateSlot(String),
    #[error("client {0} already holds a ticket")]
    DuplicateTicket(String),
    #[error("no free slot on interface {0:?} (capacity {1})")]
    SlotsExhausted(String, u32),
    #[error("client {0} is unknown to this allocator")]
    UnknownClient(String),
    #[error("ticket space exhausted")]
    TicketOverflow,
}
