mod alloc;
mod config;
mod error;
mod mark;
mod model;

pub use alloc::{SlotAllocator, TicketAllocator};
pub use config::{default_config, merge};
pub use error::{AllocError, ConfigError, ObserverError, RouterError};
pub use mark::Mark;
pub use model::{
    BindEvent, Binder, Clients, ClientStats, Direction, Directional, Interface, InterfaceDoc,
    InterfaceStats, QoS, QosDoc, Router, RouterDoc, RouterState, RouterView, StatsProvider,
};
