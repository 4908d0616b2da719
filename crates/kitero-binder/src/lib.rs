mod error;
mod linux;
mod persist;

pub use error::{LinuxBinderError, PersistError};
pub use linux::{LinuxBinder, LinuxBinderConfig, LinuxBinderIpv4};
pub use persist::PersistentBinder;
