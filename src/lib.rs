//! NoCAN gateway
//!
//! Host side of a NoCAN bus: serial adapter links, the node registry and the
//! router that ties them together.

pub mod config;
pub mod gateway;
pub mod registry;

// re-export
pub use nocan;
pub use nocan_serial;

pub use config::{ConfigError, GatewayConfig, InterfaceConfig};
pub use gateway::{Gateway, GatewayBuilder, GatewayError};
pub use registry::{NodeProperties, NodeRecord, NodeRegistry, RegistryError};
