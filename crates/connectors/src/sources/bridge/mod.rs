//! Bridges to engines the gateway cannot reach with a direct connection.

pub mod foreign;
pub mod proxy;
pub mod relay;

pub use foreign::ForeignMappingEngine;
pub use proxy::{ProxyFunction, ProxyGuard};
pub use relay::RelayEngine;
