// fwenforcer-api: Async Rust client for the compute firewall and storage APIs

pub mod compute;
pub mod error;
pub mod retry;
pub mod storage;
pub mod transport;
pub mod types;

pub use compute::{ComputeClient, ComputeFirewallApi};
pub use error::Error;
pub use retry::RetryConfig;
pub use storage::StorageClient;
pub use transport::{TlsMode, TransportConfig};
