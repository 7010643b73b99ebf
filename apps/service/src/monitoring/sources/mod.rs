//! Built-in field sources registered with the sample aggregator.

pub mod connectivity;
pub mod location;
pub mod reachability;
pub mod wifi;

pub use connectivity::ConnectivitySource;
pub use location::LocationSource;
pub use reachability::ProbeSource;
pub use wifi::WifiSignalSource;
