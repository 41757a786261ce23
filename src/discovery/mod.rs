mod directory;
mod endpoint;

pub use directory::DiscoveryError;
pub use directory::DnsPeerDirectory;
pub use directory::Machine;
pub use directory::PeerDirectory;
pub use endpoint::cluster_token;
pub use endpoint::Endpoint;
