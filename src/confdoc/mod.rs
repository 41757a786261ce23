mod document;
mod store;

pub use document::ClusterState;
pub use document::ConfigDocument;
pub use store::ConfigError;
pub use store::ConfigStore;
pub use store::CONFIG_FILE_NAME;
