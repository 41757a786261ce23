mod admin;
mod auth;
mod etcd;
mod process;

pub use admin::AlarmRecord;
pub use admin::EngineAdmin;
pub use admin::EngineConnector;
pub use admin::EngineError;
pub use admin::EngineStatus;
pub use admin::MemberAddOutcome;
pub use admin::MemberLookup;
pub use admin::MemberRecord;
pub use auth::initialize_auth;
pub use etcd::EtcdAdmin;
pub use etcd::EtcdConnector;
pub use process::stop_engine_process;
pub use process::ProcessStopError;
