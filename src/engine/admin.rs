use std::path::Path;

/// One row of the engine's own membership table. This subsystem only reads it
/// and proposes additions/removals.
#[derive(Clone, Debug)]
pub struct MemberRecord {
    pub id: u64,
    pub name: String,
    pub peer_urls: Vec<String>,
    pub client_urls: Vec<String>,
    pub is_learner: bool,
}

/// Result of a member-add: the id assigned to the new member plus the full
/// authoritative member list from the same response. The join path builds
/// `initial-cluster` from this, never from DNS.
#[derive(Clone, Debug)]
pub struct MemberAddOutcome {
    pub added_id: u64,
    pub members: Vec<MemberRecord>,
}

#[derive(Clone, Copy, Debug)]
pub struct EngineStatus {
    pub member_id: u64,
    pub leader_id: u64,
    pub db_size_bytes: i64,
}

#[derive(Clone, Debug)]
pub struct AlarmRecord {
    pub member_id: u64,
    pub alarm: String,
}

/// "Not yet a recognized member" is a distinct outcome, not a failure;
/// callers branch on it differently than on a dead transport.
#[derive(Debug)]
pub enum MemberLookup {
    Found(u64),
    NotFound,
    TransportError(String),
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine rpc failed: {0}")]
    Rpc(String),

    #[error("engine rpc timed out")]
    Timeout,

    #[error("snapshot create failed: {0}")]
    SnapshotCreate(String),
}

/// Connection seam: bootstrap decides which peer endpoint to talk to at
/// runtime, so it needs to open admin handles itself rather than receive one.
#[async_trait::async_trait]
pub trait EngineConnector: Send + Sync {
    async fn connect(&self, endpoints: Vec<String>) -> Result<Box<dyn EngineAdmin>, EngineError>;
}

/// The fixed subset of the engine's administrative RPC surface this system
/// consumes. Every call is deadline-bounded by the implementation.
#[async_trait::async_trait]
pub trait EngineAdmin: Send + Sync {
    async fn member_list(&self) -> Result<Vec<MemberRecord>, EngineError>;
    async fn member_add(&self, peer_url: &str) -> Result<MemberAddOutcome, EngineError>;
    async fn member_remove(&self, id: u64) -> Result<Vec<MemberRecord>, EngineError>;

    /// Status of a specific client endpoint (leader id as seen there, plus
    /// the responding member's own id).
    async fn status(&self, client_url: &str) -> Result<EngineStatus, EngineError>;

    async fn alarm_list(&self) -> Result<Vec<AlarmRecord>, EngineError>;
    async fn alarm_disarm(&self, member_id: u64) -> Result<Vec<AlarmRecord>, EngineError>;

    /// Stream a consistent point-in-time snapshot into `dest`. Returns the
    /// snapshot size in bytes.
    async fn snapshot_to_file(&self, dest: &Path) -> Result<u64, EngineError>;

    async fn user_add(&self, name: &str, password: &str) -> Result<(), EngineError>;
    async fn user_grant_role(&self, user: &str, role: &str) -> Result<(), EngineError>;
    async fn auth_enable(&self) -> Result<(), EngineError>;

    /// Linear scan of the member list for `name`, collapsed into the tagged
    /// lookup result.
    async fn lookup_member(&self, name: &str) -> MemberLookup {
        let members = match self.member_list().await {
            Ok(members) => members,
            Err(e) => return MemberLookup::TransportError(e.to_string()),
        };

        for member in members {
            if member.name == name {
                return MemberLookup::Found(member.id);
            }
        }

        MemberLookup::NotFound
    }
}
