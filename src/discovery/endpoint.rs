use sha2::{Digest, Sha256};

const CLIENT_PORT: u16 = 2379;
const PEER_PORT: u16 = 2380;

/// Identity record for one member, recomputed on every process start and
/// never persisted. `name` is derived from the stable machine id rather than
/// the network address, so a member keeps its identity across address changes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Endpoint {
    pub name: String,
    pub addr: String,
    pub client_url: String,
    pub peer_url: String,
}

impl Endpoint {
    /// Pure function of (machine id, app name). Two distinct machines never
    /// produce the same `name` short of a SHA-256 collision.
    pub fn derive(machine_id: &str, app_name: &str) -> Endpoint {
        let addr = format!("{}.vm.{}.internal", machine_id, app_name);

        Endpoint {
            name: member_name(machine_id),
            client_url: format!("http://{}:{}", addr, CLIENT_PORT),
            peer_url: format!("http://{}:{}", addr, PEER_PORT),
            addr,
        }
    }
}

/// Stable member name for a machine id: truncated hex SHA-256.
pub fn member_name(machine_id: &str) -> String {
    let digest = Sha256::digest(machine_id.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Shared cluster token, identical on every member of one logical cluster.
/// The engine rejects members carrying a different token, which is the final
/// backstop against cross-cluster confusion.
pub fn cluster_token(app_name: &str) -> String {
    hex::encode(Sha256::digest(app_name.as_bytes()))
}
