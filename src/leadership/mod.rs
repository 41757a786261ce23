use crate::engine::{EngineAdmin, MemberLookup};

#[derive(Debug, thiserror::Error)]
pub enum LeadershipError {
    /// Distinguished "not yet a recognized member" condition. Callers treat
    /// this differently from a failed RPC.
    #[error("member {0} is not in the cluster membership table")]
    MemberNotFound(String),

    /// Conservative default: callers assume not-leader and take no
    /// leader-gated action.
    #[error("leadership unknown: {0}")]
    Unknown(String),
}

/// Answers "does the local member currently hold leadership?" by correlating
/// the engine's member list (local name -> member id) with the status RPC's
/// reported leader id.
pub struct LeaderOracle {
    local_name: String,
    local_client_url: String,
}

impl LeaderOracle {
    pub fn new(local_name: String, local_client_url: String) -> LeaderOracle {
        LeaderOracle {
            local_name,
            local_client_url,
        }
    }

    pub async fn is_leader(&self, engine: &dyn EngineAdmin) -> Result<bool, LeadershipError> {
        let member_id = match engine.lookup_member(&self.local_name).await {
            MemberLookup::Found(id) => id,
            MemberLookup::NotFound => {
                return Err(LeadershipError::MemberNotFound(self.local_name.clone()))
            }
            MemberLookup::TransportError(detail) => {
                return Err(LeadershipError::Unknown(detail))
            }
        };

        let status = engine
            .status(&self.local_client_url)
            .await
            .map_err(|e| LeadershipError::Unknown(e.to_string()))?;

        Ok(status.leader_id == member_id)
    }
}
