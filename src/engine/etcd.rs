use crate::engine::admin::{
    AlarmRecord, EngineAdmin, EngineConnector, EngineError, EngineStatus, MemberAddOutcome,
    MemberRecord,
};
use etcd_client::{AlarmAction, AlarmOptions, AlarmType, Client, ConnectOptions};
use std::future::Future;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const RPC_TIMEOUT: Duration = Duration::from_secs(5);
const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(120);

/// Production `EngineAdmin` backed by the etcd client. The inner client is
/// cheap to clone (shared channel), so each call works on its own handle.
pub struct EtcdAdmin {
    logger: slog::Logger,
    client: Client,
    root_password: Option<String>,
}

impl EtcdAdmin {
    /// Connect to the given client endpoints. When a root password is
    /// supplied, it is used for these connections and for any per-endpoint
    /// probe connection made later.
    pub async fn connect(
        logger: slog::Logger,
        endpoints: Vec<String>,
        root_password: Option<String>,
    ) -> Result<EtcdAdmin, EngineError> {
        let options = Self::connect_options(&root_password);

        let client = bounded(CONNECT_TIMEOUT, Client::connect(&endpoints, Some(options))).await?;
        slog::debug!(logger, "Connected to engine"; "endpoints" => ?endpoints);

        Ok(EtcdAdmin {
            logger,
            client,
            root_password,
        })
    }

    fn connect_options(root_password: &Option<String>) -> ConnectOptions {
        let mut options = ConnectOptions::new()
            .with_connect_timeout(CONNECT_TIMEOUT)
            .with_timeout(RPC_TIMEOUT);

        if let Some(password) = root_password {
            options = options.with_user("root", password.clone());
        }

        options
    }

    fn alarm_name(alarm: AlarmType) -> String {
        match alarm {
            AlarmType::None => "NONE".to_string(),
            AlarmType::Nospace => "NOSPACE".to_string(),
            AlarmType::Corrupt => "CORRUPT".to_string(),
        }
    }

    fn convert_member(member: &etcd_client::Member) -> MemberRecord {
        MemberRecord {
            id: member.id(),
            name: member.name().to_string(),
            peer_urls: member.peer_urls().to_vec(),
            client_urls: member.client_urls().to_vec(),
            is_learner: member.is_learner(),
        }
    }
}

/// Connector producing `EtcdAdmin` handles for whichever endpoint the caller
/// picks at runtime.
pub struct EtcdConnector {
    logger: slog::Logger,
    root_password: Option<String>,
}

impl EtcdConnector {
    pub fn new(logger: slog::Logger, root_password: Option<String>) -> EtcdConnector {
        EtcdConnector {
            logger,
            root_password,
        }
    }
}

#[async_trait::async_trait]
impl EngineConnector for EtcdConnector {
    async fn connect(&self, endpoints: Vec<String>) -> Result<Box<dyn EngineAdmin>, EngineError> {
        let admin =
            EtcdAdmin::connect(self.logger.clone(), endpoints, self.root_password.clone()).await?;

        Ok(Box::new(admin))
    }
}

/// Bound an engine RPC by a deadline, folding the elapsed case into the error
/// taxonomy.
async fn bounded<T, F>(deadline: Duration, fut: F) -> Result<T, EngineError>
where
    F: Future<Output = Result<T, etcd_client::Error>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Err(_elapsed) => Err(EngineError::Timeout),
        Ok(Err(e)) => Err(EngineError::Rpc(e.to_string())),
        Ok(Ok(value)) => Ok(value),
    }
}

#[async_trait::async_trait]
impl EngineAdmin for EtcdAdmin {
    async fn member_list(&self) -> Result<Vec<MemberRecord>, EngineError> {
        let mut client = self.client.clone();
        let resp = bounded(RPC_TIMEOUT, client.member_list()).await?;

        Ok(resp.members().iter().map(Self::convert_member).collect())
    }

    async fn member_add(&self, peer_url: &str) -> Result<MemberAddOutcome, EngineError> {
        slog::info!(self.logger, "Proposing member add"; "peer_url" => peer_url);
        let mut client = self.client.clone();
        let resp = bounded(RPC_TIMEOUT, client.member_add([peer_url.to_string()], None)).await?;

        let added_id = resp
            .member()
            .map(|m| m.id())
            .ok_or_else(|| EngineError::Rpc("member add response missing member".to_string()))?;

        Ok(MemberAddOutcome {
            added_id,
            members: resp.member_list().iter().map(Self::convert_member).collect(),
        })
    }

    async fn member_remove(&self, id: u64) -> Result<Vec<MemberRecord>, EngineError> {
        slog::info!(self.logger, "Proposing member remove"; "member_id" => id);
        let mut client = self.client.clone();
        let resp = bounded(RPC_TIMEOUT, client.member_remove(id)).await?;

        Ok(resp.members().iter().map(Self::convert_member).collect())
    }

    async fn status(&self, client_url: &str) -> Result<EngineStatus, EngineError> {
        // Status reflects the endpoint a client is connected to, so probe
        // with a short-lived connection to exactly that endpoint.
        let options = Self::connect_options(&self.root_password);
        let mut client = bounded(
            RPC_TIMEOUT,
            Client::connect([client_url.to_string()], Some(options)),
        )
        .await?;

        let resp = bounded(RPC_TIMEOUT, client.status()).await?;
        let header = resp
            .header()
            .ok_or_else(|| EngineError::Rpc("status response missing header".to_string()))?;

        Ok(EngineStatus {
            member_id: header.member_id(),
            leader_id: resp.leader(),
            db_size_bytes: resp.db_size(),
        })
    }

    async fn alarm_list(&self) -> Result<Vec<AlarmRecord>, EngineError> {
        let mut client = self.client.clone();
        let resp = bounded(
            RPC_TIMEOUT,
            client.alarm(AlarmAction::Get, AlarmType::None, None),
        )
        .await?;

        Ok(resp
            .alarms()
            .iter()
            .map(|a| AlarmRecord {
                member_id: a.member_id(),
                alarm: Self::alarm_name(a.alarm()),
            })
            .collect())
    }

    async fn alarm_disarm(&self, member_id: u64) -> Result<Vec<AlarmRecord>, EngineError> {
        slog::info!(self.logger, "Disarming alarms"; "member_id" => member_id);
        let mut client = self.client.clone();
        let mut options = AlarmOptions::new();
        options.with_member(member_id);
        let resp = bounded(
            RPC_TIMEOUT,
            client.alarm(AlarmAction::Deactivate, AlarmType::Nospace, Some(options)),
        )
        .await?;

        Ok(resp
            .alarms()
            .iter()
            .map(|a| AlarmRecord {
                member_id: a.member_id(),
                alarm: Self::alarm_name(a.alarm()),
            })
            .collect())
    }

    async fn snapshot_to_file(&self, dest: &Path) -> Result<u64, EngineError> {
        let mut client = self.client.clone();

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| EngineError::SnapshotCreate(e.to_string()))?;

        let write = async {
            let mut stream = client.snapshot().await?;
            let mut written: u64 = 0;
            while let Some(chunk) = stream.message().await? {
                if let Err(e) = file.write_all(chunk.blob()).await {
                    return Err(etcd_client::Error::IoError(e));
                }
                written += chunk.blob().len() as u64;
            }
            Ok(written)
        };

        let written = bounded(SNAPSHOT_TIMEOUT, write)
            .await
            .map_err(|e| EngineError::SnapshotCreate(e.to_string()))?;

        file.sync_all()
            .await
            .map_err(|e| EngineError::SnapshotCreate(e.to_string()))?;

        Ok(written)
    }

    async fn user_add(&self, name: &str, password: &str) -> Result<(), EngineError> {
        let mut client = self.client.clone();
        bounded(RPC_TIMEOUT, client.user_add(name, password, None)).await?;
        Ok(())
    }

    async fn user_grant_role(&self, user: &str, role: &str) -> Result<(), EngineError> {
        let mut client = self.client.clone();
        bounded(RPC_TIMEOUT, client.user_grant_role(user, role)).await?;
        Ok(())
    }

    async fn auth_enable(&self) -> Result<(), EngineError> {
        let mut client = self.client.clone();
        bounded(RPC_TIMEOUT, client.auth_enable()).await?;
        Ok(())
    }
}
