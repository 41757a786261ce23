use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;
use tokio::time::Duration;

const DEFAULT_BACKUP_INTERVAL: Duration = Duration::from_secs(60 * 60);
const DEFAULT_DATA_DIR: &str = "/data";
const DEFAULT_S3_BUCKET: &str = "etcd-steward-backups";

/// Strategy for determining the authoritative "last successful backup" time.
/// The two are never mixed within one deployment.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BackupStrategy {
    /// The object store's own last-modified metadata is authoritative.
    RemoteMetadata,
    /// A locally persisted timestamp file is authoritative.
    LocalTimestamp,
}

/// JWT token material for the engine's auth-token configuration. Only
/// considered present when all three pieces are set.
#[derive(Clone, Debug)]
pub struct JwtMaterial {
    pub public_cert: String,
    pub private_cert: String,
    pub sign_method: String,
}

/// Everything this process reads from its environment, captured once at
/// entry. Components receive values from here; none of them touch the
/// ambient environment themselves.
#[derive(Clone, Debug)]
pub struct Settings {
    pub app_name: String,
    pub machine_id: String,
    pub data_dir: PathBuf,
    pub backup_interval: Duration,
    pub schedule_offset: Duration,
    pub backup_strategy: BackupStrategy,
    pub s3_bucket: String,
    pub s3_prefix: String,
    pub backups_enabled: bool,
    pub jwt_material: Option<JwtMaterial>,
    pub root_password: Option<String>,
    /// Internal nameserver to resolve peers against. None means the system
    /// resolver configuration.
    pub nameserver: Option<IpAddr>,
    /// Best-effort formation race mitigation: refuse to decide new-vs-existing
    /// until at least this many distinct peers are discoverable. 0 disables
    /// the gate.
    pub minimum_peers: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("required variable {0} is not set")]
    MissingRequired(&'static str),
    #[error("could not parse {name}={value}: {reason}")]
    Unparsable {
        name: &'static str,
        value: String,
        reason: String,
    },
}

impl Settings {
    pub fn from_env() -> Result<Self, SettingsError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Split out from `from_env` so tests can supply their own environment.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, SettingsError> {
        let app_name = required(vars, "APP_NAME")?;
        let machine_id = required(vars, "MACHINE_ID")?;

        let backup_interval = duration_or(vars, "BACKUP_INTERVAL", DEFAULT_BACKUP_INTERVAL)?;
        let schedule_offset = duration_or(vars, "SCHEDULE_OFFSET", Duration::ZERO)?;

        let backup_strategy = match vars.get("BACKUP_STRATEGY").map(String::as_str) {
            None | Some("remote") => BackupStrategy::RemoteMetadata,
            Some("local") => BackupStrategy::LocalTimestamp,
            Some(other) => {
                return Err(SettingsError::Unparsable {
                    name: "BACKUP_STRATEGY",
                    value: other.to_string(),
                    reason: "expected 'remote' or 'local'".to_string(),
                })
            }
        };

        let nameserver = match vars.get("NAMESERVER") {
            None => None,
            Some(raw) => Some(raw.parse().map_err(|e| SettingsError::Unparsable {
                name: "NAMESERVER",
                value: raw.clone(),
                reason: format!("{}", e),
            })?),
        };

        let minimum_peers = match vars.get("MINIMUM_PEERS") {
            None => 0,
            Some(raw) => raw.parse().map_err(|e| SettingsError::Unparsable {
                name: "MINIMUM_PEERS",
                value: raw.clone(),
                reason: format!("{}", e),
            })?,
        };

        let jwt_material = match (
            vars.get("ETCD_JWT_PUBLIC"),
            vars.get("ETCD_JWT_PRIVATE"),
            vars.get("ETCD_JWT_SIGN_METHOD"),
        ) {
            (Some(public), Some(private), Some(method))
                if !public.is_empty() && !private.is_empty() && !method.is_empty() =>
            {
                Some(JwtMaterial {
                    public_cert: public.clone(),
                    private_cert: private.clone(),
                    sign_method: method.clone(),
                })
            }
            _ => None,
        };

        let s3_prefix = vars
            .get("S3_PREFIX")
            .cloned()
            .unwrap_or_else(|| app_name.clone());

        Ok(Settings {
            s3_prefix,
            app_name,
            machine_id,
            data_dir: vars
                .get("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            backup_interval,
            schedule_offset,
            backup_strategy,
            s3_bucket: vars
                .get("S3_BUCKET")
                .cloned()
                .unwrap_or_else(|| DEFAULT_S3_BUCKET.to_string()),
            backups_enabled: aws_credentials_present(vars),
            jwt_material,
            root_password: vars.get("ETCD_ROOT_PASSWORD").cloned().filter(|p| !p.is_empty()),
            nameserver,
            minimum_peers,
        })
    }
}

/// Presence of credentials gates whether backups run at all. Either OIDC
/// (region + role ARN) or static keys (key id + secret + region) counts.
fn aws_credentials_present(vars: &HashMap<String, String>) -> bool {
    let set = |name: &str| vars.get(name).map(|v| !v.is_empty()).unwrap_or(false);

    if set("AWS_REGION") && set("AWS_ROLE_ARN") {
        return true;
    }

    set("AWS_ACCESS_KEY_ID") && set("AWS_SECRET_ACCESS_KEY") && set("AWS_REGION")
}

fn required(vars: &HashMap<String, String>, name: &'static str) -> Result<String, SettingsError> {
    match vars.get(name) {
        Some(v) if !v.is_empty() => Ok(v.clone()),
        _ => Err(SettingsError::MissingRequired(name)),
    }
}

fn duration_or(
    vars: &HashMap<String, String>,
    name: &'static str,
    default: Duration,
) -> Result<Duration, SettingsError> {
    match vars.get(name) {
        None => Ok(default),
        Some(raw) => humantime::parse_duration(raw)
            .map(Duration::from)
            .map_err(|e| SettingsError::Unparsable {
                name,
                value: raw.clone(),
                reason: format!("{}", e),
            }),
    }
}
