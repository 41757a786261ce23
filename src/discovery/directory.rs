use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddr};
use trust_dns_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

const DNS_PORT: u16 = 53;

/// One discovered peer machine. The id is the stable identifier member names
/// are derived from.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct Machine {
    pub id: String,
    pub region: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// Expected transiently right after a member starts, before DNS has
    /// propagated. Callers poll with delay rather than failing fast.
    #[error("peer discovery unavailable: {0}")]
    Unavailable(String),

    #[error("malformed machine TXT record: {0:?}")]
    InvalidRecord(String),
}

/// Resolves the current set of live peer machines for the application.
/// Pure query, no state.
#[async_trait::async_trait]
pub trait PeerDirectory: Send + Sync {
    async fn resolve_peers(&self) -> Result<Vec<Machine>, DiscoveryError>;
}

/// Production directory: a TXT lookup of `vms.<app>.internal` against the
/// internal nameserver. Each TXT string carries comma-separated
/// `"<machine-id> <region>"` entries.
pub struct DnsPeerDirectory {
    logger: slog::Logger,
    app_name: String,
    resolver: TokioAsyncResolver,
}

impl DnsPeerDirectory {
    pub fn new(
        logger: slog::Logger,
        app_name: String,
        nameserver: Option<IpAddr>,
    ) -> Result<Self, DiscoveryError> {
        let resolver = match nameserver {
            Some(ip) => {
                let mut config = ResolverConfig::new();
                config.add_name_server(NameServerConfig::new(
                    SocketAddr::new(ip, DNS_PORT),
                    Protocol::Udp,
                ));
                TokioAsyncResolver::tokio(config, ResolverOpts::default())
            }
            None => TokioAsyncResolver::tokio_from_system_conf()
                .map_err(|e| DiscoveryError::Unavailable(e.to_string()))?,
        };

        Ok(DnsPeerDirectory {
            logger,
            app_name,
            resolver,
        })
    }

    fn parse_record(record: &str) -> Result<Vec<Machine>, DiscoveryError> {
        let mut machines = Vec::new();
        for entry in record.split(',') {
            let mut parts = entry.split_whitespace();
            match (parts.next(), parts.next(), parts.next()) {
                (Some(id), Some(region), None) => machines.push(Machine {
                    id: id.to_string(),
                    region: region.to_string(),
                }),
                _ => return Err(DiscoveryError::InvalidRecord(entry.to_string())),
            }
        }
        Ok(machines)
    }
}

#[async_trait::async_trait]
impl PeerDirectory for DnsPeerDirectory {
    async fn resolve_peers(&self) -> Result<Vec<Machine>, DiscoveryError> {
        let query = format!("vms.{}.internal", self.app_name);

        let lookup = self
            .resolver
            .txt_lookup(query.clone())
            .await
            .map_err(|e| DiscoveryError::Unavailable(e.to_string()))?;

        // No ordering guarantee from DNS; the set coalesces duplicates.
        let mut machines = BTreeSet::new();
        for record in lookup.iter() {
            for machine in Self::parse_record(&record.to_string())? {
                machines.insert(machine);
            }
        }

        if machines.is_empty() {
            return Err(DiscoveryError::Unavailable(format!(
                "no machine records for {}",
                query
            )));
        }

        slog::debug!(self.logger, "Resolved {} peer machine(s)", machines.len());
        Ok(machines.into_iter().collect())
    }
}
