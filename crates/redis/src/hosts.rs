//! Redis host descriptors and connection management.
//!
//! A layer is configured with a list of hosts; each host is either a plain
//! connection URL or a Sentinel-monitored service. Shards cache one
//! multiplexed [`ConnectionManager`] per host for commands and hand out
//! dedicated connections for blocking reads and pub/sub subscriptions.
//! Failover-class errors clear the cached manager so the next operation
//! re-resolves the master.

use std::future::Future;

use redis::aio::{Connection, ConnectionManager};
use redis::sentinel::{Sentinel, SentinelNodeConnectionInfo};
use redis::{Client, ErrorKind, RedisConnectionInfo, RedisError, RedisResult};
use tokio::sync::Mutex;

use wirebus_common::retry::{retry_with_predicate, RetryConfig};

/// One Redis connection descriptor.
#[derive(Debug, Clone)]
pub enum RedisHost {
    /// Direct connection URL, e.g. `redis://localhost:6379`
    Url(String),

    /// A Sentinel-monitored service; operations go to the current master
    Sentinel {
        /// Sentinel endpoints, e.g. `redis://sentinel-1:26379`
        sentinels: Vec<String>,
        /// The monitored service name
        service_name: String,
        /// Password for the monitored data nodes (the sentinels themselves
        /// authenticate through their endpoint URLs)
        redis_password: Option<String>,
    },
}

impl RedisHost {
    /// Shorthand for a Sentinel descriptor without data-node auth.
    pub fn sentinel(
        sentinels: impl IntoIterator<Item = impl Into<String>>,
        service_name: impl Into<String>,
    ) -> Self {
        Self::Sentinel {
            sentinels: sentinels.into_iter().map(Into::into).collect(),
            service_name: service_name.into(),
            redis_password: None,
        }
    }

    /// Set the password used when connecting to the monitored data nodes.
    /// No-op for URL hosts, which carry credentials in the URL itself.
    pub fn with_redis_password(mut self, password: impl Into<String>) -> Self {
        if let Self::Sentinel { redis_password, .. } = &mut self {
            *redis_password = Some(password.into());
        }
        self
    }

    /// Resolve a client for this host. For Sentinel descriptors this asks
    /// the Sentinel cluster for the current master, so every call observes
    /// the latest failover state.
    pub async fn client(&self) -> RedisResult<Client> {
        match self {
            Self::Url(url) => Client::open(url.as_str()),
            Self::Sentinel {
                sentinels,
                service_name,
                redis_password,
            } => {
                let mut sentinel = Sentinel::build(sentinels.clone())?;
                let node_info = SentinelNodeConnectionInfo {
                    tls_mode: None,
                    redis_connection_info: redis_password.as_ref().map(|password| {
                        RedisConnectionInfo {
                            password: Some(password.clone()),
                            ..Default::default()
                        }
                    }),
                };
                sentinel
                    .async_master_for(service_name, Some(&node_info))
                    .await
            }
        }
    }

    /// Human-readable label for logs.
    pub fn label(&self) -> String {
        match self {
            Self::Url(url) => url.clone(),
            Self::Sentinel { service_name, .. } => format!("sentinel:{service_name}"),
        }
    }
}

impl From<&str> for RedisHost {
    fn from(url: &str) -> Self {
        Self::Url(url.to_string())
    }
}

impl From<String> for RedisHost {
    fn from(url: String) -> Self {
        Self::Url(url)
    }
}

/// Errors that warrant re-resolving the master and retrying: the READONLY
/// reply a stale replica gives after failover, plus the connection-refused /
/// dropped / timeout family.
pub fn is_failover_error(err: &RedisError) -> bool {
    matches!(
        err.kind(),
        ErrorKind::ReadOnly | ErrorKind::MasterDown | ErrorKind::IoError
    ) || err.is_connection_refusal()
        || err.is_connection_dropped()
        || err.is_timeout()
}

/// One shard of a multi-host layer: a host descriptor plus its cached
/// command connection.
pub struct Shard {
    host: RedisHost,
    manager: Mutex<Option<ConnectionManager>>,
}

impl Shard {
    pub fn new(host: RedisHost) -> Self {
        Self {
            host,
            manager: Mutex::new(None),
        }
    }

    pub fn host(&self) -> &RedisHost {
        &self.host
    }

    /// The cached command connection, built on first use. Clones are cheap
    /// and multiplex over one underlying connection.
    pub async fn manager(&self) -> RedisResult<ConnectionManager> {
        let mut guard = self.manager.lock().await;
        if let Some(manager) = guard.as_ref() {
            return Ok(manager.clone());
        }

        let client = self.host.client().await?;
        let manager = ConnectionManager::new(client).await?;
        tracing::debug!(host = %self.host.label(), "Shard connection established");
        *guard = Some(manager.clone());
        Ok(manager)
    }

    /// Drop the cached connection so the next call re-resolves the host.
    /// Called after a failover-class error and on layer close.
    pub async fn rebind(&self) {
        let mut guard = self.manager.lock().await;
        if guard.take().is_some() {
            tracing::debug!(host = %self.host.label(), "Shard connection released");
        }
    }

    /// A dedicated connection for operations that monopolize their link
    /// (blocking pops, pub/sub subscriptions).
    pub async fn dedicated(&self) -> RedisResult<Connection> {
        let client = self.host.client().await?;
        client.get_async_connection().await
    }

    /// Round-trip a PING on the command connection.
    pub async fn ping(&self) -> RedisResult<()> {
        let mut conn = self.manager().await?;
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }
}

/// Instantiate one shard per configured host.
pub fn build_shards(hosts: &[RedisHost]) -> Vec<Shard> {
    hosts.iter().cloned().map(Shard::new).collect()
}

/// Run a command closure against a shard's command connection, rebinding
/// and retrying on failover-class errors up to the retry budget.
pub async fn run_on_shard<T, F, Fut>(shard: &Shard, retry: RetryConfig, op: F) -> RedisResult<T>
where
    F: Fn(ConnectionManager) -> Fut,
    Fut: Future<Output = RedisResult<T>>,
{
    retry_with_predicate(
        retry,
        || async {
            let manager = shard.manager().await?;
            match op(manager).await {
                Err(err) if is_failover_error(&err) => {
                    shard.rebind().await;
                    Err(err)
                }
                other => other,
            }
        },
        is_failover_error,
    )
    .await
}
