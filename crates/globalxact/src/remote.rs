//! The remote session seam.
//!
//! The coordinator drives remote prepared transactions through a narrow trait
//! so that live sessions (connections owned by the caller) and recovery
//! workers (connections reopened from recorded URLs) stay interchangeable,
//! and tests can script a remote without a server. The production
//! implementation wraps the blocking `postgres` client; per-session work runs
//! in the host session's thread, so nothing here is async.

use std::fmt;

use anyhow::Context as _;
use postgres::config::Host;
use postgres::{Client, Config, NoTls, SimpleQueryMessage};

/// Identity of a remote database as recorded in action lines.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub dbname: String,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "postgresql://{}:{}/{}", self.host, self.port, self.dbname)
    }
}

/// One participating remote session.
///
/// Implementations run exactly the SQL the coordinator hands them and report
/// success or failure; retry and logging policy stay with the coordinator.
pub trait RemoteSession: Send {
    /// The identity recorded in the set file for this session.
    fn endpoint(&self) -> Endpoint;

    /// Run a command statement. No result rows are expected.
    fn execute(&mut self, sql: &str) -> anyhow::Result<()>;

    /// Run a query and report how many rows came back.
    fn query_rows(&mut self, sql: &str) -> anyhow::Result<usize>;

    /// Whether the underlying connection is known to be unusable.
    fn is_broken(&self) -> bool;

    /// Re-establish a broken connection.
    fn reset(&mut self) -> anyhow::Result<()>;
}

/// Opens remote sessions from recorded connection URLs during recovery.
pub trait Connector: Send + Sync {
    fn connect(&self, url: &str) -> anyhow::Result<Box<dyn RemoteSession>>;
}

/// Blocking session over the `postgres` crate.
pub struct PgSession {
    client: Client,
    url: String,
    endpoint: Endpoint,
}

impl PgSession {
    pub fn connect(url: &str) -> anyhow::Result<PgSession> {
        let config: Config = url
            .parse()
            .with_context(|| format!("parse connection string {url}"))?;
        let endpoint = endpoint_of(&config)
            .ok_or_else(|| anyhow::anyhow!("connection string {url} names no host"))?;
        let client = config
            .connect(NoTls)
            .with_context(|| format!("connect to {endpoint}"))?;
        Ok(PgSession {
            client,
            url: url.to_string(),
            endpoint,
        })
    }
}

fn endpoint_of(config: &Config) -> Option<Endpoint> {
    let host = match config.get_hosts().first()? {
        Host::Tcp(host) => host.clone(),
        #[cfg(unix)]
        Host::Unix(path) => path.display().to_string(),
    };
    let port = config.get_ports().first().copied().unwrap_or(5432);
    let dbname = config.get_dbname().unwrap_or("postgres").to_string();
    Some(Endpoint { host, port, dbname })
}

impl RemoteSession for PgSession {
    fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }

    fn execute(&mut self, sql: &str) -> anyhow::Result<()> {
        self.client
            .batch_execute(sql)
            .with_context(|| format!("execute on {}", self.endpoint))
    }

    fn query_rows(&mut self, sql: &str) -> anyhow::Result<usize> {
        let messages = self
            .client
            .simple_query(sql)
            .with_context(|| format!("query on {}", self.endpoint))?;
        Ok(messages
            .iter()
            .filter(|m| matches!(m, SimpleQueryMessage::Row(_)))
            .count())
    }

    fn is_broken(&self) -> bool {
        self.client.is_closed()
    }

    fn reset(&mut self) -> anyhow::Result<()> {
        let config: Config = self.url.parse()?;
        self.client = config
            .connect(NoTls)
            .with_context(|| format!("reconnect to {}", self.endpoint))?;
        Ok(())
    }
}

/// Default connector used by recovery workers.
pub struct PgConnector;

impl Connector for PgConnector {
    fn connect(&self, url: &str) -> anyhow::Result<Box<dyn RemoteSession>> {
        Ok(Box::new(PgSession::connect(url)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_renders_as_connection_url() {
        let endpoint = Endpoint {
            host: "remote-a".into(),
            port: 5432,
            dbname: "db1".into(),
        };
        assert_eq!(endpoint.to_string(), "postgresql://remote-a:5432/db1");
    }

    #[test]
    fn endpoint_from_config() {
        let config: Config = "postgresql://remote-b:5433/orders".parse().unwrap();
        let endpoint = endpoint_of(&config).unwrap();
        assert_eq!(endpoint.host, "remote-b");
        assert_eq!(endpoint.port, 5433);
        assert_eq!(endpoint.dbname, "orders");
    }
}
