//! LDAP support.
//!
//! Each authentication opens its own connection, binds with the submitted
//! credential, runs one base-object search and unbinds. Nothing is pooled.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use ldap3::{
    Ldap as Ldap3, LdapConnAsync, LdapConnSettings, LdapError, Scope,
    SearchEntry,
};
use serde::Deserialize;

use crate::config::Configuration;
use crate::error::{Result, ServerError};

/// Request no attribute at all, only the DN (RFC 4511, section 4.5.1.8).
const NO_ATTRIBUTES: &str = "1.1";
const UID_PLACEHOLDER: &str = "{uid}";
/// Budget of the unbind, on top of the exchange deadline.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Result codes meaning the bind identity was refused.
const NO_SUCH_OBJECT: u32 = 32;
const INVALID_DN_SYNTAX: u32 = 34;
const INAPPROPRIATE_AUTHENTICATION: u32 = 48;
const INVALID_CREDENTIALS: u32 = 49;

/// Username and password submitted by a client.
#[derive(Clone, PartialEq, Deserialize)]
pub struct Credential {
    pub name: String,
    pub password: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("name", &self.name)
            .field("password", &"[redacted]")
            .finish()
    }
}

/// Opens connections to a directory server.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Connection>>;
}

/// A single, request-scoped directory connection.
#[async_trait]
pub trait Connection: Send {
    /// Simple bind. A refused identity is [`ServerError::InvalidCredentials`].
    async fn bind(&mut self, dn: &str, password: &str) -> Result<()>;

    /// Base-object search returning matching entry DNs, in server order.
    async fn search(&mut self, base: &str, filter: &str) -> Result<Vec<String>>;

    async fn close(&mut self) -> Result<()>;
}

/// [`Connector`] backed by [`ldap3`].
#[derive(Debug, Clone)]
pub struct Ldap3Connector {
    url: String,
    timeout: Duration,
}

impl Ldap3Connector {
    /// Create a new [`Ldap3Connector`].
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Connector for Ldap3Connector {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        let settings = LdapConnSettings::new().set_conn_timeout(self.timeout);
        let (handle, conn) = LdapConnAsync::with_settings(settings, &self.url)
            .await
            .map_err(ServerError::connection)?;
        ldap3::drive!(handle);

        Ok(Box::new(Ldap3Connection { conn }))
    }
}

struct Ldap3Connection {
    conn: Ldap3,
}

#[async_trait]
impl Connection for Ldap3Connection {
    async fn bind(&mut self, dn: &str, password: &str) -> Result<()> {
        match self.conn.simple_bind(dn, password).await.and_then(|r| r.success())
        {
            Ok(_) => Ok(()),
            Err(LdapError::LdapResult { result })
                if matches!(
                    result.rc,
                    NO_SUCH_OBJECT
                        | INVALID_DN_SYNTAX
                        | INAPPROPRIATE_AUTHENTICATION
                        | INVALID_CREDENTIALS
                ) =>
            {
                tracing::debug!(rc = result.rc, "bind refused");
                Err(ServerError::InvalidCredentials)
            },
            Err(err) => Err(ServerError::connection(err)),
        }
    }

    async fn search(&mut self, base: &str, filter: &str) -> Result<Vec<String>> {
        let result = self
            .conn
            .search(base, Scope::Base, filter, vec![NO_ATTRIBUTES])
            .await
            .and_then(|r| r.success());

        match result {
            Ok((entries, _)) => Ok(entries
                .into_iter()
                .map(|entry| SearchEntry::construct(entry).dn)
                .collect()),
            Err(LdapError::LdapResult { result })
                if result.rc == NO_SUCH_OBJECT =>
            {
                Ok(Vec::new())
            },
            Err(err) => Err(ServerError::connection(err)),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.conn.unbind().await.map_err(ServerError::connection)
    }
}

/// Directory authentication settings shared by every request.
#[derive(Clone)]
pub struct Directory {
    connector: Arc<dyn Connector>,
    base_dn: String,
    filter: String,
    user_dn_template: Option<String>,
    timeout: Duration,
}

impl Directory {
    /// Create a new [`Directory`] from the loaded configuration.
    pub fn new(config: &Configuration, connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            base_dn: config.basedn.clone(),
            filter: config.filter.clone(),
            user_dn_template: config.userdn.clone(),
            timeout: config.timeout(),
        }
    }

    /// Directory reached over [`ldap3`].
    pub fn ldap3(config: &Configuration) -> Self {
        let connector =
            Ldap3Connector::new(config.ldap_url(), config.timeout());
        Self::new(config, Arc::new(connector))
    }

    /// DN used to bind for a given username.
    pub fn user_dn(&self, name: &str) -> String {
        match &self.user_dn_template {
            Some(template) => {
                template.replace(UID_PLACEHOLDER, &ldap3::dn_escape(name))
            },
            None => name.to_owned(),
        }
    }

    /// Search filter for a given username.
    pub fn filter(&self, name: &str) -> String {
        self.filter
            .replace(UID_PLACEHOLDER, &ldap3::ldap_escape(name))
    }

    /// Bind with `credential` then return the DN of the first entry matched
    /// by the base-object search.
    ///
    /// Connect, bind and search share one deadline. The exchange runs on its
    /// own task so the connection is still closed if the caller gives up.
    pub async fn authenticate(&self, credential: &Credential) -> Result<String> {
        // Simple bind with an empty password is an anonymous bind.
        if credential.name.is_empty() || credential.password.is_empty() {
            return Err(ServerError::InvalidCredentials);
        }

        let directory = self.clone();
        let credential = credential.clone();
        tokio::spawn(async move { directory.exchange(&credential).await })
            .await
            .map_err(ServerError::connection)?
    }

    async fn exchange(&self, credential: &Credential) -> Result<String> {
        let deadline = Instant::now() + self.timeout;

        let mut conn = within(deadline, self.connector.connect()).await?;
        let outcome =
            within(deadline, self.bind_and_search(conn.as_mut(), credential))
                .await;

        match tokio::time::timeout(CLOSE_TIMEOUT, conn.close()).await {
            Ok(Ok(())) => (),
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "directory connection not closed cleanly");
            },
            Err(_) => tracing::warn!("directory unbind timed out"),
        }

        outcome
    }

    async fn bind_and_search(
        &self,
        conn: &mut dyn Connection,
        credential: &Credential,
    ) -> Result<String> {
        let dn = self.user_dn(&credential.name);
        conn.bind(&dn, &credential.password).await?;

        let mut entries = conn
            .search(&self.base_dn, &self.filter(&credential.name))
            .await?;

        if entries.len() > 1 {
            tracing::warn!(
                count = entries.len(),
                base_dn = %self.base_dn,
                "search matched several entries, using the first one"
            );
        }

        if entries.is_empty() {
            return Err(ServerError::NotFound);
        }

        Ok(entries.swap_remove(0))
    }
}

async fn within<T>(
    deadline: Instant,
    operation: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout_at(deadline, operation)
        .await
        .map_err(|_| ServerError::Timeout)?
}

/// In-memory directory used by tests.
#[cfg(test)]
pub(crate) mod mock {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Debug, Default)]
    pub struct Counters {
        pub connects: AtomicUsize,
        pub binds: AtomicUsize,
        pub closes: AtomicUsize,
        pub searches: Mutex<Vec<(String, String)>>,
    }

    impl Counters {
        pub fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }

        pub fn closes(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }

        /// `(base, filter)` of every search received.
        pub fn searches(&self) -> Vec<(String, String)> {
            self.searches.lock().unwrap().clone()
        }
    }

    /// Accepts a single bind DN and password; returns fixed entries.
    #[derive(Debug, Clone, Default)]
    pub struct MockDirectory {
        pub accept: Option<(String, String)>,
        pub entries: Vec<String>,
        /// Latency of connect, bind and search.
        pub delay: Option<Duration>,
        pub counters: Arc<Counters>,
    }

    impl MockDirectory {
        pub fn accepting(dn: &str, password: &str, entries: &[&str]) -> Self {
            Self {
                accept: Some((dn.to_owned(), password.to_owned())),
                entries: entries.iter().map(|e| e.to_string()).collect(),
                ..Default::default()
            }
        }

        pub fn rejecting() -> Self {
            Self::default()
        }
    }

    impl MockDirectory {
        async fn lag(&self) {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
        }
    }

    #[async_trait]
    impl Connector for MockDirectory {
        async fn connect(&self) -> Result<Box<dyn Connection>> {
            self.lag().await;
            self.counters.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(self.clone()))
        }
    }

    #[async_trait]
    impl Connection for MockDirectory {
        async fn bind(&mut self, dn: &str, password: &str) -> Result<()> {
            self.lag().await;
            self.counters.binds.fetch_add(1, Ordering::SeqCst);
            match &self.accept {
                Some((d, p)) if d == dn && p == password => Ok(()),
                _ => Err(ServerError::InvalidCredentials),
            }
        }

        async fn search(
            &mut self,
            base: &str,
            filter: &str,
        ) -> Result<Vec<String>> {
            self.lag().await;
            self.counters
                .searches
                .lock()
                .unwrap()
                .push((base.to_owned(), filter.to_owned()));
            Ok(self.entries.clone())
        }

        async fn close(&mut self) -> Result<()> {
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}
