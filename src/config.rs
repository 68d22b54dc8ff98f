//! Configuration manager for dirauth.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use url::Url;

const DEFAULT_CONFIG_PATH: &str = "config.json";
/// Plaintext LDAP port.
pub const DEFAULT_LDAP_PORT: u16 = 389;
/// Upper bound of every outbound call, in seconds.
pub const DEFAULT_TIMEOUT: u64 = 5;
/// Directory exchange plus unbind must end before the inbound deadline.
pub const MAX_TIMEOUT: u64 = 8;
const UID_PLACEHOLDER: &str = "{uid}";

/// Errors that may occur during the configuration loading process.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("URL is invalid: {0}")]
    Url(#[from] url::ParseError),
    #[error("failed to deserialize `config.json`: {0}")]
    Deserialize(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("missing or empty `{0}` entry")]
    Missing(&'static str),
    #[error("`filter` is not a valid LDAP filter")]
    Filter,
    #[error("`userdn` must contain `{{uid}}`")]
    Template,
    #[error("`timeout` must be between 1 and 8 seconds")]
    Timeout,
}

/// Structure of the `config.json` file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Configuration {
    /// URL receiving Basic-auth relayed credentials.
    pub address: String,
    /// Hostname of the directory server.
    pub fqdn: String,
    /// Directory server port.
    #[serde(default = "default_port", deserialize_with = "port_from_any")]
    pub port: u16,
    /// Search base DN.
    pub basedn: String,
    /// Search filter, `{uid}` is replaced by the escaped username.
    pub filter: String,
    /// Bind DN template, `{uid}` is replaced by the escaped username.
    #[serde(default)]
    pub userdn: Option<String>,
    /// Outbound timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_port() -> u16 {
    DEFAULT_LDAP_PORT
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT
}

/// Accept both `389` and `"389"`.
fn port_from_any<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(port) => Ok(port),
        Port::Text(text) => {
            text.trim().parse().map_err(serde::de::Error::custom)
        },
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            address: String::default(),
            fqdn: String::default(),
            port: DEFAULT_LDAP_PORT,
            basedn: String::default(),
            filter: String::default(),
            userdn: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl Configuration {
    /// Reads the `config.json` file from the specified path or the default
    /// location.
    pub fn read(path: Option<PathBuf>) -> Result<Self, Error> {
        let file_path =
            path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH).to_path_buf());

        let file = File::open(&file_path)?;
        let mut config: Configuration = serde_json::from_reader(file)?;

        config.address = normalize_url(config.address.trim())?;
        config.validate()?;

        Ok(config)
    }

    /// Reject configurations the service cannot run with.
    pub fn validate(&self) -> Result<(), Error> {
        for (field, value) in [
            ("fqdn", &self.fqdn),
            ("basedn", &self.basedn),
            ("filter", &self.filter),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Missing(field));
            }
        }

        ldap3::parse_filter(&self.filter.replace(UID_PLACEHOLDER, "x"))
            .map_err(|_| Error::Filter)?;

        if let Some(template) = &self.userdn {
            if !template.contains(UID_PLACEHOLDER) {
                return Err(Error::Template);
            }
        }

        if self.timeout == 0 || self.timeout > MAX_TIMEOUT {
            return Err(Error::Timeout);
        }

        Ok(())
    }

    /// URL of the directory server.
    pub fn ldap_url(&self) -> String {
        format!("ldap://{}:{}", self.fqdn, self.port)
    }

    /// Bound of each outbound call.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Relay target as a parsed URL.
    pub fn relay_url(&self) -> Result<Url, url::ParseError> {
        Url::parse(&self.address)
    }
}

/// Normalizes a URL string by ensuring it starts with a valid scheme (`http`
/// or `https`).
fn normalize_url(url: &str) -> Result<String, Error> {
    if url.is_empty() {
        return Err(Error::Missing("address"));
    }

    let url_with_scheme =
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("https://{url}")
        };

    let parsed_url = Url::parse(&url_with_scheme)?;
    Ok(parsed_url.to_string())
}
