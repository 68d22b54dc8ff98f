//! HTTP Basic authentication relay.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use url::Url;

use crate::error::{Result, ServerError};
use crate::ldap::Credential;

/// Forwards credentials to a remote endpoint protected by Basic auth.
#[derive(Debug, Clone)]
pub struct BasicRelay {
    client: reqwest::Client,
    address: Url,
}

impl BasicRelay {
    /// Create a new [`BasicRelay`] targeting `address`.
    pub fn new(address: Url, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(ServerError::Relay)?;

        Ok(Self { client, address })
    }

    /// Whether the remote endpoint accepts `credential`.
    ///
    /// Only a 2xx answer counts as accepted.
    pub async fn check(&self, credential: &Credential) -> Result<bool> {
        let mut value = HeaderValue::try_from(authorization(
            &credential.name,
            &credential.password,
        ))
        .map_err(ServerError::internal)?;
        value.set_sensitive(true);

        let response = self
            .client
            .get(self.address.clone())
            .header(AUTHORIZATION, value)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(status = status.as_u16(), "relay refused credential");
        }

        Ok(status.is_success())
    }
}

/// `Authorization` header value for Basic authentication.
pub fn authorization(name: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{name}:{password}")))
}
