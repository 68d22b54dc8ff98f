//! HTTP API.
pub mod auth;
pub mod basic;
pub mod metrics;

use axum::body::Bytes;
use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use serde::de::DeserializeOwned;

use crate::error::ServerError;

const POST_ONLY: &str = "Sorry, only POST requests are supported.";

/// JSON body decoded regardless of `Content-Type`.
///
/// Any decoding failure is a [`ServerError`], answered with `400`.
#[derive(Debug)]
pub struct Payload<T>(pub T);

impl<T, S> FromRequest<S> for Payload<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(
        req: Request,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let body = Bytes::from_request(req, state).await?;
        Ok(Payload(serde_json::from_slice(&body)?))
    }
}

/// Answer for every method but `POST`.
pub async fn method_not_allowed() -> (StatusCode, &'static str) {
    (StatusCode::METHOD_NOT_ALLOWED, POST_ONLY)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use url::Url;

    use crate::config::Configuration;
    use crate::ldap::Directory;
    use crate::ldap::mock::MockDirectory;
    use crate::relay::BasicRelay;
    use crate::*;

    pub const BASE_DN: &str = "ou=mathematicians,dc=example,dc=com";

    /// State backed by `directory` and relaying Basic auth to `address`.
    pub fn state(directory: MockDirectory, address: &str) -> AppState {
        let config = Configuration {
            address: address.into(),
            fqdn: "localhost".into(),
            basedn: BASE_DN.into(),
            filter: "(objectClass=*)".into(),
            timeout: 1,
            ..Default::default()
        };

        AppState {
            directory: Directory::new(&config, Arc::new(directory)),
            relay: BasicRelay::new(
                Url::parse(address).unwrap(),
                Duration::from_secs(1),
            )
            .unwrap(),
            metrics: None,
        }
    }

    #[tokio::test]
    async fn test_get_is_not_allowed() {
        let app = app(state(MockDirectory::rejecting(), "http://localhost/"));

        for path in ["/auth", "/basic"] {
            let response =
                make_request(app.clone(), Method::GET, path, String::new())
                    .await;
            assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        }
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let app = app(state(MockDirectory::rejecting(), "http://localhost/"));

        let response =
            make_request(app, Method::POST, "/login", String::new()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_metrics_without_recorder() {
        let app = app(state(MockDirectory::rejecting(), "http://localhost/"));

        let response =
            make_request(app, Method::GET, "/metrics", String::new()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
