//! Directory authentication.

use axum::extract::State;

use crate::AppState;
use crate::error::{Result, ServerError};
use crate::ldap::Credential;
use crate::router::Payload;
use crate::telemetry::record_authentication;

const METHOD: &str = "ldap";

/// Handler answering the DN of the authenticated entry.
pub async fn handler(
    State(state): State<AppState>,
    Payload(credential): Payload<Credential>,
) -> Result<String> {
    match state.directory.authenticate(&credential).await {
        Ok(dn) => {
            record_authentication(METHOD, "success");
            tracing::info!(dn = %dn, "directory authentication succeeded");
            Ok(dn)
        },
        Err(err) => {
            record_authentication(METHOD, outcome(&err));
            Err(err)
        },
    }
}

fn outcome(err: &ServerError) -> &'static str {
    match err {
        ServerError::InvalidCredentials => "rejected",
        ServerError::NotFound => "not_found",
        ServerError::Timeout => "timeout",
        _ => "error",
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::StatusCode;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};

    use crate::ldap::mock::MockDirectory;
    use crate::router::tests::{BASE_DN, state};
    use crate::*;

    const RELAY: &str = "http://localhost/";

    fn riemann() -> String {
        json!({ "name": "riemann", "password": "password" }).to_string()
    }

    #[tokio::test]
    async fn test_auth_handler() {
        let directory =
            MockDirectory::accepting("riemann", "password", &[BASE_DN]);
        let app = app(state(directory, RELAY));

        let response = make_request(app, Method::POST, "/auth", riemann()).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, BASE_DN.as_bytes());
    }

    #[tokio::test]
    async fn test_wrong_password() {
        let directory = MockDirectory::rejecting();
        let counters = directory.counters.clone();
        let app = app(state(directory, RELAY));

        let response = make_request(app, Method::POST, "/auth", riemann()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(!String::from_utf8_lossy(&body).contains("password"));
        assert_eq!(counters.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_directory_answers_before_request_deadline() {
        let directory = MockDirectory {
            delay: Some(Duration::from_millis(4_900)),
            ..MockDirectory::accepting("riemann", "password", &[BASE_DN])
        };
        let counters = directory.counters.clone();
        let app = app(state(directory, RELAY));

        let response = make_request(app, Method::POST, "/auth", riemann()).await;
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(counters.closes(), 1);
    }

    #[tokio::test]
    async fn test_no_entry() {
        let directory = MockDirectory::accepting("riemann", "password", &[]);
        let app = app(state(directory, RELAY));

        let response = make_request(app, Method::POST, "/auth", riemann()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_malformed_body_skips_directory() {
        let directory =
            MockDirectory::accepting("riemann", "password", &[BASE_DN]);
        let counters = directory.counters.clone();
        let app = app(state(directory, RELAY));

        for body in [
            r#"{"name": "riemann", "password": }"#,
            r#"{"name": "riemann"}"#,
            r#"{"name": 1, "password": "password"}"#,
            "",
        ] {
            let response = make_request(
                app.clone(),
                Method::POST,
                "/auth",
                body.to_owned(),
            )
            .await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);

            let body = response.into_body().collect().await.unwrap().to_bytes();
            let body: Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(body["status"], 400);
            assert!(!body["detail"].as_str().unwrap().is_empty());
        }

        assert_eq!(counters.connects(), 0);
    }
}
