//! Basic authentication relay.

use axum::extract::State;

use crate::AppState;
use crate::error::Result;
use crate::ldap::Credential;
use crate::router::Payload;
use crate::telemetry::record_authentication;

pub const AUTHORIZED: &str = "OK";
pub const UNAUTHORIZED: &str = "Unauthorized";

const METHOD: &str = "basic";

/// Handler answering whether the relay target accepted the credential.
pub async fn handler(
    State(state): State<AppState>,
    Payload(credential): Payload<Credential>,
) -> Result<&'static str> {
    if state.relay.check(&credential).await? {
        record_authentication(METHOD, "success");
        Ok(AUTHORIZED)
    } else {
        record_authentication(METHOD, "rejected");
        Ok(UNAUTHORIZED)
    }
}
