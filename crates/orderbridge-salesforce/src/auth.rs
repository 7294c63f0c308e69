use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::{debug, warn};

use orderbridge_core::backend::CredentialProvider;
use orderbridge_core::errors::{BridgeError, Operation};
use orderbridge_core::security::{Credential, PasswordGrant};

use crate::http::transport_error;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    instance_url: String,
}

#[derive(Deserialize)]
struct OAuthErrorBody {
    error: Option<String>,
    error_description: Option<String>,
}

/// Resource-owner password grant against the org's token endpoint.
/// Every call is a fresh round trip; nothing is cached.
pub struct PasswordGrantAuthenticator {
    client: reqwest::Client,
    token_url: String,
    grant: PasswordGrant,
    timeout: Duration,
}

impl PasswordGrantAuthenticator {
    pub fn new(
        client: reqwest::Client,
        token_url: impl Into<String>,
        grant: PasswordGrant,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            token_url: token_url.into(),
            grant,
            timeout,
        }
    }
}

#[async_trait]
impl CredentialProvider for PasswordGrantAuthenticator {
    async fn authenticate(&self) -> Result<Credential, BridgeError> {
        let password = self.grant.combined_password();
        let resp = self
            .client
            .post(&self.token_url)
            .timeout(self.timeout)
            .form(&[
                ("grant_type", "password"),
                ("client_id", self.grant.client_id.as_str()),
                ("client_secret", self.grant.client_secret.expose_secret()),
                ("username", self.grant.username.as_str()),
                ("password", password.expose_secret()),
            ])
            .send()
            .await
            .map_err(|e| transport_error(Operation::Authenticate, e, self.timeout))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let detail = match serde_json::from_str::<OAuthErrorBody>(&body) {
                Ok(OAuthErrorBody {
                    error_description: Some(desc),
                    ..
                }) => desc,
                Ok(OAuthErrorBody { error: Some(e), .. }) => e,
                _ => body,
            };
            warn!(status = status.as_u16(), error = %detail, "token request rejected");
            return Err(BridgeError::from_status(
                Operation::Authenticate,
                status.as_u16(),
                detail,
            ));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| BridgeError::AuthFailure(format!("unreadable token response: {e}")))?;
        debug!(instance_url = %token.instance_url, "authenticated");
        Ok(Credential::new(token.access_token, token.instance_url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn grant() -> PasswordGrant {
        PasswordGrant {
            client_id: "3MVG9client".into(),
            client_secret: SecretString::from("s3cret"),
            username: "ops@example.com".into(),
            password: SecretString::from("pw"),
            security_token: SecretString::from("TOK"),
        }
    }

    fn authenticator(server: &MockServer) -> PasswordGrantAuthenticator {
        PasswordGrantAuthenticator::new(
            reqwest::Client::new(),
            format!("{}/services/oauth2/token", server.uri()),
            grant(),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn password_grant_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/services/oauth2/token"))
            .and(body_string_contains("grant_type=password"))
            .and(body_string_contains("password=pwTOK"))
            .and(body_string_contains("client_id=3MVG9client"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "00Dxx!token",
                "instance_url": "https://na1.my.salesforce.com",
                "token_type": "Bearer",
                "issued_at": "1700000000000"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let cred = authenticator(&server).authenticate().await.unwrap();
        assert_eq!(cred.instance_url, "https://na1.my.salesforce.com");
        assert_eq!(cred.bearer(), "Bearer 00Dxx!token");
    }

    #[tokio::test]
    async fn every_call_is_a_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "t",
                "instance_url": "https://na1.my.salesforce.com"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let auth = authenticator(&server);
        auth.authenticate().await.unwrap();
        auth.authenticate().await.unwrap();
    }

    #[tokio::test]
    async fn rejected_grant_carries_description() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "authentication failure"
            })))
            .mount(&server)
            .await;

        let err = authenticator(&server).authenticate().await.unwrap_err();
        assert!(matches!(err, BridgeError::AuthFailure(_)));
        assert!(err.to_string().contains("authentication failure"), "{err}");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_auth_failure() {
        let auth = PasswordGrantAuthenticator::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9/services/oauth2/token",
            grant(),
            Duration::from_secs(2),
        );
        let err = auth.authenticate().await.unwrap_err();
        assert!(matches!(err, BridgeError::AuthFailure(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn slow_endpoint_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let auth = PasswordGrantAuthenticator::new(
            reqwest::Client::new(),
            format!("{}/services/oauth2/token", server.uri()),
            grant(),
            Duration::from_millis(200),
        );
        let err = auth.authenticate().await.unwrap_err();
        assert!(err.to_string().contains("timed out"), "{err}");
    }
}
