use secrecy::{ExposeSecret, SecretString};

/// Short-lived bearer credential for the backend's REST and streaming APIs.
#[derive(Clone)]
pub struct Credential {
    pub access_token: SecretString,
    pub instance_url: String,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, instance_url: impl Into<String>) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            instance_url: instance_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token.expose_secret())
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("instance_url", &self.instance_url)
            .finish_non_exhaustive()
    }
}

/// Inputs of the resource-owner password grant.
#[derive(Clone)]
pub struct PasswordGrant {
    pub client_id: String,
    pub client_secret: SecretString,
    pub username: String,
    pub password: SecretString,
    pub security_token: SecretString,
}

impl PasswordGrant {
    /// The token endpoint expects the security token appended to the password.
    pub fn combined_password(&self) -> SecretString {
        SecretString::from(format!(
            "{}{}",
            self.password.expose_secret(),
            self.security_token.expose_secret()
        ))
    }
}

impl std::fmt::Debug for PasswordGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordGrant")
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant() -> PasswordGrant {
        PasswordGrant {
            client_id: "3MVG9-client".into(),
            client_secret: SecretString::from("client-secret"),
            username: "ops@example.com".into(),
            password: SecretString::from("hunter2"),
            security_token: SecretString::from("TOKEN123"),
        }
    }

    #[test]
    fn credential_debug_redacted() {
        let cred = Credential::new("00Dxx!secret-access", "https://na1.my.salesforce.com");
        let debug = format!("{cred:?}");
        assert!(!debug.contains("secret-access"), "token leaked: {debug}");
        assert!(debug.contains("na1.my.salesforce.com"));
    }

    #[test]
    fn credential_trims_trailing_slash() {
        let cred = Credential::new("tok", "https://na1.my.salesforce.com/");
        assert_eq!(cred.instance_url, "https://na1.my.salesforce.com");
        assert_eq!(cred.bearer(), "Bearer tok");
    }

    #[test]
    fn password_is_concatenated_with_token() {
        assert_eq!(grant().combined_password().expose_secret(), "hunter2TOKEN123");
    }

    #[test]
    fn grant_debug_redacted() {
        let debug = format!("{:?}", grant());
        assert!(!debug.contains("hunter2"), "password leaked: {debug}");
        assert!(!debug.contains("client-secret"), "secret leaked: {debug}");
        assert!(!debug.contains("TOKEN123"), "token leaked: {debug}");
    }
}
