use std::fmt;

use serde_json::{Map, Value};

/// Identity presented to the broker.
///
/// `token` is a user auth token (usually a JWT), `key` an application or
/// overlay key. Either, both or neither may be set; anonymous sessions can
/// still subscribe to public topics.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub token: Option<String>,
    pub key: Option<String>,
}

impl Credentials {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            key: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Payload of the `whoami` handshake.
    pub fn whoami_payload(&self) -> Value {
        let mut payload = Map::new();
        if let Some(token) = &self.token {
            payload.insert("token".into(), Value::String(token.clone()));
        }
        if let Some(key) = &self.key {
            payload.insert("key".into(), Value::String(key.clone()));
        }
        Value::Object(payload)
    }

    /// Payload attached to each SUBSCRIBE.
    pub fn subscribe_payload(&self) -> Value {
        match &self.token {
            Some(token) => serde_json::json!({ "token": token }),
            None => Value::Object(Map::new()),
        }
    }

    /// Extra transport headers carrying the token.
    pub fn headers(&self) -> Vec<(String, String)> {
        self.token
            .iter()
            .map(|token| ("Authorization".to_string(), format!("cc-auth-token {token}")))
            .collect()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
