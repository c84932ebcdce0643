use std::fmt;

use serde::{Deserialize, Serialize};

/// Default number of connect attempts after the first one fails.
pub const DEFAULT_CONNECT_RETRIES: u32 = 3;

/// Everything needed to open a session against a broker.
///
/// Serializes to `{ "host", "vpn", "userName", "passwordBase64" }`. The
/// password only ever leaves memory base64-encoded, and is redacted from
/// `Debug` output. The retry count is runtime-only.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionProperties {
    /// Broker host, optionally with a port.
    pub host: String,

    /// Message VPN to join.
    pub vpn: String,

    /// Client username.
    pub user_name: String,

    /// Client password.
    #[serde(rename = "passwordBase64", with = "password_base64")]
    pub password: String,

    /// Connect attempts after the first one fails to reach the broker.
    /// Refused credentials are never retried.
    #[serde(skip, default = "default_connect_retries")]
    pub connect_retries: u32,
}

impl ConnectionProperties {
    /// Creates properties with the default retry count.
    pub fn new(
        host: impl Into<String>,
        vpn: impl Into<String>,
        user_name: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            vpn: vpn.into(),
            user_name: user_name.into(),
            password: password.into(),
            connect_retries: DEFAULT_CONNECT_RETRIES,
        }
    }
}

impl fmt::Debug for ConnectionProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProperties")
            .field("host", &self.host)
            .field("vpn", &self.vpn)
            .field("user_name", &self.user_name)
            .field("password", &"<redacted>")
            .field("connect_retries", &self.connect_retries)
            .finish()
    }
}

const fn default_connect_retries() -> u32 {
    DEFAULT_CONNECT_RETRIES
}

mod password_base64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S>(password: &str, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(password))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let bytes = STANDARD.decode(encoded).map_err(de::Error::custom)?;
        String::from_utf8(bytes).map_err(de::Error::custom)
    }
}
