use serde::{Deserialize, Serialize};

/// Application settings.
///
/// Every field has a default, so a partial document deserializes:
///
/// ```
/// let options: seasaw::AppOptions = serde_json::from_str(r#"{"port": 8080}"#).unwrap();
/// assert_eq!(options.port, 8080);
/// assert_eq!(options.prefix, "");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppOptions {
    /// Port to listen on; `0` picks a free one.
    pub port: u16,
    /// Mount prefix applied to this application's routes when it is grouped into another.
    pub prefix: String,
    pub hostname: String,
    /// Maximum level of the log subscriber installed by `App::start`.
    pub log_level: String,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self { port: 3000, prefix: String::new(), hostname: "0.0.0.0".into(), log_level: "info".into() }
    }
}

impl AppOptions {
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    #[must_use]
    pub fn log_level(mut self, log_level: impl Into<String>) -> Self {
        self.log_level = log_level.into();
        self
    }
}
