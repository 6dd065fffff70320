//! Venue selection and credentials.
//!
//! [`ExchangeConfig`] is a closed enum, so a value always names exactly one
//! venue. [`VenueSections`] mirrors the settings-file layout, where each venue
//! is an optional table, and is the only place the "exactly one" rule has to
//! be checked at runtime.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ExchangeError, Result};

const DEFAULT_NASH_TIMEOUT: Duration = Duration::from_millis(1000);

/// The exchanges this client can talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Nash,
    Binance,
    Coinbase,
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Venue::Nash => "nash",
            Venue::Binance => "binance",
            Venue::Coinbase => "coinbase",
        };
        f.write_str(name)
    }
}

/// Nash deployment to connect to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Sandbox,
}

impl FromStr for Environment {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "production" => Ok(Environment::Production),
            "sandbox" => Ok(Environment::Sandbox),
            other => Err(ExchangeError::Configuration(format!(
                "Invalid environment {}",
                other
            ))),
        }
    }
}

fn require(venue: Venue, field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ExchangeError::Configuration(format!(
            "{} credentials: `{}` must not be empty",
            venue, field
        )));
    }
    Ok(())
}

/// Nash API key material: the client-held secret plus the session identifier
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NashCredentials {
    pub secret: String,
    pub session: String,
}

impl NashCredentials {
    pub fn new(secret: impl Into<String>, session: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            session: session.into(),
        }
    }

    fn check(&self) -> Result<()> {
        require(Venue::Nash, "secret", &self.secret)?;
        require(Venue::Nash, "session", &self.session)
    }
}

impl fmt::Debug for NashCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NashCredentials")
            .field("secret", &"<redacted>")
            .field("session", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinanceCredentials {
    pub api_key: String,
    pub api_secret: String,
}

impl BinanceCredentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    fn check(&self) -> Result<()> {
        require(Venue::Binance, "api_key", &self.api_key)?;
        require(Venue::Binance, "api_secret", &self.api_secret)
    }
}

impl fmt::Debug for BinanceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinanceCredentials")
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// Coinbase Exchange key, its base64 secret and the passphrase chosen when
/// the key was created
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinbaseCredentials {
    pub api_key: String,
    pub api_secret: String,
    pub passphrase: String,
}

impl CoinbaseCredentials {
    pub fn new(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        passphrase: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            passphrase: passphrase.into(),
        }
    }

    fn check(&self) -> Result<()> {
        require(Venue::Coinbase, "api_key", &self.api_key)?;
        require(Venue::Coinbase, "api_secret", &self.api_secret)?;
        require(Venue::Coinbase, "passphrase", &self.passphrase)
    }
}

impl fmt::Debug for CoinbaseCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoinbaseCredentials")
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

fn default_nash_timeout() -> Duration {
    DEFAULT_NASH_TIMEOUT
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NashConfig {
    #[serde(default)]
    pub credentials: Option<NashCredentials>,
    #[serde(default)]
    pub client_id: u64,
    pub environment: Environment,
    /// Request timeout, milliseconds in the settings file
    #[serde(default = "default_nash_timeout", with = "millis")]
    pub timeout: Duration,
    #[serde(default)]
    pub affiliate_code: Option<String>,
}

impl NashConfig {
    pub fn new(credentials: Option<NashCredentials>, environment: Environment) -> Self {
        Self {
            credentials,
            client_id: 0,
            environment,
            timeout: DEFAULT_NASH_TIMEOUT,
            affiliate_code: None,
        }
    }

    pub fn with_client_id(mut self, client_id: u64) -> Self {
        self.client_id = client_id;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_affiliate_code(mut self, code: impl Into<String>) -> Self {
        self.affiliate_code = Some(code.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinanceConfig {
    #[serde(default)]
    pub sandbox: bool,
    #[serde(default)]
    pub credentials: Option<BinanceCredentials>,
}

impl BinanceConfig {
    pub fn new(sandbox: bool, credentials: Option<BinanceCredentials>) -> Self {
        Self {
            sandbox,
            credentials,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinbaseConfig {
    #[serde(default)]
    pub sandbox: bool,
    #[serde(default)]
    pub credentials: Option<CoinbaseCredentials>,
}

impl CoinbaseConfig {
    pub fn new(sandbox: bool, credentials: Option<CoinbaseCredentials>) -> Self {
        Self {
            sandbox,
            credentials,
        }
    }
}

/// Configuration selecting exactly one venue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeConfig {
    Nash(NashConfig),
    Binance(BinanceConfig),
    Coinbase(CoinbaseConfig),
}

impl ExchangeConfig {
    /// Build from the three optional venue sections. Exactly one must be set.
    pub fn from_parts(
        nash: Option<NashConfig>,
        binance: Option<BinanceConfig>,
        coinbase: Option<CoinbaseConfig>,
    ) -> Result<Self> {
        let config = match (nash, binance, coinbase) {
            (Some(nash), None, None) => ExchangeConfig::Nash(nash),
            (None, Some(binance), None) => ExchangeConfig::Binance(binance),
            (None, None, Some(coinbase)) => ExchangeConfig::Coinbase(coinbase),
            (None, None, None) => {
                return Err(ExchangeError::Configuration(
                    "Invalid config, no venue section is set".to_string(),
                ))
            }
            (nash, binance, coinbase) => {
                let set: Vec<&str> = [
                    nash.map(|_| "nash"),
                    binance.map(|_| "binance"),
                    coinbase.map(|_| "coinbase"),
                ]
                .into_iter()
                .flatten()
                .collect();
                return Err(ExchangeError::Configuration(format!(
                    "Invalid config, only one venue may be set but found: {}",
                    set.join(", ")
                )));
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn venue(&self) -> Venue {
        match self {
            ExchangeConfig::Nash(_) => Venue::Nash,
            ExchangeConfig::Binance(_) => Venue::Binance,
            ExchangeConfig::Coinbase(_) => Venue::Coinbase,
        }
    }

    pub fn is_sandbox(&self) -> bool {
        match self {
            ExchangeConfig::Nash(c) => c.environment == Environment::Sandbox,
            ExchangeConfig::Binance(c) => c.sandbox,
            ExchangeConfig::Coinbase(c) => c.sandbox,
        }
    }

    pub fn has_credentials(&self) -> bool {
        match self {
            ExchangeConfig::Nash(c) => c.credentials.is_some(),
            ExchangeConfig::Binance(c) => c.credentials.is_some(),
            ExchangeConfig::Coinbase(c) => c.credentials.is_some(),
        }
    }

    /// Structural validation only; never touches the network.
    pub fn validate(&self) -> Result<()> {
        match self {
            ExchangeConfig::Nash(c) => {
                if c.timeout.is_zero() {
                    return Err(ExchangeError::Configuration(
                        "nash timeout must be positive".to_string(),
                    ));
                }
                c.credentials.as_ref().map_or(Ok(()), NashCredentials::check)?;
            }
            ExchangeConfig::Binance(c) => {
                c.credentials.as_ref().map_or(Ok(()), BinanceCredentials::check)?;
            }
            ExchangeConfig::Coinbase(c) => {
                c.credentials.as_ref().map_or(Ok(()), CoinbaseCredentials::check)?;
            }
        }

        if !self.has_credentials() {
            debug!(
                "{} configured without credentials; only public endpoints will work",
                self.venue()
            );
        }
        Ok(())
    }
}

impl From<NashConfig> for ExchangeConfig {
    fn from(config: NashConfig) -> Self {
        ExchangeConfig::Nash(config)
    }
}

impl From<BinanceConfig> for ExchangeConfig {
    fn from(config: BinanceConfig) -> Self {
        ExchangeConfig::Binance(config)
    }
}

impl From<CoinbaseConfig> for ExchangeConfig {
    fn from(config: CoinbaseConfig) -> Self {
        ExchangeConfig::Coinbase(config)
    }
}

/// Settings-file shape: one optional table per venue
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VenueSections {
    #[serde(default)]
    pub nash: Option<NashConfig>,
    #[serde(default)]
    pub binance: Option<BinanceConfig>,
    #[serde(default)]
    pub coinbase: Option<CoinbaseConfig>,
}

impl TryFrom<VenueSections> for ExchangeConfig {
    type Error = ExchangeError;

    fn try_from(sections: VenueSections) -> Result<Self> {
        ExchangeConfig::from_parts(sections.nash, sections.binance, sections.coinbase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nash() -> NashConfig {
        NashConfig::new(
            Some(NashCredentials::new("secret", "session")),
            Environment::Sandbox,
        )
    }

    #[test]
    fn test_exactly_one_venue() {
        let config = ExchangeConfig::from_parts(Some(nash()), None, None).unwrap();
        assert_eq!(config.venue(), Venue::Nash);
        assert!(config.is_sandbox());

        let config =
            ExchangeConfig::from_parts(None, Some(BinanceConfig::new(true, None)), None).unwrap();
        assert_eq!(config.venue(), Venue::Binance);
        assert!(!config.has_credentials());
    }

    #[test]
    fn test_conflicting_venues_rejected() {
        let result = ExchangeConfig::from_parts(
            Some(nash()),
            Some(BinanceConfig::new(false, None)),
            None,
        );
        match result {
            Err(ExchangeError::Configuration(msg)) => {
                assert!(msg.contains("nash"));
                assert!(msg.contains("binance"));
            }
            other => panic!("expected configuration error, got {:?}", other),
        }

        let result = ExchangeConfig::from_parts(
            Some(nash()),
            Some(BinanceConfig::new(false, None)),
            Some(CoinbaseConfig::new(false, None)),
        );
        assert!(matches!(result, Err(ExchangeError::Configuration(_))));
    }

    #[test]
    fn test_no_venue_rejected() {
        let result = ExchangeConfig::from_parts(None, None, None);
        assert!(matches!(result, Err(ExchangeError::Configuration(_))));
    }

    #[test]
    fn test_empty_credentials_rejected() {
        let config = NashConfig::new(Some(NashCredentials::new("", "")), Environment::Production);
        let result = ExchangeConfig::from_parts(Some(config), None, None);
        assert!(matches!(result, Err(ExchangeError::Configuration(_))));

        let config = ExchangeConfig::Coinbase(CoinbaseConfig::new(
            true,
            Some(CoinbaseCredentials::new("key", "c2VjcmV0", " ")),
        ));
        assert!(matches!(
            config.validate(),
            Err(ExchangeError::Configuration(msg)) if msg.contains("passphrase")
        ));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = ExchangeConfig::Nash(nash().with_timeout(Duration::ZERO));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("sandbox".parse::<Environment>().unwrap(), Environment::Sandbox);
        assert_eq!(
            "production".parse::<Environment>().unwrap(),
            Environment::Production
        );
        assert!(matches!(
            "staging".parse::<Environment>(),
            Err(ExchangeError::Configuration(_))
        ));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = CoinbaseCredentials::new("my-key", "my-secret", "my-pass");
        let printed = format!("{:?}", creds);
        assert!(!printed.contains("my-key"));
        assert!(!printed.contains("my-secret"));
        assert!(!printed.contains("my-pass"));

        let printed = format!("{:?}", ExchangeConfig::Nash(nash()));
        assert!(!printed.contains("\"secret\""));
        assert!(!printed.contains("\"session\""));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn test_sections_from_json() {
        let sections: VenueSections = serde_json::from_str(
            r#"{
                "nash": {
                    "environment": "sandbox",
                    "timeout": 2500,
                    "credentials": { "secret": "s", "session": "t" }
                }
            }"#,
        )
        .unwrap();
        let config = ExchangeConfig::try_from(sections).unwrap();
        match config {
            ExchangeConfig::Nash(nash) => {
                assert_eq!(nash.timeout, Duration::from_millis(2500));
                assert_eq!(nash.client_id, 0);
            }
            other => panic!("unexpected venue {:?}", other),
        }
    }
}
