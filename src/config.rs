use std::fmt;
use std::time::Duration;

use crate::errors::{GatewayError, GatewayResult};
use crate::key;

pub const ACCOUNT: &str = "SNOWFLAKE_ACCOUNT";
pub const USER: &str = "SNOWFLAKE_USER";
pub const PRIVATE_KEY: &str = "SNOWFLAKE_PRIVATE_KEY";
pub const PUBLIC_KEY_FINGERPRINT: &str = "SNOWFLAKE_PUBLIC_KEY_FINGERPRINT";
pub const ROLE: &str = "SNOWFLAKE_ROLE";
pub const WAREHOUSE: &str = "SNOWFLAKE_WAREHOUSE";
pub const DATABASE: &str = "SNOWFLAKE_DATABASE";
pub const SCHEMA: &str = "SNOWFLAKE_SCHEMA";
/// Overrides `https://<account>.snowflakecomputing.com`, e.g. for private link
pub const HOST: &str = "SNOWFLAKE_HOST";
pub const STATEMENT_TIMEOUT: &str = "SNOWFLAKE_STATEMENT_TIMEOUT";
pub const POLL_INTERVAL_MS: &str = "SNOWFLAKE_POLL_INTERVAL_MS";
pub const POLL_MAX_ATTEMPTS: &str = "SNOWFLAKE_POLL_MAX_ATTEMPTS";

const REQUIRED: [&str; 3] = [ACCOUNT, USER, PRIVATE_KEY];

/// Snowflake refuses statement timeouts above seven days
pub const MAX_STATEMENT_TIMEOUT: u64 = 604_800;

/// Everything needed to authenticate against one Snowflake user
#[derive(Clone)]
pub struct Credentials {
    pub account: String,
    pub user: String,
    pub role: Option<String>,
    pub warehouse: Option<String>,
    pub database: Option<String>,
    pub schema: Option<String>,
    /// PKCS#8 DER bytes of an unencrypted RSA private key
    pub private_key: Vec<u8>,
    /// Precomputed `SHA256:...` fingerprint; derived from the key when absent
    pub fingerprint: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("account", &self.account)
            .field("user", &self.user)
            .field("role", &self.role)
            .field("warehouse", &self.warehouse)
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("private_key", &"<redacted>")
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

impl Credentials {
    /// Load credentials from the process environment
    pub fn from_env() -> GatewayResult<Credentials> {
        Credentials::from_lookup(env_lookup)
    }

    /// Load credentials from any name → value source
    ///
    /// Fails before touching the network if the account, user or private key is missing,
    /// or if the key blob is not valid base64.
    pub fn from_lookup<F>(lookup: F) -> GatewayResult<Credentials>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };

        let missing: Vec<&str> = REQUIRED
            .iter()
            .copied()
            .filter(|name| get(name).is_none())
            .collect();
        let (Some(account), Some(user), Some(blob)) = (get(ACCOUNT), get(USER), get(PRIVATE_KEY))
        else {
            return Err(GatewayError::Configuration(format!(
                "missing {} ({} are required)",
                missing.join(", "),
                REQUIRED.join(", ")
            )));
        };

        let private_key = key::decode_private_key(&blob)?;
        let fingerprint = get(PUBLIC_KEY_FINGERPRINT);
        match &fingerprint {
            Some(_) => log::info!("Using the fingerprint from {PUBLIC_KEY_FINGERPRINT}"),
            None => log::info!(
                "{PUBLIC_KEY_FINGERPRINT} not set, deriving the fingerprint from the private key"
            ),
        }

        Ok(Credentials {
            account,
            user,
            role: get(ROLE),
            warehouse: get(WAREHOUSE),
            database: get(DATABASE),
            schema: get(SCHEMA),
            private_key,
            fingerprint,
        })
    }
}

/// How long to wait between result polls, and how often to try
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        PollSettings {
            interval: Duration::from_secs(1),
            max_attempts: 30,
        }
    }
}

/// Transport settings, independent of who is authenticating
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySettings {
    /// Base URL of the SQL API host; `None` derives it from the account
    pub host: Option<String>,
    /// Server-side statement timeout in seconds
    pub statement_timeout: u64,
    pub poll: PollSettings,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        GatewaySettings {
            host: None,
            statement_timeout: 30,
            poll: PollSettings::default(),
        }
    }
}

impl GatewaySettings {
    pub fn from_env() -> GatewayResult<GatewaySettings> {
        GatewaySettings::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> GatewayResult<GatewaySettings>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = GatewaySettings::default();
        let host = lookup(HOST)
            .map(|host| host.trim().trim_end_matches('/').to_owned())
            .filter(|host| !host.is_empty());
        let statement_timeout =
            parse_number(&lookup, STATEMENT_TIMEOUT)?.unwrap_or(defaults.statement_timeout);
        if statement_timeout > MAX_STATEMENT_TIMEOUT {
            return Err(GatewayError::Configuration(format!(
                "{STATEMENT_TIMEOUT}={statement_timeout} exceeds {MAX_STATEMENT_TIMEOUT} seconds"
            )));
        }
        let interval = parse_number(&lookup, POLL_INTERVAL_MS)?
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll.interval);
        let max_attempts =
            parse_number(&lookup, POLL_MAX_ATTEMPTS)?.unwrap_or(defaults.poll.max_attempts);
        if max_attempts == 0 {
            return Err(GatewayError::Configuration(format!(
                "{POLL_MAX_ATTEMPTS} must be at least 1"
            )));
        }
        Ok(GatewaySettings {
            host,
            statement_timeout,
            poll: PollSettings {
                interval,
                max_attempts,
            },
        })
    }
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_number<F, T>(lookup: &F, name: &str) -> GatewayResult<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match lookup(name).map(|value| value.trim().to_owned()) {
        None => Ok(None),
        Some(value) if value.is_empty() => Ok(None),
        Some(value) => value.parse().map(Some).map_err(|e| {
            GatewayError::Configuration(format!("{name}={value:?} is not a valid number: {e}"))
        }),
    }
}
