//! A gateway to Snowflake's SQL API using key-pair (JWT) authentication.
//!
//! Every call is self-contained: the private key is imported, the public key fingerprint
//! resolved, a fresh JWT minted, and the statement submitted over HTTPS. Statements that
//! Snowflake does not finish synchronously are polled by handle until data arrives or the
//! poll budget is spent. Results come back in one uniform shape, [`StatementResult`].
//!
//! Example usage:
//!
//! ```rust,no_run
//! use snowflake_sql_gateway::{GatewayError, SqlGateway, StatementRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), GatewayError> {
//!     // SNOWFLAKE_ACCOUNT, SNOWFLAKE_USER, SNOWFLAKE_PRIVATE_KEY, ...
//!     let gateway = SqlGateway::from_env()?;
//!
//!     let result = gateway.prepare("SELECT 1 AS one").query().await?;
//!     assert_eq!(result.row_count, 1);
//!     println!("{}", result.columns[0].name);
//!
//!     // Per-statement overrides of the configured defaults
//!     let mut request = StatementRequest::new("SELECT CURRENT_ROLE()");
//!     request.role = Some("REPORTING".into());
//!     let result = gateway.execute(request).await?;
//!     println!("{:?}", result.json_objects());
//!
//!     Ok(())
//! }
//! ```
//!
//! The same capability is exposed over HTTP by [`server::router`].

pub mod config;
mod errors;
pub mod jwt;
pub mod key;
mod response;
pub mod server;
mod statement;

pub use config::{Credentials, GatewaySettings, PollSettings};
pub use errors::{GatewayError, GatewayResult, INVALID_JWT_HINT};
pub use response::{Column, StatementResult};
pub use statement::{Statement, StatementRequest};

/// Credentials plus transport settings; cheap to build, meant to be built per call
#[derive(Debug, Clone)]
pub struct SqlGateway {
    pub credentials: Credentials,
    pub settings: GatewaySettings,
}

impl SqlGateway {
    /// Read credentials and settings from the process environment
    pub fn from_env() -> GatewayResult<SqlGateway> {
        Ok(SqlGateway {
            credentials: Credentials::from_env()?,
            settings: GatewaySettings::from_env()?,
        })
    }

    /// Read credentials and settings from any name → value source
    pub fn from_lookup<F>(lookup: F) -> GatewayResult<SqlGateway>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(SqlGateway {
            credentials: Credentials::from_lookup(&lookup)?,
            settings: GatewaySettings::from_lookup(&lookup)?,
        })
    }

    pub fn prepare(&self, sql: &str) -> Statement {
        Statement::new(StatementRequest::new(sql), self)
    }

    /// Run `request` and wait for its result
    pub async fn execute(&self, request: StatementRequest) -> GatewayResult<StatementResult> {
        Statement::new(request, self).query().await
    }
}
