use serde::Deserialize;

/// Attached to upstream errors whose text mentions an invalid JWT.
///
/// Snowflake answers every key-pair mismatch with the same generic message,
/// so the token itself is almost always well-formed but names the wrong key or user.
pub const INVALID_JWT_HINT: &str = "the JWT was rejected; check that the public key fingerprint \
     matches the key registered on the user (RSA_PUBLIC_KEY_FP) and that the account and user \
     identifiers are spelled as Snowflake expects";

#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Private key could not be decoded: {0}")]
    KeyDecode(String),
    #[error(transparent)]
    Token(#[from] jwt_simple::Error),
    #[error("SQL text must be a non-empty string")]
    EmptyStatement,
    #[error("Snowflake rejected the credentials (HTTP {status}): {message}{}", hint_suffix(.hint))]
    UpstreamAuth {
        status: u16,
        message: String,
        hint: Option<&'static str>,
    },
    #[error("Snowflake returned HTTP {status}: {message}{}", hint_suffix(.hint))]
    UpstreamHttp {
        status: u16,
        message: String,
        hint: Option<&'static str>,
    },
    #[error("Snowflake response had neither result data nor a statement handle")]
    UnexpectedResponse,
    #[error("Statement {handle} was not ready after {attempts} poll attempts")]
    PollTimeout { handle: String, attempts: u32 },
    #[error("Polling for statement {handle} was cancelled")]
    Cancelled { handle: String },
    #[error(transparent)]
    Request(#[from] reqwest::Error),
    #[error(transparent)]
    JSONError(#[from] serde_json::Error),
    #[error(transparent)]
    InvalidHeaderValue(#[from] reqwest::header::InvalidHeaderValue),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

fn hint_suffix(hint: &Option<&'static str>) -> String {
    match hint {
        Some(hint) => format!(" (hint: {hint})"),
        None => String::new(),
    }
}

/// The error body Snowflake sends alongside non-2xx statuses
#[derive(Deserialize, Debug)]
struct WireError {
    code: String,
    message: String,
}

impl GatewayError {
    /// Build the error for a non-2xx answer from the SQL API
    ///
    /// 401 and 403 become [`GatewayError::UpstreamAuth`], everything else
    /// [`GatewayError::UpstreamHttp`].
    pub(crate) fn upstream(status: u16, body: &str) -> GatewayError {
        let message = match serde_json::from_str::<WireError>(body) {
            Ok(wire) => format!("{}: {}", wire.code, wire.message),
            Err(_) => body.trim().to_owned(),
        };
        let hint = if mentions_invalid_jwt(body) {
            log::warn!("Snowflake rejected the JWT: {}", INVALID_JWT_HINT);
            Some(INVALID_JWT_HINT)
        } else {
            None
        };
        match status {
            401 | 403 => GatewayError::UpstreamAuth {
                status,
                message,
                hint,
            },
            _ => GatewayError::UpstreamHttp {
                status,
                message,
                hint,
            },
        }
    }

    /// The status the HTTP surface answers with for this error
    pub fn http_status(&self) -> u16 {
        match self {
            GatewayError::EmptyStatement => 400,
            _ => 500,
        }
    }
}

// Snowflake reports "JWT token is invalid." with code 390144
fn mentions_invalid_jwt(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("390144") || (lower.contains("jwt") && lower.contains("invalid"))
}
