use std::future::Future;

use chrono::Utc;
use futures::{StreamExt, TryStreamExt};
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{Credentials, PollSettings};
use crate::errors::{GatewayError, GatewayResult};
use crate::response::{Column, StatementResult};
use crate::{jwt, key, SqlGateway};

/// What to run, and optionally where
///
/// Fields left unset fall back to the defaults in [`Credentials`];
/// if those are unset too, Snowflake uses the user's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatementRequest {
    pub sql: String,
    /// Server-side timeout in seconds
    pub timeout: Option<u64>,
    pub database: Option<String>,
    pub schema: Option<String>,
    pub warehouse: Option<String>,
    pub role: Option<String>,
}

impl StatementRequest {
    pub fn new(sql: &str) -> StatementRequest {
        StatementRequest {
            sql: sql.to_owned(),
            ..Default::default()
        }
    }
}

/// A statement ready to be sent (created by [`SqlGateway`])
///
/// Every call to [`Statement::query`] mints a fresh token and a fresh HTTP client;
/// nothing is shared between calls.
#[derive(Debug, Clone)]
pub struct Statement {
    host: String,
    wire: WireStatement,
    uuid: uuid::Uuid,
    credentials: Credentials,
    poll: PollSettings,
}

impl Statement {
    /// Create a new statement from a request and a gateway
    ///
    /// Usually you will want to use [`SqlGateway::prepare`] or [`SqlGateway::execute`]
    /// instead of this method but the difference is merely ergonomic.
    pub fn new(request: StatementRequest, gateway: &SqlGateway) -> Statement {
        let credentials = &gateway.credentials;
        let settings = &gateway.settings;
        Statement {
            host: settings.host.clone().unwrap_or_else(|| {
                format!(
                    "https://{}.snowflakecomputing.com",
                    credentials.account.to_ascii_lowercase()
                )
            }),
            wire: WireStatement {
                statement: request.sql,
                timeout: request.timeout.unwrap_or(settings.statement_timeout),
                database: request.database.or_else(|| credentials.database.clone()),
                schema: request.schema.or_else(|| credentials.schema.clone()),
                warehouse: request.warehouse.or_else(|| credentials.warehouse.clone()),
                role: request.role.or_else(|| credentials.role.clone()),
            },
            uuid: uuid::Uuid::new_v4(),
            credentials: credentials.clone(),
            poll: settings.poll,
        }
    }

    /// Set the Snowflake-side timeout for the statement
    ///
    /// The client-side timeout will automatically be set to this value plus 15 seconds
    pub fn with_timeout(mut self, timeout_seconds: u64) -> Statement {
        self.wire.timeout = timeout_seconds;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/api/v2/statements", self.host)
    }

    pub(crate) fn client(&self) -> GatewayResult<reqwest::Client> {
        use reqwest::header::*;
        let private_key = key::import_private_key(&self.credentials.private_key)?;
        let (fingerprint, _) = key::resolve_fingerprint(&self.credentials, &private_key)?;
        let token = jwt::create_token(
            &jwt::key_pair(&private_key)?,
            &self.credentials.account,
            &self.credentials.user,
            &fingerprint,
            Utc::now(),
        )?;

        // The token goes into the header byte for byte
        let mut authorization = HeaderValue::from_str(&format!("Bearer {token}"))?;
        authorization.set_sensitive(true);

        let mut headers = HeaderMap::with_capacity(5);
        headers.append(CONTENT_TYPE, "application/json".parse()?);
        headers.append(AUTHORIZATION, authorization);
        headers.append(
            "X-Snowflake-Authorization-Token-Type",
            "KEYPAIR_JWT".parse()?,
        );
        headers.append(ACCEPT, "application/json".parse()?);
        headers.append(
            USER_AGENT,
            concat!(env!("CARGO_PKG_NAME"), '/', env!("CARGO_PKG_VERSION")).parse()?,
        );

        Ok(reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(self.wire.timeout.saturating_add(15)))
            .build()?)
    }

    /// Run the statement and wait for its result
    ///
    /// If Snowflake does not finish synchronously, the statement handle is polled
    /// until data arrives or the poll budget runs out.
    pub async fn query(&self) -> GatewayResult<StatementResult> {
        self.query_until(std::future::pending()).await
    }

    /// Like [`Statement::query`], but gives up polling as soon as `cancel` resolves
    ///
    /// A cancelled statement is also cancelled on the Snowflake side, best effort.
    pub async fn query_until<C>(&self, cancel: C) -> GatewayResult<StatementResult>
    where
        C: Future<Output = ()>,
    {
        if self.wire.statement.trim().is_empty() {
            return Err(GatewayError::EmptyStatement);
        }
        let client = self.client()?;
        let submitted = self.submit(&client).await?;

        let complete = if submitted.data.is_some() {
            log::debug!("Statement {} completed synchronously", self.uuid);
            submitted
        } else if let Some(handle) = submitted.statement_handle.clone() {
            log::debug!(
                "Statement {} accepted as {}: {}",
                self.uuid,
                handle,
                submitted.message.as_deref().unwrap_or("no message")
            );
            tokio::select! {
                polled = self.poll_until_ready(&client, &handle) => polled?,
                _ = cancel => {
                    log::warn!("Polling for statement {handle} cancelled");
                    self.cancel(&client, &handle).await;
                    return Err(GatewayError::Cancelled { handle: handle.clone() });
                }
            }
        } else {
            return Err(GatewayError::UnexpectedResponse);
        };

        self.collect(&client, complete).await
    }

    async fn submit(&self, client: &reqwest::Client) -> GatewayResult<WireStatementResponse> {
        log::debug!(
            "Submitting statement {} to {}",
            self.uuid,
            self.host
        );
        log::debug!(
            "Sending statement: {}",
            serde_json::to_string_pretty(&self.wire)?
        );
        let response = client
            .post(format!(
                "{}?nullable=true&requestId={}",
                self.endpoint(),
                self.uuid
            ))
            .json(&self.wire)
            .send()
            .await
            .map_err(|e| {
                log_transport_error(&self.host, &e);
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            return Err(GatewayError::upstream(status.as_u16(), &body));
        }
        Ok(response.json::<WireStatementResponse>().await?)
    }

    /// Poll `handle` until it carries data, at most `max_attempts` times
    ///
    /// The first poll goes out immediately, later ones `interval` apart.
    async fn poll_until_ready(
        &self,
        client: &reqwest::Client,
        handle: &str,
    ) -> GatewayResult<WireStatementResponse> {
        let url = format!("{}/{}", self.endpoint(), handle);
        let PollSettings {
            interval,
            max_attempts,
        } = self.poll;
        for attempt in 1..=max_attempts {
            if attempt > 1 {
                tokio::time::sleep(interval).await;
            }
            match self.poll_once(client, &url).await? {
                Some(ready) => {
                    log::debug!("Statement {handle} ready after {attempt} poll(s)");
                    return Ok(ready);
                }
                None => log::debug!(
                    "Statement {handle} not ready (attempt {attempt}/{max_attempts})"
                ),
            }
        }
        log::warn!("Statement {handle} still not ready after {max_attempts} polls, giving up");
        Err(GatewayError::PollTimeout {
            handle: handle.to_owned(),
            attempts: max_attempts,
        })
    }

    /// `Ok(None)` means "not ready yet, try again"
    async fn poll_once(
        &self,
        client: &reqwest::Client,
        url: &str,
    ) -> GatewayResult<Option<WireStatementResponse>> {
        let response = match client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                log_transport_error(&self.host, &e);
                return Ok(None);
            }
        };
        let status = response.status();
        if !status.is_success() {
            if is_permanent_failure(status) {
                let body = response.text().await?;
                return Err(GatewayError::upstream(status.as_u16(), &body));
            }
            log::debug!("Poll answered HTTP {status}");
            return Ok(None);
        }
        match response.json::<WireStatementResponse>().await {
            Ok(body) if body.data.is_some() => Ok(Some(body)),
            Ok(_) => Ok(None),
            Err(e) => {
                log::warn!("Could not decode poll response: {e}");
                Ok(None)
            }
        }
    }

    async fn cancel(&self, client: &reqwest::Client, handle: &str) {
        let url = format!("{}/{}/cancel", self.endpoint(), handle);
        match client.post(url).send().await {
            Ok(response) if response.status().is_success() => {
                log::info!("Cancelled statement {handle} on Snowflake")
            }
            Ok(response) => log::warn!(
                "Snowflake refused to cancel statement {handle}: HTTP {}",
                response.status()
            ),
            Err(e) => log_transport_error(&self.host, &e),
        }
    }

    /// Normalize a completed response, fetching any further partitions
    ///
    /// Partitions are fetched in order, with one request in flight at a time.
    async fn collect(
        &self,
        client: &reqwest::Client,
        response: WireStatementResponse,
    ) -> GatewayResult<StatementResult> {
        let meta_data = response.result_set_meta_data.unwrap_or_default();
        let mut rows = response.data.unwrap_or_default();
        let num_partitions = meta_data.partition_info.len();
        if num_partitions > 1 {
            let handle = response
                .statement_handle
                .ok_or(GatewayError::UnexpectedResponse)?;
            let url = format!("{}/{}", self.endpoint(), handle);
            log::debug!("Statement {handle} has {num_partitions} partitions");
            let partition_futures =
                (1..num_partitions).map(|index| self.partition(client, &url, index));
            let remaining: Vec<Vec<Vec<Value>>> = futures::stream::iter(partition_futures)
                .buffered(1)
                .try_collect()
                .await?;
            rows.extend(remaining.into_iter().flatten());
        }
        Ok(StatementResult::new(meta_data.row_type, rows))
    }

    async fn partition(
        &self,
        client: &reqwest::Client,
        url: &str,
        index: usize,
    ) -> GatewayResult<Vec<Vec<Value>>> {
        let response = client
            .get(url)
            .query(&[("partition", index)])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            return Err(GatewayError::upstream(status.as_u16(), &body));
        }
        Ok(response.json::<WirePartitionResponse>().await?.data)
    }
}

/// 4xx answers while polling mean the statement will never complete
///
/// 408 and 429 are the exceptions, they only say "not now".
fn is_permanent_failure(status: reqwest::StatusCode) -> bool {
    use reqwest::StatusCode;
    status.is_client_error()
        && status != StatusCode::REQUEST_TIMEOUT
        && status != StatusCode::TOO_MANY_REQUESTS
}

fn log_transport_error(host: &str, e: &reqwest::Error) {
    if e.is_connect() {
        log::warn!("Snowflake host {host} is unreachable: {e}");
    } else if e.is_timeout() {
        log::warn!("Request to Snowflake host {host} timed out: {e}");
    } else {
        log::warn!("Request to Snowflake host {host} failed: {e}");
    }
}


//
// Wire types
//

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireStatementMetaData {
    #[serde(default)]
    pub row_type: Vec<Column>,
    // Only the number of partitions matters
    #[serde(default)]
    pub partition_info: Vec<IgnoredAny>,
}

#[derive(Deserialize, Debug)]
struct WirePartitionResponse {
    data: Vec<Vec<Value>>,
}

#[derive(Serialize, Debug, Clone)]
struct WireStatement {
    statement: String,
    timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    database: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warehouse: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct WireStatementResponse {
    result_set_meta_data: Option<WireStatementMetaData>,
    data: Option<Vec<Vec<Value>>>,
    statement_handle: Option<String>,
    message: Option<String>,
}
