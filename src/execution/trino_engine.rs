//! Trino Execution Engine
//!
//! Speaks the Trino REST protocol: `POST /v1/statement` submits, each
//! `nextUri` is fetched once per poll, `DELETE /v1/query/{id}` cancels.

use crate::error::{CostwiseError, Result};
use crate::execution::engine::{AnalyticalEngine, EngineError, QueryHandle, QueryStatus};
use crate::execution::error_classifier::ErrorClassifier;
use crate::execution::result::RawResult;
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct TrinoResponse {
    id: String,
    #[serde(rename = "nextUri")]
    next_uri: Option<String>,
    columns: Option<Vec<TrinoColumn>>,
    data: Option<Vec<Vec<serde_json::Value>>>,
    stats: Option<TrinoStats>,
    error: Option<TrinoError>,
}

#[derive(Debug, Deserialize)]
struct TrinoStats {
    state: String,
    #[serde(rename = "processedBytes", default)]
    processed_bytes: u64,
}

#[derive(Debug, Deserialize)]
struct TrinoError {
    message: String,
    #[serde(rename = "errorType")]
    error_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TrinoColumn {
    name: String,
}

/// Accumulated state of one in-flight query.
#[derive(Debug, Default)]
struct InFlight {
    next_uri: Option<String>,
    columns: Option<Vec<String>>,
    rows: Vec<Vec<serde_json::Value>>,
    scanned_bytes: u64,
}

pub struct TrinoEngine {
    coordinator_url: String,
    catalog: String,
    schema: String,
    user: String,
    client: Client,
    classifier: ErrorClassifier,
    in_flight: DashMap<String, InFlight>,
}

impl TrinoEngine {
    pub fn new(coordinator_url: String, catalog: String, schema: String, user: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| CostwiseError::Config(format!("Failed to create HTTP client for Trino: {}", e)))?;

        Ok(Self {
            coordinator_url: coordinator_url.trim_end_matches('/').to_string(),
            catalog,
            schema,
            user,
            client,
            classifier: ErrorClassifier::new(),
            in_flight: DashMap::new(),
        })
    }

    /// Create Trino engine from environment variables
    pub fn from_env() -> Result<Self> {
        let coordinator_url =
            std::env::var("TRINO_COORDINATOR_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());
        let catalog = std::env::var("TRINO_CATALOG").unwrap_or_else(|_| "hive".to_string());
        let schema = std::env::var("TRINO_SCHEMA").unwrap_or_else(|_| "billing".to_string());
        let user = std::env::var("TRINO_USER").unwrap_or_else(|_| "costwise".to_string());

        Self::new(coordinator_url, catalog, schema, user)
    }

    fn absolute(&self, uri: &str) -> String {
        if uri.starts_with("http") {
            uri.to_string()
        } else {
            format!("{}{}", self.coordinator_url, uri)
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> EngineError {
        if e.is_timeout() || e.is_connect() {
            EngineError::Transient(format!("Trino unreachable: {}", e))
        } else {
            EngineError::Terminal(format!("Trino request failed: {}", e))
        }
    }

    async fn read_response(&self, response: reqwest::Response) -> std::result::Result<TrinoResponse, EngineError> {
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(self.classifier.from_http_status(status.as_u16(), &text));
        }
        response
            .json::<TrinoResponse>()
            .await
            .map_err(|e| EngineError::Transient(format!("Failed to parse Trino response: {}", e)))
    }

    fn failure(&self, error: &TrinoError) -> EngineError {
        self.classifier.to_engine_error(error.error_type.as_deref(), &error.message)
    }
}

#[async_trait]
impl AnalyticalEngine for TrinoEngine {
    fn name(&self) -> &'static str {
        "trino"
    }

    /// Catalog and schema travel as `X-Trino-Catalog` / `X-Trino-Schema`
    /// headers, so the SQL names tables unqualified.
    async fn submit(&self, sql: &str) -> std::result::Result<QueryHandle, EngineError> {
        let url = format!("{}/v1/statement", self.coordinator_url);
        let response = self
            .client
            .post(&url)
            .header("X-Trino-User", &self.user)
            .header("X-Trino-Catalog", &self.catalog)
            .header("X-Trino-Schema", &self.schema)
            .header("Content-Type", "text/plain")
            .body(sql.to_string())
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let body = self.read_response(response).await?;
        if let Some(error) = &body.error {
            return Err(self.failure(error));
        }

        info!(query_id = %body.id, "Trino query submitted");
        let state = InFlight {
            next_uri: body.next_uri,
            columns: body.columns.map(|cols| cols.into_iter().map(|c| c.name).collect()),
            rows: body.data.unwrap_or_default(),
            scanned_bytes: body.stats.map(|s| s.processed_bytes).unwrap_or(0),
        };
        self.in_flight.insert(body.id.clone(), state);
        Ok(QueryHandle(body.id))
    }

    async fn poll(&self, handle: &QueryHandle) -> std::result::Result<QueryStatus, EngineError> {
        let next_uri = {
            let entry = self
                .in_flight
                .get(&handle.0)
                .ok_or_else(|| EngineError::Terminal(format!("unknown query handle {}", handle)))?;
            entry.next_uri.clone()
        };

        if let Some(uri) = next_uri {
            let response = self
                .client
                .get(self.absolute(&uri))
                .header("X-Trino-User", &self.user)
                .send()
                .await
                .map_err(|e| self.transport_error(e))?;
            let body = self.read_response(response).await?;

            if let Some(error) = &body.error {
                self.in_flight.remove(&handle.0);
                return Ok(QueryStatus::Failed(self.failure(error)));
            }

            let mut entry = self
                .in_flight
                .get_mut(&handle.0)
                .ok_or_else(|| EngineError::Cancelled(format!("query {} was cancelled", handle)))?;
            if entry.columns.is_none() {
                entry.columns = body.columns.map(|cols| cols.into_iter().map(|c| c.name).collect());
            }
            if let Some(data) = body.data {
                entry.rows.extend(data);
            }
            if let Some(stats) = &body.stats {
                entry.scanned_bytes = entry.scanned_bytes.max(stats.processed_bytes);
                debug!(query_id = %handle, state = %stats.state, "Trino poll");
            }
            entry.next_uri = body.next_uri;

            if entry.next_uri.is_some() {
                let status = if entry.rows.is_empty() && entry.columns.is_none() {
                    QueryStatus::Queued
                } else {
                    QueryStatus::Running {
                        scanned_bytes: entry.scanned_bytes,
                        rows_so_far: entry.rows.len(),
                    }
                };
                return Ok(status);
            }
        }

        // No nextUri: the result is complete.
        let (_, state) = self
            .in_flight
            .remove(&handle.0)
            .ok_or_else(|| EngineError::Cancelled(format!("query {} was cancelled", handle)))?;
        Ok(QueryStatus::Succeeded(RawResult {
            columns: state.columns.unwrap_or_default(),
            rows: state.rows,
            data_scanned_bytes: state.scanned_bytes,
        }))
    }

    async fn cancel(&self, handle: &QueryHandle) -> std::result::Result<(), EngineError> {
        self.in_flight.remove(&handle.0);
        let url = format!("{}/v1/query/{}", self.coordinator_url, handle.0);
        let response = self
            .client
            .delete(&url)
            .header("X-Trino-User", &self.user)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        if !response.status().is_success() {
            warn!(query_id = %handle, status = %response.status(), "Trino cancel was not acknowledged");
        }
        info!(query_id = %handle, "Trino query cancelled");
        Ok(())
    }
}
