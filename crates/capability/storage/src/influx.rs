//! InfluxDB 1.x HTTP 写入实现
//!
//! - `POST /write?db=..&precision=ms`：line protocol 批量写入
//! - `GET /ping`：启动时探活
//! - `POST /query?q=CREATE DATABASE ..`：可选建库

use crate::error::BackendError;
use crate::line_protocol::encode_batch;
use crate::traits::PointWriter;
use async_trait::async_trait;
use domain::MeasurementPoint;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

/// InfluxDB 连接配置。
#[derive(Debug, Clone)]
pub struct InfluxConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
}

impl InfluxConfig {
    /// `host` 可带 scheme（`https://influx.example`），此时忽略 port。
    pub fn base_url(&self) -> String {
        let host = self.host.trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("http://{}:{}", host, self.port)
        }
    }
}

pub struct InfluxWriter {
    client: reqwest::Client,
    base_url: String,
    config: InfluxConfig,
}

impl InfluxWriter {
    pub fn new(config: InfluxConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| BackendError::Client(err.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url(),
            config,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// 探活：InfluxDB 返回 204。
    pub async fn ping(&self) -> Result<(), BackendError> {
        let response = self
            .client
            .get(format!("{}/ping", self.base_url))
            .send()
            .await
            .map_err(|err| self.map_request_error(err))?;
        check_status(response).await
    }

    /// 数据库不存在时创建（CREATE DATABASE 幂等）。
    pub async fn ensure_database(&self, database: &str) -> Result<(), BackendError> {
        let statement = format!("CREATE DATABASE \"{}\"", database.replace('"', "\\\""));
        let mut query = vec![("q", statement.as_str())];
        query.extend(self.credentials());
        let response = self
            .client
            .post(format!("{}/query", self.base_url))
            .query(&query)
            .send()
            .await
            .map_err(|err| self.map_request_error(err))?;
        check_status(response).await
    }

    fn credentials(&self) -> Vec<(&'static str, &str)> {
        match (self.config.username.as_deref(), self.config.password.as_deref()) {
            (Some(username), Some(password)) => vec![("u", username), ("p", password)],
            _ => Vec::new(),
        }
    }

    fn map_request_error(&self, err: reqwest::Error) -> BackendError {
        if err.is_timeout() {
            BackendError::Timeout(self.config.timeout.as_millis() as u64)
        } else {
            BackendError::Transient(err.to_string())
        }
    }
}

#[async_trait]
impl PointWriter for InfluxWriter {
    async fn write(&self, database: &str, points: &[MeasurementPoint]) -> Result<(), BackendError> {
        let body = encode_batch(points);
        if body.is_empty() {
            return Ok(());
        }
        let mut query = vec![("db", database), ("precision", "ms")];
        query.extend(self.credentials());
        debug!(
            target: "bridge.storage",
            database = %database,
            points = points.len(),
            bytes = body.len(),
            "influx_write"
        );
        let response = self
            .client
            .post(format!("{}/write", self.base_url))
            .query(&query)
            .body(body)
            .send()
            .await
            .map_err(|err| self.map_request_error(err))?;
        check_status(response).await
    }
}

async fn check_status(response: reqwest::Response) -> Result<(), BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let message = response.text().await.unwrap_or_default();
    Err(classify_status(status, message))
}

/// 5xx 与 429 可重试，其余 4xx 视为拒绝。
fn classify_status(status: StatusCode, message: String) -> BackendError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        BackendError::Transient(format!("http {}: {}", status.as_u16(), message.trim()))
    } else {
        BackendError::Rejected {
            status: status.as_u16(),
            message: message.trim().to_string(),
        }
    }
}
