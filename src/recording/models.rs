// src/recording/models.rs
//! Rows exchanged with the store and the admin API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of an intercepted call as recorded in history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallStatus {
    #[serde(rename = "Pending")]
    Pending,
    #[serde(rename = "Auto-Responded")]
    AutoResponded,
    #[serde(rename = "Responded (Custom)")]
    RespondedCustom,
    #[serde(rename = "Responded (Default)")]
    RespondedDefault,
    #[serde(rename = "Timed Out")]
    TimedOut,
    #[serde(rename = "Cancelled")]
    Cancelled,
    #[serde(rename = "Auto-Responded (Disconnect)")]
    AutoRespondedDisconnect,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Pending => "Pending",
            CallStatus::AutoResponded => "Auto-Responded",
            CallStatus::RespondedCustom => "Responded (Custom)",
            CallStatus::RespondedDefault => "Responded (Default)",
            CallStatus::TimedOut => "Timed Out",
            CallStatus::Cancelled => "Cancelled",
            CallStatus::AutoRespondedDisconnect => "Auto-Responded (Disconnect)",
        }
    }

    /// Short label used for metrics
    pub fn metric_label(&self) -> &'static str {
        match self {
            CallStatus::Pending => "pending",
            CallStatus::AutoResponded => "auto",
            CallStatus::RespondedCustom => "custom",
            CallStatus::RespondedDefault => "default",
            CallStatus::TimedOut => "timeout",
            CallStatus::Cancelled => "cancelled",
            CallStatus::AutoRespondedDisconnect => "disconnect",
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s {
            "Pending" => CallStatus::Pending,
            "Auto-Responded" => CallStatus::AutoResponded,
            "Responded (Custom)" => CallStatus::RespondedCustom,
            "Responded (Default)" => CallStatus::RespondedDefault,
            "Timed Out" => CallStatus::TimedOut,
            "Cancelled" => CallStatus::Cancelled,
            "Auto-Responded (Disconnect)" => CallStatus::AutoRespondedDisconnect,
            other => return Err(format!("unknown call status: {}", other)),
        };
        Ok(status)
    }
}

/// Keyword override attached to an endpoint configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRule {
    pub id: i64,
    pub config_id: i64,
    pub keyword: String,
    pub response: String,
}

/// Mock configuration for an HTTP endpoint, optionally scoped to a source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConfig {
    pub id: i64,
    pub endpoint: String,
    /// Empty when the configuration applies to every source
    pub source: String,
    pub project: String,
    pub remark: String,
    pub default_response: String,
    /// Evaluated in insertion order
    pub rules: Vec<ResponseRule>,
}

/// Admin payload for creating or replacing an endpoint configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigInput {
    pub endpoint: String,
    pub project: String,
    pub remark: String,
    pub default_response: String,
    pub source: String,
}

/// Mock configuration for a terminal command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshConfig {
    pub id: i64,
    pub command: String,
    pub project: String,
    pub remark: String,
    pub response: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SshConfigInput {
    pub command: String,
    pub project: String,
    pub remark: String,
    pub response: String,
}

/// History row for an HTTP call
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEvent {
    pub id: i64,
    pub request_id: String,
    pub endpoint: String,
    pub project: String,
    pub payload: String,
    pub response_body: String,
    pub status: CallStatus,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

/// Fields of a new HTTP history row
#[derive(Debug, Clone)]
pub struct NewCallEvent<'a> {
    pub request_id: &'a str,
    pub endpoint: &'a str,
    pub project: &'a str,
    pub payload: &'a str,
    pub response_body: &'a str,
    pub status: CallStatus,
    pub source: &'a str,
}

/// History row for a terminal command
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SshEvent {
    pub id: i64,
    pub request_id: String,
    pub command: String,
    pub project: String,
    pub response_body: String,
    pub status: CallStatus,
    pub timestamp: DateTime<Utc>,
}

/// Heartbeat row of a mock-server process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstance {
    pub address: String,
    pub protocol: String,
    pub registered_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl ServiceInstance {
    /// Base URL of this instance, e.g. `http://10.0.0.5:8080`
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.address)
    }
}

/// Filters for the HTTP history listing
#[derive(Debug, Clone)]
pub struct HistoryQuery {
    pub page: u32,
    pub page_size: u32,
    pub project: Option<String>,
    pub search: Option<String>,
    pub source: Option<String>,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 20,
            project: None,
            search: None,
            source: None,
        }
    }
}

impl HistoryQuery {
    pub(crate) fn offset(&self) -> i64 {
        i64::from(self.page.max(1) - 1) * i64::from(self.page_size)
    }
}

/// One page of a history listing
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}
