//! The standardized mediator response aggregate.
//!
//! One `CoreResponse` is built up per inbound request and serialized exactly
//! once at finalization, either back to the original caller (media type
//! `application/json+openhim`) or to core as an async transaction update.

use crate::error::Result;
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Snapshot of one outbound request, recorded inside an [`Orchestration`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(rename = "queryString", skip_serializing_if = "Option::is_none")]
    pub query_string: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default = "Timestamp::now")]
    pub timestamp: Timestamp,
}

impl Default for RequestSnapshot {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            path: None,
            headers: HashMap::new(),
            query_string: None,
            body: None,
            method: None,
            timestamp: Timestamp::now(),
        }
    }
}

/// A response body/status/headers triple, used both as the primary response
/// and as the response side of an [`Orchestration`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default = "Timestamp::now")]
    pub timestamp: Timestamp,
}

impl Default for ResponseDetail {
    fn default() -> Self {
        Self {
            status: None,
            headers: HashMap::new(),
            body: None,
            timestamp: Timestamp::now(),
        }
    }
}

impl ResponseDetail {
    pub fn put_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }
}

/// An immutable audit record of one outbound call made while servicing an
/// inbound request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Orchestration {
    #[serde(default)]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseDetail>,
}

/// Coarse outcome classification derived from the primary response status
/// and the accumulated orchestrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptiveStatus {
    Successful,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl DescriptiveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Successful => "Successful",
            Self::Completed => "Completed",
            Self::CompletedWithErrors => "Completed with error(s)",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for DescriptiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The root response aggregate, one per inbound request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreResponse {
    #[serde(rename = "x-mediator-urn", skip_serializing_if = "Option::is_none")]
    pub urn: Option<String>,
    /// Explicit status override; when unset the descriptive status is
    /// derived at finalization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseDetail>,
    #[serde(default)]
    pub orchestrations: Vec<Orchestration>,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl CoreResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an orchestration record, preserving receipt order.
    pub fn add_orchestration(&mut self, orchestration: Orchestration) {
        self.orchestrations.push(orchestration);
    }

    /// Upsert a property (last write wins).
    pub fn put_property(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(name.into(), value.into());
    }

    /// Derive the descriptive status from the primary response status plus
    /// orchestration outcomes: 5xx is `Failed`, 4xx is `Completed`, 2xx with
    /// any orchestration response in 400..=599 is `Completed with error(s)`,
    /// anything else is `Successful`.
    pub fn descriptive_status(&self) -> DescriptiveStatus {
        if let Some(status) = self.response.as_ref().and_then(|r| r.status) {
            if (500..600).contains(&status) {
                return DescriptiveStatus::Failed;
            }
            if (400..500).contains(&status) {
                return DescriptiveStatus::Completed;
            }
            if (200..300).contains(&status) {
                let any_failed = self.orchestrations.iter().any(|orch| {
                    orch.response
                        .as_ref()
                        .and_then(|r| r.status)
                        .is_some_and(|s| (400..600).contains(&s))
                });
                if any_failed {
                    return DescriptiveStatus::CompletedWithErrors;
                }
            }
        }
        DescriptiveStatus::Successful
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn parse(content: &str) -> Result<CoreResponse> {
        Ok(serde_json::from_str(content)?)
    }
}
