//! Per-request state the host hands to the pipeline
//!
//! A [`RequestContext`] is created by the host when it starts processing an
//! inbound request and dropped when the request completes. The pipeline only
//! ever borrows it; nothing in the agent keeps a reference past the call.

use crate::stack_frame::StackFrame;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Verdict of the scanner's next stage for a fuzz request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanStatus {
    Safe,
    Vulnerable,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextStage {
    #[serde(default)]
    pub status: ScanStatus,
}

/// Identifier carried by an injected fuzz (K2) request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuzzRequestIdentifier {
    #[serde(default)]
    pub is_k2_request: bool,

    /// API id of the sink the scanner is targeting
    #[serde(default)]
    pub api_record_id: String,

    #[serde(default)]
    pub next_stage: NextStage,

    /// Header value exactly as received, echoed back on exit events
    #[serde(default)]
    pub raw: String,
}

/// Inbound HTTP request as seen by the host's web container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequest {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub client_ip: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl HttpRequest {
    pub fn is_empty(&self) -> bool {
        self.method.is_empty() && self.url.is_empty()
    }
}

/// Attribution and RCI state accumulated while the request runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMetaData {
    /// Stack captured when the host entered its own service method
    #[serde(default)]
    pub service_trace: Vec<StackFrame>,

    /// Set once a sink was reached through reflective dispatch
    #[serde(default)]
    pub trigger_via_rci: bool,

    /// Reflective/caller frame pairs, in string form
    #[serde(default)]
    pub rci_method_calls: Vec<String>,

    /// Set by the host when a user-level service method was entered
    #[serde(default)]
    pub user_level_service_method_encountered: bool,
}

/// Per-request security state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(default)]
    pub fuzz_request: FuzzRequestIdentifier,

    #[serde(default)]
    pub request: HttpRequest,

    #[serde(default)]
    pub meta: RequestMetaData,
}

impl RequestContext {
    /// Context for a request that was not fuzzed
    pub fn new(request: HttpRequest, service_trace: Vec<StackFrame>) -> Self {
        Self {
            fuzz_request: FuzzRequestIdentifier::default(),
            request,
            meta: RequestMetaData {
                service_trace,
                ..RequestMetaData::default()
            },
        }
    }

    /// Mark this request as a fuzz request aimed at `api_record_id`
    pub fn with_fuzz_request(
        mut self,
        api_record_id: impl Into<String>,
        status: ScanStatus,
        raw: impl Into<String>,
    ) -> Self {
        self.fuzz_request = FuzzRequestIdentifier {
            is_k2_request: true,
            api_record_id: api_record_id.into(),
            next_stage: NextStage { status },
            raw: raw.into(),
        };
        self
    }

    pub fn is_fuzz_request(&self) -> bool {
        self.fuzz_request.is_k2_request
    }
}
