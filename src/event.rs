//! Records handed to the dispatch queue

use crate::operation::{CaseType, Operation};
use crate::request_context::{HttpRequest, RequestContext};
use serde::{Deserialize, Serialize};

/// A fingerprinted, attributed operation with the request state it ran under
///
/// The operation is moved in, not cloned, so the event carries exactly the
/// execution id the pipeline assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub operation: Operation,

    #[serde(default, skip_serializing_if = "HttpRequest::is_empty")]
    pub request: HttpRequest,

    /// Raw fuzz request header, when the request was injected by a scanner
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fuzz_request_raw: Option<String>,

    #[serde(default)]
    pub trigger_via_rci: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rci_method_calls: Vec<String>,
}

impl SecurityEvent {
    pub fn new(operation: Operation, ctx: &RequestContext) -> Self {
        let fuzz_request_raw = if ctx.fuzz_request.is_k2_request {
            Some(ctx.fuzz_request.raw.clone())
        } else {
            None
        };

        Self {
            operation,
            request: ctx.request.clone(),
            fuzz_request_raw,
            trigger_via_rci: ctx.meta.trigger_via_rci,
            rci_method_calls: ctx.meta.rci_method_calls.clone(),
        }
    }

    pub fn execution_id(&self) -> Option<&str> {
        self.operation.execution_id()
    }

    pub fn api_id(&self) -> Option<&str> {
        self.operation.api_id()
    }
}

/// Confirmation that a fuzzed value reached a fingerprinted sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitEventRecord {
    pub execution_id: String,
    pub case_type: CaseType,
    pub fuzz_request_identifier_raw: String,
}
