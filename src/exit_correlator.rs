//! Exit event correlation
//!
//! A scanner replays a request with a fuzzed value aimed at one API id. When
//! the interception layer later sees that sink being reached, it reports an
//! exit; this module decides whether that exit confirms the targeted sink.
//! Most exits do not, and that is not an error.

use crate::event::ExitEventRecord;
use crate::operation::Operation;
use crate::request_context::{RequestContext, ScanStatus};

/// Build the exit record if `operation` is the sink the fuzz request targets
pub fn correlate(operation: &Operation, ctx: &RequestContext) -> Option<ExitEventRecord> {
    let fuzz = &ctx.fuzz_request;
    if !fuzz.is_k2_request || ctx.request.is_empty() || operation.is_empty() {
        return None;
    }

    let api_id = operation.api_id()?;
    if fuzz.api_record_id != api_id || fuzz.next_stage.status != ScanStatus::Vulnerable {
        return None;
    }

    Some(ExitEventRecord {
        execution_id: operation.execution_id().unwrap_or_default().to_string(),
        case_type: operation.case_type,
        fuzz_request_identifier_raw: fuzz.raw.clone(),
    })
}
