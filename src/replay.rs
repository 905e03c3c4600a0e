//! Offline replay of captured operations
//!
//! A replay document is a JSON file describing requests and the operations
//! intercepted while they ran, e.g.
//!
//! ```json
//! {
//!   "policy": { "protection_mode_enabled": true, "api_blocking_enabled": true,
//!               "blocked_api_ids": ["SQL_DB_COMMAND-…"] },
//!   "requests": [
//!     { "context": { "request": { "method": "GET", "url": "/orders" } },
//!       "operations": [ { "case_type": "SQL_DB_COMMAND", … } ],
//!       "exits": [0] }
//!   ]
//! }
//! ```
//!
//! `exits` lists indices into `operations` whose sink should be reported as
//! reached once the operation has been registered.

use crate::agent::{RegistrationOutcome, SecurityAgent};
use crate::operation::Operation;
use crate::policy::AgentPolicy;
use crate::request_context::RequestContext;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("failed to read replay document {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid replay document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("request {request}: exit index {index} is out of range ({operations} operations)")]
    ExitIndex {
        request: usize,
        index: usize,
        operations: usize,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplayDocument {
    #[serde(default)]
    pub policy: Option<AgentPolicy>,
    #[serde(default)]
    pub requests: Vec<ReplayRequest>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplayRequest {
    #[serde(default)]
    pub context: RequestContext,
    #[serde(default)]
    pub operations: Vec<Operation>,
    #[serde(default)]
    pub exits: Vec<usize>,
}

impl ReplayDocument {
    pub fn from_json_str(text: &str) -> Result<Self, ReplayError> {
        let document: ReplayDocument = serde_json::from_str(text)?;
        document.check_exit_indices()?;
        Ok(document)
    }

    pub fn from_file(path: &Path) -> Result<Self, ReplayError> {
        let text = std::fs::read_to_string(path).map_err(|source| ReplayError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    fn check_exit_indices(&self) -> Result<(), ReplayError> {
        for (request, entry) in self.requests.iter().enumerate() {
            if let Some(&index) = entry.exits.iter().find(|&&i| i >= entry.operations.len()) {
                return Err(ReplayError::ExitIndex {
                    request,
                    index,
                    operations: entry.operations.len(),
                });
            }
        }
        Ok(())
    }
}

/// Outcome counts for one replay run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub operations: usize,
    pub dispatched: usize,
    pub suppressed: usize,
    pub dropped_internal: usize,
    pub dropped_empty: usize,
    pub dropped_backpressure: usize,
    pub inactive: usize,
    pub exit_events: usize,
    /// Fingerprinted API ids and how often each was seen
    pub api_ids: BTreeMap<String, usize>,
}

impl ReplaySummary {
    fn record(&mut self, outcome: &RegistrationOutcome) {
        self.operations += 1;
        match outcome {
            RegistrationOutcome::Dispatched { .. } => self.dispatched += 1,
            RegistrationOutcome::Suppressed { .. } => self.suppressed += 1,
            RegistrationOutcome::DroppedInternal => self.dropped_internal += 1,
            RegistrationOutcome::DroppedEmpty => self.dropped_empty += 1,
            RegistrationOutcome::DroppedBackpressure { .. } => self.dropped_backpressure += 1,
            RegistrationOutcome::Inactive => self.inactive += 1,
        }
        if let Some(api_id) = outcome.api_id() {
            *self.api_ids.entry(api_id.to_string()).or_insert(0) += 1;
        }
    }
}

/// Feed every request of `document` through `agent`
pub fn replay(agent: &SecurityAgent, document: ReplayDocument) -> ReplaySummary {
    let mut summary = ReplaySummary::default();

    if let Some(policy) = document.policy {
        agent.update_policy(policy);
    }

    for (n, request) in document.requests.into_iter().enumerate() {
        let mut ctx = request.context;
        let mut registered = Vec::with_capacity(request.operations.len());

        for operation in request.operations {
            let outcome = agent.register_operation(operation.clone(), &mut ctx);
            summary.record(&outcome);
            registered.push(identified(operation, &outcome));
        }

        for index in request.exits {
            let Some(Some(operation)) = registered.get(index) else {
                debug!(request = n, index, "exit skipped, operation was not fingerprinted");
                continue;
            };
            if agent.register_exit_event(operation, &ctx) {
                summary.exit_events += 1;
            }
        }
    }

    summary
}

/// The operation as the pipeline saw it, with the ids it was given
fn identified(mut operation: Operation, outcome: &RegistrationOutcome) -> Option<Operation> {
    let (execution_id, api_id) = match outcome {
        RegistrationOutcome::Dispatched { execution_id, api_id }
        | RegistrationOutcome::Suppressed { execution_id, api_id }
        | RegistrationOutcome::DroppedBackpressure { execution_id, api_id } => (execution_id, api_id),
        _ => return None,
    };

    operation.set_execution_id(execution_id.clone()).ok()?;
    operation.set_api_id(api_id.clone()).ok()?;
    Some(operation)
}
