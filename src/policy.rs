//! API blocking policy gate
//!
//! The policy document itself is fetched and parsed by the policy
//! collaborator; the gate only holds the latest [`AgentPolicy`] and answers
//! one question per operation: may this API id be reported?

use crate::fingerprint::UNDEFINED_API_ID;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

/// Read-only view of the active policy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentPolicy {
    pub protection_mode_enabled: bool,
    pub api_blocking_enabled: bool,
    /// API ids whose events are suppressed while blocking is on
    pub blocked_api_ids: HashSet<String>,
}

impl AgentPolicy {
    /// True if events for `api_id` must not be generated
    ///
    /// Operations that could not be fingerprinted are always reported.
    pub fn suppresses(&self, api_id: &str) -> bool {
        api_id != UNDEFINED_API_ID
            && self.protection_mode_enabled
            && self.api_blocking_enabled
            && self.blocked_api_ids.contains(api_id)
    }
}

/// Shared, replaceable policy
#[derive(Debug, Clone, Default)]
pub struct PolicyGate {
    policy: Arc<RwLock<Arc<AgentPolicy>>>,
}

impl PolicyGate {
    pub fn new(policy: AgentPolicy) -> Self {
        Self {
            policy: Arc::new(RwLock::new(Arc::new(policy))),
        }
    }

    /// Snapshot of the current policy
    pub fn current(&self) -> Arc<AgentPolicy> {
        match self.policy.read() {
            Ok(guard) => Arc::clone(&*guard),
            // A writer panicked mid-swap; the stored Arc is still whole.
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Replace the policy (called by the policy collaborator)
    pub fn update(&self, policy: AgentPolicy) {
        let policy = Arc::new(policy);
        match self.policy.write() {
            Ok(mut guard) => *guard = policy,
            Err(poisoned) => *poisoned.into_inner() = policy,
        }
        tracing::info!("agent policy updated");
    }

    /// True if an event for `api_id` should be generated
    pub fn allows(&self, api_id: &str) -> bool {
        !self.current().suppresses(api_id)
    }
}
