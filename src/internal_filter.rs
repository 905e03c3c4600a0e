//! Self-instrumentation filter
//!
//! The agent's own code calls instrumented libraries too (reading its
//! configuration, talking to the collector, ...). Those calls must never be
//! reported. The filter looks at the raw captured stack, before any
//! normalization, and recognises two shapes:
//!
//! - every frame below the registration frame is agent code, or
//! - agent code shows up again below the leading run of agent hook frames,
//!   meaning the agent itself drove the instrumented call.

use crate::config::AgentConfig;
use crate::stack_frame::StackFrame;

/// Detects operations generated by the agent itself
#[derive(Debug, Clone)]
pub struct InternalCallFilter {
    agent_namespaces: Vec<String>,
}

impl InternalCallFilter {
    pub fn new(agent_namespaces: Vec<String>) -> Self {
        Self { agent_namespaces }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(config.agent_namespaces.clone())
    }

    /// Check whether the raw stack belongs to an agent-generated call
    ///
    /// Frame 0 is the registration call and is not inspected.
    pub fn is_agent_generated(&self, raw_stack: &[StackFrame]) -> bool {
        let mut leading_run_intact = true;
        let mut inspected = 0usize;

        for frame in raw_stack.iter().skip(1) {
            inspected += 1;
            let internal = frame.in_namespace(&self.agent_namespaces);
            if leading_run_intact {
                if !internal {
                    leading_run_intact = false;
                }
            } else if internal {
                return true;
            }
        }

        inspected > 0 && leading_run_intact
    }
}
