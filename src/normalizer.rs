//! Stack trace normalization
//!
//! Turns a captured stack into the deterministic, bounded trace that the
//! fingerprint and the attributor work on:
//!
//! 1. [`StackNormalizer::bound_to_service_entry`] cuts the trace at the host's
//!    service entry point, so container internals below it never count.
//! 2. [`StackNormalizer::normalize`] strips the leading run of agent frames
//!    (normally starting with the registration call at frame 0), and excludes reflection,
//!    native, negative-line and non-source frames from the hash input. A
//!    frame excluded that way right after a locatable user frame is the
//!    signature of reflective dispatch and is recorded as an RCI signal on
//!    the request.
//!
//! ```text
//! raw:        [register, agent hook, jdbc, reflect.invoke, dao, service, filter, container...]
//! bounded:    [register, agent hook, jdbc, reflect.invoke, dao, service, filter]
//! normalized: [jdbc, reflect.invoke, dao, service, filter]   source_method = jdbc
//! id hashes:  [h(jdbc), h(dao), h(service), h(filter)]
//! ```

use crate::config::AgentConfig;
use crate::request_context::RequestMetaData;
use crate::stack_frame::StackFrame;

/// Number of frames kept beyond the service-entry boundary
pub const SERVICE_ENTRY_SLACK: usize = 3;

/// Result of normalizing one stack
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedTrace {
    /// Leading frames removed from the front of the stack
    pub leading_discarded: usize,

    /// Hashes of the frames that identify the call site, in traversal order
    pub id_hashes: Vec<u64>,

    /// String form of the first retained frame
    pub source_method: Option<String>,
}

/// Frame classification rules
#[derive(Debug, Clone)]
pub struct StackNormalizer {
    agent_namespaces: Vec<String>,
    reflection_namespaces: Vec<String>,
    source_file_suffixes: Vec<String>,
    rci_detection_enabled: bool,
}

impl StackNormalizer {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            agent_namespaces: config.agent_namespaces.clone(),
            reflection_namespaces: config.reflection_namespaces.clone(),
            source_file_suffixes: config.source_file_suffixes.clone(),
            rci_detection_enabled: config.rci_detection_enabled,
        }
    }

    /// Keep only `len - service_trace_len + 3` frames (clamped to the stack)
    pub fn bound_to_service_entry(stack: &mut Vec<StackFrame>, service_trace_len: usize) {
        let target = (stack.len() + SERVICE_ENTRY_SLACK)
            .saturating_sub(service_trace_len)
            .min(stack.len());
        stack.truncate(target);
    }

    /// Normalize `stack` in place and record RCI signals on `meta`
    pub fn normalize(&self, stack: &mut Vec<StackFrame>, meta: &mut RequestMetaData) -> NormalizedTrace {
        let mut leading = 0usize;
        let mut id_hashes = Vec::with_capacity(stack.len());

        for (i, frame) in stack.iter().enumerate() {
            let mut discarded = false;

            // Only a consecutive run of agent frames from the top is removed.
            if i == leading && frame.in_namespace(&self.agent_namespaces) {
                leading += 1;
                discarded = true;
            }

            if self.is_unattributable(frame) {
                discarded = true;

                if self.rci_detection_enabled && i > 0 {
                    let previous = &stack[i - 1];
                    if self.is_locatable_host_frame(previous) {
                        meta.trigger_via_rci = true;
                        meta.rci_method_calls.push(frame.to_string());
                        meta.rci_method_calls.push(previous.to_string());
                    }
                }
            }

            if !discarded {
                id_hashes.push(frame.frame_hash());
            }
        }

        stack.drain(..leading.min(stack.len()));
        let source_method = stack.first().map(ToString::to_string);

        NormalizedTrace {
            leading_discarded: leading,
            id_hashes,
            source_method,
        }
    }

    /// Reflection/proxy, native, unknown-line or non-source frames
    fn is_unattributable(&self, frame: &StackFrame) -> bool {
        frame.in_namespace(&self.reflection_namespaces)
            || frame.native
            || frame.line_number < 0
            || !self.is_source_file(frame)
    }

    fn is_source_file(&self, frame: &StackFrame) -> bool {
        match &frame.file_name {
            Some(file) => self
                .source_file_suffixes
                .iter()
                .any(|suffix| file.ends_with(suffix.as_str())),
            None => false,
        }
    }

    fn is_locatable_host_frame(&self, frame: &StackFrame) -> bool {
        frame.line_number > 0
            && frame
                .file_name
                .as_deref()
                .is_some_and(|file| !file.trim().is_empty())
            && !frame.in_namespace(&self.agent_namespaces)
    }
}
