//! The agent service object
//!
//! [`SecurityAgent`] owns every long-lived piece of the pipeline: the frame
//! classification rules, the policy gate, the dispatch queue and the health
//! counters. Interception adapters call [`SecurityAgent::register_operation`]
//! synchronously on the application thread; the only hand-off to another
//! thread is the dispatch queue.

use crate::attribution::attribute;
use crate::build_info::{BuildInfo, BuildInfoError, EMBEDDED_BUILD_INFO};
use crate::config::{AgentConfig, ConfigError};
use crate::dispatch::{DispatchQueue, QueueStats, Transport};
use crate::event::SecurityEvent;
use crate::execution_id::next_execution_id;
use crate::exit_correlator::correlate;
use crate::fingerprint::api_id_or_undefined;
use crate::health::{HealthSnapshot, HealthStats};
use crate::internal_filter::InternalCallFilter;
use crate::normalizer::StackNormalizer;
use crate::operation::{CaseType, Operation};
use crate::policy::{AgentPolicy, PolicyGate};
use crate::request_context::RequestContext;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

#[derive(Error, Debug)]
pub enum InitError {
    #[error("cannot read collector build info: {0}")]
    BuildInfo(#[from] BuildInfoError),

    #[error("invalid agent configuration: {0}")]
    Config(#[from] ConfigError),
}

/// What happened to a registered operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// Handed to the dispatch queue
    Dispatched { execution_id: String, api_id: String },

    /// Fingerprinted, but the policy blocks this API id
    Suppressed { execution_id: String, api_id: String },

    /// Triggered by the agent's own code
    DroppedInternal,

    /// Nothing to report
    DroppedEmpty,

    /// Dispatch queue full or shutting down
    DroppedBackpressure { execution_id: String, api_id: String },

    /// Agent is deactivated
    Inactive,
}

impl RegistrationOutcome {
    pub fn is_dispatched(&self) -> bool {
        matches!(self, RegistrationOutcome::Dispatched { .. })
    }

    /// API id assigned by the pipeline, if it got that far
    pub fn api_id(&self) -> Option<&str> {
        match self {
            RegistrationOutcome::Dispatched { api_id, .. }
            | RegistrationOutcome::Suppressed { api_id, .. }
            | RegistrationOutcome::DroppedBackpressure { api_id, .. } => Some(api_id),
            _ => None,
        }
    }
}

pub struct SecurityAgent {
    config: AgentConfig,
    build_info: BuildInfo,
    normalizer: StackNormalizer,
    internal_filter: InternalCallFilter,
    policy: PolicyGate,
    dispatch: DispatchQueue,
    health: HealthStats,
    scanned_api_ids: Mutex<HashSet<String>>,
    first_event_processed: AtomicBool,
    active: AtomicBool,
}

impl SecurityAgent {
    /// Bring the agent up with the build identity compiled into the binary
    pub fn initialise(config: AgentConfig, transport: Arc<dyn Transport>) -> Result<Self, InitError> {
        Self::initialise_with_build_info(config, transport, EMBEDDED_BUILD_INFO)
    }

    /// Bring the agent up with build identity read from `build_info`
    ///
    /// Fails without starting the dispatch sidecar if the build identity
    /// cannot be read or the configuration is invalid.
    pub fn initialise_with_build_info(
        config: AgentConfig,
        transport: Arc<dyn Transport>,
        build_info: &str,
    ) -> Result<Self, InitError> {
        info!("[STEP-1] Agent initialisation started");

        let build_info = BuildInfo::parse(build_info)?;
        info!(
            collector_version = %build_info.collector_version,
            json_version = %build_info.json_version,
            commit = %build_info.commit,
            "[STEP-1] Build identity loaded"
        );

        config.validate()?;
        debug!(?config, "[STEP-2] Configuration validated");

        let dispatch = DispatchQueue::new(&config, transport);
        info!(
            queue_capacity = config.queue_capacity,
            exit_queue_capacity = config.exit_queue_capacity,
            "[STEP-3] Dispatch sidecar started"
        );

        let agent = Self {
            normalizer: StackNormalizer::from_config(&config),
            internal_filter: InternalCallFilter::from_config(&config),
            policy: PolicyGate::default(),
            dispatch,
            health: HealthStats::new(),
            scanned_api_ids: Mutex::new(HashSet::new()),
            first_event_processed: AtomicBool::new(false),
            active: AtomicBool::new(true),
            build_info,
            config,
        };

        info!("[STEP-4] Security agent is now active");
        Ok(agent)
    }

    /// Run an intercepted operation through the pipeline
    pub fn register_operation(&self, mut operation: Operation, ctx: &mut RequestContext) -> RegistrationOutcome {
        if !self.is_active() {
            return RegistrationOutcome::Inactive;
        }
        if operation.is_empty() {
            return RegistrationOutcome::DroppedEmpty;
        }

        if let Err(e) = operation.set_execution_id(next_execution_id()) {
            warn!(error = %e, "operation registered twice, keeping its execution id");
        }
        let execution_id = operation.execution_id().unwrap_or_default().to_string();
        operation.start_time = epoch_millis();

        if ctx.is_fuzz_request() {
            trace!(
                execution_id = %execution_id,
                case_type = %operation.case_type,
                "New event generation for fuzz request"
            );
        }

        if operation.case_type == CaseType::ReflectedXss {
            operation.call_stack = ctx.meta.service_trace.clone();
        }

        if self.internal_filter.is_agent_generated(&operation.call_stack) {
            trace!(
                execution_id = %execution_id,
                case_type = %operation.case_type,
                "Dropping operation raised by agent code"
            );
            self.health.increment_internal_calls_dropped();
            return RegistrationOutcome::DroppedInternal;
        }

        self.log_scan_start_once(ctx);

        StackNormalizer::bound_to_service_entry(&mut operation.call_stack, ctx.meta.service_trace.len());
        let trace = self.normalizer.normalize(&mut operation.call_stack, &mut ctx.meta);
        operation.source_method = trace.source_method;

        let api_id = api_id_or_undefined(
            operation.case_type,
            &trace.id_hashes,
            operation.source_method.as_deref(),
        );
        if let Err(e) = operation.set_api_id(api_id) {
            warn!(error = %e, "operation already fingerprinted, keeping its api id");
        }
        let api_id = operation.api_id().unwrap_or_default().to_string();

        if !self.policy.allows(&api_id) {
            debug!(api_id = %api_id, "Event suppressed by API blocking policy");
            self.health.increment_events_suppressed();
            return RegistrationOutcome::Suppressed { execution_id, api_id };
        }

        operation.user_class_entity = attribute(
            &operation.call_stack,
            operation.source_method.as_deref(),
            &ctx.meta,
        );

        if !self.dispatch.dispatch(SecurityEvent::new(operation, ctx)) {
            return RegistrationOutcome::DroppedBackpressure { execution_id, api_id };
        }

        self.health.increment_events_dispatched();
        if self
            .first_event_processed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            info!(url = %ctx.request.url, "[EVENT] First event processed");
        }

        RegistrationOutcome::Dispatched { execution_id, api_id }
    }

    /// Report a fuzzed value reaching its targeted sink
    ///
    /// Returns `true` if an exit record was queued. `operation` is expected
    /// to have been through [`register_operation`](Self::register_operation)
    /// already, so that it carries its API id.
    pub fn register_exit_event(&self, operation: &Operation, ctx: &RequestContext) -> bool {
        if !self.is_active() {
            return false;
        }

        let Some(record) = correlate(operation, ctx) else {
            return false;
        };

        debug!(
            execution_id = %record.execution_id,
            case_type = %record.case_type,
            api_id = %ctx.fuzz_request.api_record_id,
            "Exit event for fuzzed sink"
        );

        if !self.dispatch.dispatch_exit(record) {
            return false;
        }
        self.health.increment_exit_events_sent();
        true
    }

    fn log_scan_start_once(&self, ctx: &RequestContext) {
        let fuzz = &ctx.fuzz_request;
        if fuzz.api_record_id.trim().is_empty() {
            return;
        }

        let first_time = match self.scanned_api_ids.lock() {
            Ok(mut scanned) => scanned.insert(fuzz.api_record_id.clone()),
            Err(poisoned) => poisoned.into_inner().insert(fuzz.api_record_id.clone()),
        };

        if first_time {
            info!(
                "IAST Scan for API {} with ID : {} started.",
                ctx.request.url, fuzz.api_record_id
            );
        }
    }

    /// Number of distinct API ids a scan has been seen for
    pub fn scanned_api_count(&self) -> usize {
        match self.scanned_api_ids.lock() {
            Ok(scanned) => scanned.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn update_policy(&self, policy: AgentPolicy) {
        self.policy.update(policy);
    }

    pub fn policy(&self) -> Arc<AgentPolicy> {
        self.policy.current()
    }

    pub fn health(&self) -> HealthSnapshot {
        self.health.snapshot()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.dispatch.stats()
    }

    pub fn build_info(&self) -> &BuildInfo {
        &self.build_info
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stop accepting operations and flush the dispatch queue
    ///
    /// Waits at most `shutdown_timeout` for queued events to be sent.
    pub fn deactivate(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            info!("Security agent deactivated");
        }
        self.dispatch.shutdown();
    }
}

impl Drop for SecurityAgent {
    fn drop(&mut self) {
        self.deactivate();
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
