//! Vigil - runtime application security agent core
//!
//! This library turns intercepted, security-relevant library calls into
//! fingerprinted security events: it normalizes the captured call stack,
//! derives a stable API id for the call site, attributes the call to user
//! code, applies the API blocking policy and hands the event to a
//! non-blocking dispatch queue. It also correlates fuzz requests with the
//! sinks they target to produce IAST exit events.

pub mod agent;
pub mod attribution;
pub mod build_info;
pub mod capture;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod event;
pub mod execution_id;
pub mod exit_correlator;
pub mod fingerprint;
pub mod health;
pub mod internal_filter;
pub mod normalizer;
pub mod operation;
pub mod policy;
pub mod replay;
pub mod request_context;
pub mod stack_frame;

pub use agent::{InitError, RegistrationOutcome, SecurityAgent};
pub use operation::{CaseType, Operation};
pub use request_context::RequestContext;
pub use stack_frame::StackFrame;
