//! Lock-free dispatch queue with a sidecar sender thread
//!
//! Decouples the hot path (an application thread registering an operation)
//! from the cold path (serialising and sending events to the collector).
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ APPLICATION THREAD (Hot Path)                                 │
//! │   register_operation() → dispatch() → events.push()           │
//! │   register_exit_event() → dispatch_exit() → exits.push()      │
//! └───────────────────────────────────────────────────────────────┘
//!                          │
//!                          │ two bounded ArrayQueues
//!                          ▼
//! ┌───────────────────────────────────────────────────────────────┐
//! │ SIDECAR THREAD (Cold Path)                                    │
//! │   loop {                                                      │
//! │     exits  → transport.send_exit_event()                      │
//! │     events → transport.send_event()       (batch_size max)    │
//! │     sleep(idle_poll) when both are empty                      │
//! │   }                                                           │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! A full queue drops the new item and counts it; the application thread
//! never waits on the collector. Transport failures are logged and counted,
//! retries belong to the transport. Shutdown drains for at most
//! `shutdown_timeout`, then discards what is left.

use crate::config::AgentConfig;
use crate::event::{ExitEventRecord, SecurityEvent};
use crossbeam::queue::ArrayQueue;
use serde::Serialize;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sender side of the collector connection
pub trait Transport: Send + Sync {
    fn send_event(&self, event: &SecurityEvent) -> Result<(), TransportError>;

    fn send_exit_event(&self, exit_event: &ExitEventRecord) -> Result<(), TransportError>;
}

/// Bounded event queues drained by a sidecar thread
pub struct DispatchQueue {
    shared: Arc<Shared>,
    sidecar_handle: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    events: ArrayQueue<SecurityEvent>,
    exits: ArrayQueue<ExitEventRecord>,
    transport: Arc<dyn Transport>,
    shutdown: AtomicBool,
    shutdown_deadline: OnceLock<Instant>,
    batch_size: usize,
    idle_poll: Duration,
    shutdown_timeout: Duration,

    total_pushed: AtomicU64,
    total_dropped: AtomicU64,
    total_sent: AtomicU64,
    total_failed: AtomicU64,
    total_discarded: AtomicU64,
}

impl DispatchQueue {
    /// Create the queues and spawn the sidecar thread
    ///
    /// # Panics
    ///
    /// Panics if a capacity or the batch size is 0; [`AgentConfig::validate`]
    /// rejects such configurations first.
    pub fn new(config: &AgentConfig, transport: Arc<dyn Transport>) -> Self {
        assert!(config.queue_capacity > 0, "Dispatch queue capacity must be > 0");
        assert!(config.exit_queue_capacity > 0, "Exit queue capacity must be > 0");
        assert!(config.batch_size > 0, "Batch size must be > 0");

        let shared = Arc::new(Shared {
            events: ArrayQueue::new(config.queue_capacity),
            exits: ArrayQueue::new(config.exit_queue_capacity),
            transport,
            shutdown: AtomicBool::new(false),
            shutdown_deadline: OnceLock::new(),
            batch_size: config.batch_size,
            idle_poll: config.idle_poll(),
            shutdown_timeout: config.shutdown_timeout(),
            total_pushed: AtomicU64::new(0),
            total_dropped: AtomicU64::new(0),
            total_sent: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
            total_discarded: AtomicU64::new(0),
        });

        let worker_shared = Arc::clone(&shared);
        let sidecar_handle = thread::Builder::new()
            .name("vigil-dispatch".to_string())
            .spawn(move || Self::sidecar_worker(worker_shared))
            .map_err(|e| tracing::error!(error = %e, "failed to spawn dispatch sidecar"))
            .ok();

        Self {
            shared,
            sidecar_handle: Mutex::new(sidecar_handle),
        }
    }

    /// Enqueue a security event (hot path)
    ///
    /// Returns `false` if the event was dropped because the queue is full or
    /// the queue is shutting down.
    pub fn dispatch(&self, event: SecurityEvent) -> bool {
        if self.shared.shutdown.load(Ordering::Acquire) {
            self.shared.total_dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.shared.total_pushed.fetch_add(1, Ordering::Relaxed);

        match self.shared.events.push(event) {
            Ok(()) => true,
            Err(dropped) => {
                self.shared.total_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    execution_id = dropped.execution_id().unwrap_or_default(),
                    "dispatch queue full - event dropped (backpressure)"
                );
                false
            }
        }
    }

    /// Enqueue an exit event on the exit channel
    pub fn dispatch_exit(&self, exit_event: ExitEventRecord) -> bool {
        if self.shared.shutdown.load(Ordering::Acquire) {
            self.shared.total_dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.shared.total_pushed.fetch_add(1, Ordering::Relaxed);

        match self.shared.exits.push(exit_event) {
            Ok(()) => true,
            Err(dropped) => {
                self.shared.total_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    execution_id = %dropped.execution_id,
                    "exit queue full - exit event dropped (backpressure)"
                );
                false
            }
        }
    }

    /// Stop the sidecar, draining for at most the configured timeout
    ///
    /// Idempotent; later calls return immediately.
    pub fn shutdown(&self) {
        let _ = self
            .shared
            .shutdown_deadline
            .set(Instant::now() + self.shared.shutdown_timeout);
        self.shared.shutdown.store(true, Ordering::SeqCst);

        let handle = match self.sidecar_handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("dispatch sidecar panicked");
            }
        }

        // Pushes that raced the shutdown flag land after the sidecar's last drain.
        Self::discard_pending(&self.shared);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> QueueStats {
        let shared = &self.shared;
        QueueStats {
            total_pushed: shared.total_pushed.load(Ordering::Relaxed),
            total_dropped: shared.total_dropped.load(Ordering::Relaxed),
            total_sent: shared.total_sent.load(Ordering::Relaxed),
            total_failed: shared.total_failed.load(Ordering::Relaxed),
            total_discarded: shared.total_discarded.load(Ordering::Relaxed),
            events_pending: shared.events.len(),
            exits_pending: shared.exits.len(),
            capacity: shared.events.capacity(),
            exit_capacity: shared.exits.capacity(),
        }
    }

    fn sidecar_worker(shared: Arc<Shared>) {
        loop {
            if shared.shutdown.load(Ordering::SeqCst) {
                Self::drain_on_shutdown(&shared);
                break;
            }

            if Self::send_batch(&shared) == 0 {
                thread::sleep(shared.idle_poll);
            }
        }
    }

    /// Send up to `batch_size` items; returns how many were taken
    ///
    /// Stops early once the shutdown deadline has passed.
    fn send_batch(shared: &Shared) -> usize {
        let mut taken = 0;

        while taken < shared.batch_size && !Self::past_deadline(shared) {
            let Some(exit_event) = shared.exits.pop() else {
                break;
            };
            taken += 1;
            Self::record(shared, shared.transport.send_exit_event(&exit_event));
        }

        while taken < shared.batch_size && !Self::past_deadline(shared) {
            let Some(event) = shared.events.pop() else {
                break;
            };
            taken += 1;
            Self::record(shared, shared.transport.send_event(&event));
        }

        taken
    }

    fn past_deadline(shared: &Shared) -> bool {
        shared
            .shutdown_deadline
            .get()
            .is_some_and(|deadline| Instant::now() >= *deadline)
    }

    fn record(shared: &Shared, result: Result<(), TransportError>) {
        match result {
            Ok(()) => {
                shared.total_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                shared.total_failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "failed to send event to collector");
            }
        }
    }

    fn drain_on_shutdown(shared: &Shared) {
        while !Self::past_deadline(shared) {
            if Self::send_batch(shared) == 0 {
                break;
            }
        }

        Self::discard_pending(shared);
    }

    fn discard_pending(shared: &Shared) {
        let mut discarded = 0u64;
        while shared.exits.pop().is_some() {
            discarded += 1;
        }
        while shared.events.pop().is_some() {
            discarded += 1;
        }
        if discarded > 0 {
            shared.total_discarded.fetch_add(discarded, Ordering::Relaxed);
            tracing::warn!(discarded, "dispatch stopped - undelivered events discarded");
        }
    }
}

impl Drop for DispatchQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Dispatch queue statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct QueueStats {
    pub total_pushed: u64,
    pub total_dropped: u64,
    pub total_sent: u64,
    pub total_failed: u64,
    pub total_discarded: u64,
    pub events_pending: usize,
    pub exits_pending: usize,
    pub capacity: usize,
    pub exit_capacity: usize,
}

impl QueueStats {
    /// Calculate drop rate (0.0 to 1.0)
    pub fn drop_rate(&self) -> f64 {
        if self.total_pushed == 0 {
            0.0
        } else {
            self.total_dropped as f64 / self.total_pushed as f64
        }
    }

    /// Calculate event queue utilization (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        self.events_pending as f64 / self.capacity as f64
    }
}

/// Transport that keeps everything in memory
///
/// Used by the replay command and by tests to observe what the pipeline
/// emitted.
#[derive(Debug, Default)]
pub struct InMemoryTransport {
    events: Mutex<Vec<SecurityEvent>>,
    exit_events: Mutex<Vec<ExitEventRecord>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn exit_events(&self) -> Vec<ExitEventRecord> {
        self.exit_events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Wait until at least `count` events and exit events arrived in total
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.events().len() + self.exit_events().len() >= count {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

impl Transport for InMemoryTransport {
    fn send_event(&self, event: &SecurityEvent) -> Result<(), TransportError> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
        Ok(())
    }

    fn send_exit_event(&self, exit_event: &ExitEventRecord) -> Result<(), TransportError> {
        self.exit_events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(exit_event.clone());
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Envelope<'a> {
    Event(&'a SecurityEvent),
    ExitEvent(&'a ExitEventRecord),
}

/// Transport writing one JSON object per line
pub struct JsonLinesTransport<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesTransport<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_line(&self, envelope: &Envelope<'_>) -> Result<(), TransportError> {
        let line = serde_json::to_string(envelope)?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| TransportError::Unavailable("writer lock poisoned".to_string()))?;
        writeln!(writer, "{}", line)?;
        writer.flush()?;
        Ok(())
    }
}

impl<W: Write + Send> Transport for JsonLinesTransport<W> {
    fn send_event(&self, event: &SecurityEvent) -> Result<(), TransportError> {
        self.write_line(&Envelope::Event(event))
    }

    fn send_exit_event(&self, exit_event: &ExitEventRecord) -> Result<(), TransportError> {
        self.write_line(&Envelope::ExitEvent(exit_event))
    }
}

/// Transport that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

impl Transport for NullTransport {
    fn send_event(&self, _event: &SecurityEvent) -> Result<(), TransportError> {
        Ok(())
    }

    fn send_exit_event(&self, _exit_event: &ExitEventRecord) -> Result<(), TransportError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{CaseType, Operation};
    use crate::request_context::RequestContext;

    fn test_event(i: usize) -> SecurityEvent {
        let mut op = Operation::system_command("exec", format!("cmd {}", i));
        op.set_execution_id(format!("test:{}", i)).unwrap();
        SecurityEvent::new(op, &RequestContext::default())
    }

    fn test_config(capacity: usize) -> AgentConfig {
        AgentConfig {
            queue_capacity: capacity,
            exit_queue_capacity: capacity,
            idle_poll_ms: 1,
            ..AgentConfig::default()
        }
    }

    struct FailingTransport;

    impl Transport for FailingTransport {
        fn send_event(&self, _event: &SecurityEvent) -> Result<(), TransportError> {
            Err(TransportError::Unavailable("collector down".to_string()))
        }

        fn send_exit_event(&self, _exit: &ExitEventRecord) -> Result<(), TransportError> {
            Err(TransportError::Unavailable("collector down".to_string()))
        }
    }

    /// Blocks every send until released, so the queue can be filled
    struct GatedTransport {
        open: AtomicBool,
        inner: InMemoryTransport,
    }

    impl Transport for GatedTransport {
        fn send_event(&self, event: &SecurityEvent) -> Result<(), TransportError> {
            while !self.open.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(1));
            }
            self.inner.send_event(event)
        }

        fn send_exit_event(&self, exit: &ExitEventRecord) -> Result<(), TransportError> {
            self.inner.send_exit_event(exit)
        }
    }

    #[test]
    fn test_queue_creation() {
        let queue = DispatchQueue::new(&test_config(1024), Arc::new(NullTransport));
        let stats = queue.stats();
        assert_eq!(stats.capacity, 1024);
        assert_eq!(stats.events_pending, 0);
        assert_eq!(stats.total_pushed, 0);
        assert_eq!(stats.total_dropped, 0);
    }

    #[test]
    #[should_panic(expected = "Dispatch queue capacity must be > 0")]
    fn test_zero_capacity_panics() {
        let _ = DispatchQueue::new(&test_config(0), Arc::new(NullTransport));
    }

    #[test]
    fn test_events_reach_transport_in_order() {
        let transport = Arc::new(InMemoryTransport::new());
        let queue = DispatchQueue::new(&test_config(64), transport.clone());

        for i in 0..10 {
            assert!(queue.dispatch(test_event(i)));
        }
        assert!(transport.wait_for(10, Duration::from_secs(5)));

        let ids: Vec<String> = transport
            .events()
            .iter()
            .map(|e| e.execution_id().unwrap().to_string())
            .collect();
        let expected: Vec<String> = (0..10).map(|i| format!("test:{}", i)).collect();
        assert_eq!(ids, expected);
        queue.shutdown();
        assert_eq!(queue.stats().total_sent, 10);
    }

    #[test]
    fn test_exit_channel() {
        let transport = Arc::new(InMemoryTransport::new());
        let queue = DispatchQueue::new(&test_config(8), transport.clone());

        assert!(queue.dispatch_exit(ExitEventRecord {
            execution_id: "1:1:1".to_string(),
            case_type: CaseType::SqlDbCommand,
            fuzz_request_identifier_raw: "raw".to_string(),
        }));
        queue.shutdown();

        assert_eq!(transport.exit_events().len(), 1);
        assert!(transport.events().is_empty());
    }

    #[test]
    fn test_backpressure_drops_without_blocking() {
        let transport = Arc::new(GatedTransport {
            open: AtomicBool::new(false),
            inner: InMemoryTransport::new(),
        });
        let queue = DispatchQueue::new(&test_config(2), transport.clone());

        let accepted = (0..10).filter(|i| queue.dispatch(test_event(*i))).count();

        // At most one in flight at the gate plus two queued
        assert!(accepted <= 3, "accepted {}", accepted);
        let stats = queue.stats();
        assert_eq!(stats.total_pushed, 10);
        assert_eq!(stats.total_dropped as usize, 10 - accepted);
        assert!(stats.drop_rate() > 0.0);

        transport.open.store(true, Ordering::Release);
        queue.shutdown();
        assert_eq!(transport.inner.events().len(), accepted);
    }

    #[test]
    fn test_transport_failures_are_counted_not_raised() {
        let queue = DispatchQueue::new(&test_config(8), Arc::new(FailingTransport));
        assert!(queue.dispatch(test_event(1)));
        queue.shutdown();

        let stats = queue.stats();
        assert_eq!(stats.total_failed, 1);
        assert_eq!(stats.total_sent, 0);
    }

    #[test]
    fn test_dispatch_after_shutdown_is_dropped() {
        let queue = DispatchQueue::new(&test_config(8), Arc::new(NullTransport));
        queue.shutdown();
        queue.shutdown();
        assert!(queue.is_shutdown());
        assert!(!queue.dispatch(test_event(1)));
        assert_eq!(queue.stats().total_dropped, 1);
    }

    #[test]
    fn test_shutdown_discards_events_pushed_after_final_drain() {
        let queue = DispatchQueue::new(&test_config(8), Arc::new(NullTransport));
        queue.shutdown();

        // An enqueue that passed the shutdown check before the flag was set.
        assert!(queue.shared.events.push(test_event(1)).is_ok());
        queue.shutdown();

        let stats = queue.stats();
        assert_eq!(stats.events_pending, 0);
        assert_eq!(stats.total_discarded, 1);
    }

    #[test]
    fn test_shutdown_discards_after_deadline() {
        let transport = Arc::new(GatedTransport {
            open: AtomicBool::new(false),
            inner: InMemoryTransport::new(),
        });
        let config = AgentConfig {
            shutdown_timeout_ms: 20,
            ..test_config(16)
        };
        let queue = DispatchQueue::new(&config, transport.clone());
        for i in 0..5 {
            queue.dispatch(test_event(i));
        }

        let opener = {
            let transport = transport.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                transport.open.store(true, Ordering::Release);
            })
        };
        queue.shutdown();
        opener.join().unwrap();

        let stats = queue.stats();
        assert!(stats.total_discarded > 0);
        assert_eq!(stats.total_sent + stats.total_discarded, 5);
    }

    #[test]
    fn test_stats_rates() {
        let stats = QueueStats {
            total_pushed: 100,
            total_dropped: 5,
            events_pending: 50,
            capacity: 1024,
            ..QueueStats::default()
        };
        assert_eq!(stats.drop_rate(), 0.05);
        assert_eq!(stats.utilization(), 50.0 / 1024.0);
    }

    #[test]
    fn test_json_lines_transport() {
        let transport = JsonLinesTransport::new(Vec::new());
        transport.send_event(&test_event(7)).unwrap();
        transport
            .send_exit_event(&ExitEventRecord {
                execution_id: "e".to_string(),
                case_type: CaseType::Ldap,
                fuzz_request_identifier_raw: "r".to_string(),
            })
            .unwrap();

        let output = String::from_utf8(transport.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = output
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "event");
        assert_eq!(lines[0]["operation"]["execution_id"], "test:7");
        assert_eq!(lines[1]["type"], "exit_event");
        assert_eq!(lines[1]["case_type"], "LDAP");
    }
}
