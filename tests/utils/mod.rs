// Integration Test Utilities
//
// Builders for the stacks, requests and agents shared by the pipeline tests.
#![allow(dead_code)]

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vigil::config::AgentConfig;
use vigil::dispatch::InMemoryTransport;
use vigil::operation::Operation;
use vigil::request_context::{HttpRequest, RequestContext};
use vigil::{SecurityAgent, StackFrame};

pub const WAIT: Duration = Duration::from_secs(2);

/// Java-style frame with a source file named after the class
pub fn frame(declaring_type: &str, method: &str, line: i32) -> StackFrame {
    let class = declaring_type.rsplit('.').next().unwrap_or(declaring_type);
    StackFrame::new(declaring_type, method, format!("{}.java", class), line)
}

pub fn registration_frame() -> StackFrame {
    frame("com.newrelic.api.agent.security.Agent", "registerOperation", 210)
}

pub fn servlet_frame() -> StackFrame {
    frame("com.acme.orders.OrderServlet", "doGet", 31)
}

/// Service trace as captured at container entry: user servlet, then container frames
pub fn service_trace() -> Vec<StackFrame> {
    vec![
        servlet_frame(),
        frame("org.apache.catalina.core.ApplicationFilterChain", "doFilter", 166),
        frame("org.apache.catalina.core.StandardWrapperValve", "invoke", 199),
        frame("org.apache.catalina.connector.CoyoteAdapter", "service", 342),
    ]
}

/// Stack of a JDBC call made from the order DAO, below `service_trace()`
pub fn jdbc_stack(dao_line: i32) -> Vec<StackFrame> {
    let mut stack = vec![
        registration_frame(),
        frame("com.nr.instrumentation.jdbc.PreparedStatement_Instrumentation", "executeQuery", 44),
        frame("org.postgresql.jdbc.PgPreparedStatement", "executeQuery", 120),
        frame("com.acme.orders.OrderDao", "findById", dao_line),
    ];
    stack.extend(service_trace());
    stack
}

pub fn sql_operation(dao_line: i32) -> Operation {
    Operation::sql(
        "executeQuery",
        "select * from orders where id = ?",
        vec!["7".to_string()],
        Some("PostgreSQL".to_string()),
    )
    .with_call_stack(jdbc_stack(dao_line))
}

pub fn request_context() -> RequestContext {
    let request = HttpRequest {
        method: "GET".to_string(),
        url: "/orders/7".to_string(),
        client_ip: "10.0.0.8".to_string(),
        ..HttpRequest::default()
    };
    RequestContext::new(request, service_trace())
}

pub fn agent_with(config: AgentConfig) -> (SecurityAgent, Arc<InMemoryTransport>) {
    let transport = Arc::new(InMemoryTransport::new());
    let agent = SecurityAgent::initialise(config, transport.clone()).expect("agent initialises");
    (agent, transport)
}

pub fn agent() -> (SecurityAgent, Arc<InMemoryTransport>) {
    agent_with(AgentConfig::default())
}

/// Writer collecting formatted log output for assertions
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    /// Run `f` with a thread-local subscriber writing into this capture
    pub fn capture<R>(&self, f: impl FnOnce() -> R) -> R {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f)
    }
}

impl Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
