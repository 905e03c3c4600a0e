//! Operation model: one intercepted, security-relevant library call
//!
//! Each vulnerability category carries its own payload shape. Instead of a
//! subtype per category, an [`Operation`] holds a [`CaseType`] discriminator
//! plus an [`OperationPayload`] variant, and the factories below build the
//! combinations the interception adapters produce.
//!
//! Identity fields (`execution_id`, `api_id`) are write-once: the setters
//! refuse a second assignment so an operation keeps the identity it was
//! dispatched with.

use crate::stack_frame::StackFrame;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Vulnerability category of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseType {
    SystemCommand,
    SqlDbCommand,
    NosqlDbCommand,
    DynamoDbCommand,
    FileOperation,
    HttpRequest,
    Ldap,
    Xpath,
    ReflectedXss,
    #[serde(rename = "TRUSTBOUNDARY")]
    TrustBoundary,
    SecureCookie,
    Crypto,
    Hash,
    Random,
}

impl CaseType {
    /// Stable discriminator used in API ids and on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseType::SystemCommand => "SYSTEM_COMMAND",
            CaseType::SqlDbCommand => "SQL_DB_COMMAND",
            CaseType::NosqlDbCommand => "NOSQL_DB_COMMAND",
            CaseType::DynamoDbCommand => "DYNAMO_DB_COMMAND",
            CaseType::FileOperation => "FILE_OPERATION",
            CaseType::HttpRequest => "HTTP_REQUEST",
            CaseType::Ldap => "LDAP",
            CaseType::Xpath => "XPATH",
            CaseType::ReflectedXss => "REFLECTED_XSS",
            CaseType::TrustBoundary => "TRUSTBOUNDARY",
            CaseType::SecureCookie => "SECURE_COOKIE",
            CaseType::Crypto => "CRYPTO",
            CaseType::Hash => "HASH",
            CaseType::Random => "RANDOM",
        }
    }
}

impl fmt::Display for CaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read/write/query classification of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OperationCategory {
    Read,
    Write,
    Query,
    Delete,
    Update,
    Execute,
    /// DynamoDB document/query API
    #[serde(rename = "DQL")]
    Dql,
    /// DynamoDB PartiQL statements
    #[serde(rename = "PartiQL")]
    PartiQl,
    #[default]
    Other,
}

/// One request issued through a NoSQL driver call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoSqlRequest {
    /// Vendor-specific query object, opaque to the pipeline
    pub query: serde_json::Value,

    /// "read", "write", "delete", "update", ...
    pub query_type: String,
}

/// Category-specific payload of an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationPayload {
    Sql {
        query: String,
        #[serde(default)]
        parameters: Vec<String>,
        #[serde(default)]
        db_vendor: Option<String>,
    },
    NoSql {
        requests: Vec<NoSqlRequest>,
    },
    TrustBoundary {
        key: String,
        value: serde_json::Value,
    },
    SecureCookie {
        /// "true" when the cookie was marked secure
        value: String,
    },
    SystemCommand {
        command: String,
    },
    File {
        path: String,
    },
    Http {
        url: String,
    },
    ReflectedXss {
        response_body: String,
    },
    Opaque {
        #[serde(default)]
        args: Vec<serde_json::Value>,
    },
}

impl OperationPayload {
    /// True if the payload carries nothing worth reporting
    pub fn is_empty(&self) -> bool {
        match self {
            OperationPayload::Sql { query, .. } => query.trim().is_empty(),
            OperationPayload::NoSql { requests } => requests.is_empty(),
            OperationPayload::TrustBoundary { key, .. } => key.is_empty(),
            OperationPayload::SecureCookie { value } => value.is_empty(),
            OperationPayload::SystemCommand { command } => command.trim().is_empty(),
            OperationPayload::File { path } => path.is_empty(),
            OperationPayload::Http { url } => url.is_empty(),
            OperationPayload::ReflectedXss { response_body } => response_body.is_empty(),
            OperationPayload::Opaque { args } => args.is_empty(),
        }
    }
}

/// Frame the operation was attributed to, and whether user code reached it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserClassEntity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame: Option<StackFrame>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub called_by_user_code: Option<bool>,
}

impl UserClassEntity {
    pub fn is_empty(&self) -> bool {
        self.frame.is_none() && self.called_by_user_code.is_none()
    }
}

/// Errors raised when an operation's identity is mutated
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    #[error("execution id already assigned: {0}")]
    ExecutionIdAlreadySet(String),

    #[error("api id already assigned: {0}")]
    ApiIdAlreadySet(String),
}

/// An intercepted library call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub case_type: CaseType,
    pub method_name: String,
    #[serde(default)]
    pub category: OperationCategory,
    pub payload: OperationPayload,

    /// Frame 0 is the registration call; only ever truncated after capture
    #[serde(default)]
    pub call_stack: Vec<StackFrame>,

    #[serde(default)]
    pub source_method: Option<String>,

    /// Assigned by the pipeline only; never read from input documents
    #[serde(skip_deserializing)]
    api_id: Option<String>,

    #[serde(skip_deserializing)]
    execution_id: Option<String>,

    /// Capture timestamp (epoch milliseconds)
    #[serde(default)]
    pub start_time: u64,

    #[serde(default, skip_serializing_if = "UserClassEntity::is_empty")]
    pub user_class_entity: UserClassEntity,
}

impl Operation {
    /// Create an operation with an explicit payload
    pub fn new(
        case_type: CaseType,
        method_name: impl Into<String>,
        category: OperationCategory,
        payload: OperationPayload,
    ) -> Self {
        Self {
            case_type,
            method_name: method_name.into(),
            category,
            payload,
            call_stack: Vec::new(),
            source_method: None,
            api_id: None,
            execution_id: None,
            start_time: 0,
            user_class_entity: UserClassEntity::default(),
        }
    }

    pub fn sql(
        method_name: impl Into<String>,
        query: impl Into<String>,
        parameters: Vec<String>,
        db_vendor: Option<String>,
    ) -> Self {
        Self::new(
            CaseType::SqlDbCommand,
            method_name,
            OperationCategory::Query,
            OperationPayload::Sql {
                query: query.into(),
                parameters,
                db_vendor,
            },
        )
    }

    pub fn nosql(
        method_name: impl Into<String>,
        category: OperationCategory,
        requests: Vec<NoSqlRequest>,
    ) -> Self {
        Self::new(
            CaseType::NosqlDbCommand,
            method_name,
            category,
            OperationPayload::NoSql { requests },
        )
    }

    pub fn dynamodb(
        method_name: impl Into<String>,
        category: OperationCategory,
        requests: Vec<NoSqlRequest>,
    ) -> Self {
        Self::new(
            CaseType::DynamoDbCommand,
            method_name,
            category,
            OperationPayload::NoSql { requests },
        )
    }

    pub fn trust_boundary(
        method_name: impl Into<String>,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        Self::new(
            CaseType::TrustBoundary,
            method_name,
            OperationCategory::Write,
            OperationPayload::TrustBoundary {
                key: key.into(),
                value,
            },
        )
    }

    pub fn secure_cookie(method_name: impl Into<String>, secure: bool) -> Self {
        Self::new(
            CaseType::SecureCookie,
            method_name,
            OperationCategory::Write,
            OperationPayload::SecureCookie {
                value: secure.to_string(),
            },
        )
    }

    pub fn system_command(method_name: impl Into<String>, command: impl Into<String>) -> Self {
        Self::new(
            CaseType::SystemCommand,
            method_name,
            OperationCategory::Execute,
            OperationPayload::SystemCommand {
                command: command.into(),
            },
        )
    }

    pub fn file_operation(
        method_name: impl Into<String>,
        category: OperationCategory,
        path: impl Into<String>,
    ) -> Self {
        Self::new(
            CaseType::FileOperation,
            method_name,
            category,
            OperationPayload::File { path: path.into() },
        )
    }

    pub fn http_request(method_name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(
            CaseType::HttpRequest,
            method_name,
            OperationCategory::Read,
            OperationPayload::Http { url: url.into() },
        )
    }

    /// Reflected XSS operations take the request's service trace as their stack
    pub fn reflected_xss(method_name: impl Into<String>, response_body: impl Into<String>) -> Self {
        Self::new(
            CaseType::ReflectedXss,
            method_name,
            OperationCategory::Write,
            OperationPayload::ReflectedXss {
                response_body: response_body.into(),
            },
        )
    }

    /// Attach the captured call stack
    pub fn with_call_stack(mut self, call_stack: Vec<StackFrame>) -> Self {
        self.call_stack = call_stack;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn api_id(&self) -> Option<&str> {
        self.api_id.as_deref()
    }

    pub fn execution_id(&self) -> Option<&str> {
        self.execution_id.as_deref()
    }

    pub fn set_api_id(&mut self, api_id: String) -> Result<(), OperationError> {
        if let Some(existing) = &self.api_id {
            return Err(OperationError::ApiIdAlreadySet(existing.clone()));
        }
        self.api_id = Some(api_id);
        Ok(())
    }

    pub fn set_execution_id(&mut self, execution_id: String) -> Result<(), OperationError> {
        if let Some(existing) = &self.execution_id {
            return Err(OperationError::ExecutionIdAlreadySet(existing.clone()));
        }
        self.execution_id = Some(execution_id);
        Ok(())
    }
}
