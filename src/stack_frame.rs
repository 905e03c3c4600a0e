//! Call stack frames as seen by the pipeline
//!
//! A frame is the host runtime's view of one activation: the declaring type,
//! the method, and (when the runtime knows it) the source location. Frames
//! are pure data here; capturing them is the job of the interception
//! adapters (see [`crate::capture`] for the native Rust helper).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Line number reported by common runtimes for native frames
pub const NATIVE_LINE_NUMBER: i32 = -2;

/// A single stack frame
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StackFrame {
    /// Fully qualified declaring type (e.g. `com.acme.orders.OrderDao`)
    pub declaring_type: String,

    /// Method name
    pub method_name: String,

    /// Source file name, if the runtime resolved one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,

    /// Source line number (negative = unknown)
    #[serde(default = "unknown_line")]
    pub line_number: i32,

    /// Whether this frame is a native method
    #[serde(default)]
    pub native: bool,
}

fn unknown_line() -> i32 {
    -1
}

impl StackFrame {
    /// Create a frame with a resolved source location
    pub fn new(
        declaring_type: impl Into<String>,
        method_name: impl Into<String>,
        file_name: impl Into<String>,
        line_number: i32,
    ) -> Self {
        Self {
            declaring_type: declaring_type.into(),
            method_name: method_name.into(),
            file_name: Some(file_name.into()),
            line_number,
            native: false,
        }
    }

    /// Create a native frame (no source location)
    pub fn native(declaring_type: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            declaring_type: declaring_type.into(),
            method_name: method_name.into(),
            file_name: None,
            line_number: NATIVE_LINE_NUMBER,
            native: true,
        }
    }

    /// Create a frame whose source location could not be resolved
    pub fn unresolved(declaring_type: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            declaring_type: declaring_type.into(),
            method_name: method_name.into(),
            file_name: None,
            line_number: -1,
            native: false,
        }
    }

    /// True if the declaring type starts with any of `prefixes`
    pub fn in_namespace<S: AsRef<str>>(&self, prefixes: &[S]) -> bool {
        prefixes
            .iter()
            .any(|prefix| self.declaring_type.starts_with(prefix.as_ref()))
    }

    /// True if both frames name the same method of the same type
    pub fn same_method(&self, other: &StackFrame) -> bool {
        self.declaring_type == other.declaring_type && self.method_name == other.method_name
    }

    /// Stable 64-bit hash of every field (FNV-1a)
    ///
    /// Unlike `std`'s `DefaultHasher`, FNV is unseeded, so the value is
    /// identical across runs of the process.
    pub fn frame_hash(&self) -> u64 {
        let mut hasher = fnv::FnvHasher::default();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.declaring_type, self.method_name)?;
        if self.native {
            return write!(f, "(Native Method)");
        }
        match (&self.file_name, self.line_number) {
            (Some(file), line) if line >= 0 => write!(f, "({}:{})", file, line),
            (Some(file), _) => write!(f, "({})", file),
            (None, _) => write!(f, "(Unknown Source)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_location() {
        let frame = StackFrame::new("com.acme.OrderDao", "find", "OrderDao.java", 42);
        assert_eq!(frame.to_string(), "com.acme.OrderDao.find(OrderDao.java:42)");
    }

    #[test]
    fn test_display_native() {
        let frame = StackFrame::native("sun.reflect.NativeMethodAccessorImpl", "invoke0");
        assert_eq!(
            frame.to_string(),
            "sun.reflect.NativeMethodAccessorImpl.invoke0(Native Method)"
        );
    }

    #[test]
    fn test_display_unknown_line_and_source() {
        let mut frame = StackFrame::new("a.B", "c", "B.java", -1);
        assert_eq!(frame.to_string(), "a.B.c(B.java)");

        frame.file_name = None;
        assert_eq!(frame.to_string(), "a.B.c(Unknown Source)");
    }

    #[test]
    fn test_frame_hash_is_deterministic() {
        let a = StackFrame::new("a.B", "c", "B.java", 10);
        let b = StackFrame::new("a.B", "c", "B.java", 10);
        assert_eq!(a.frame_hash(), b.frame_hash());
    }

    #[test]
    fn test_frame_hash_depends_on_line() {
        let a = StackFrame::new("a.B", "c", "B.java", 10);
        let b = StackFrame::new("a.B", "c", "B.java", 11);
        assert_ne!(a.frame_hash(), b.frame_hash());
    }

    #[test]
    fn test_in_namespace() {
        let frame = StackFrame::new("com.newrelic.agent.Hook", "run", "Hook.java", 1);
        assert!(frame.in_namespace(&["com.nr.", "com.newrelic."]));
        assert!(!frame.in_namespace(&["org.apache."]));
        assert!(!frame.in_namespace::<&str>(&[]));
    }

    #[test]
    fn test_same_method_ignores_location() {
        let a = StackFrame::new("a.B", "c", "B.java", 10);
        let b = StackFrame::new("a.B", "c", "B.java", 99);
        assert!(a.same_method(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn test_deserialize_defaults() {
        let frame: StackFrame =
            serde_json::from_str(r#"{"declaring_type":"a.B","method_name":"c"}"#).unwrap();
        assert_eq!(frame.line_number, -1);
        assert!(frame.file_name.is_none());
        assert!(!frame.native);
    }
}
