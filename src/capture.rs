//! Native stack capture for adapters running inside a Rust host
//!
//! Interception adapters for managed runtimes hand the pipeline frames they
//! obtained from their own runtime. An adapter written in Rust can use
//! [`capture_stack`] instead, which walks the current thread with the
//! `backtrace` crate and maps each resolved symbol onto a [`StackFrame`]:
//! the symbol path up to the last `::` becomes the declaring type and the
//! final segment the method name.

use crate::stack_frame::StackFrame;
use backtrace::Backtrace;

/// Maximum number of frames kept from a native capture
const MAX_STACK_DEPTH: usize = 128;

/// Symbol prefixes belonging to the capture machinery itself
const CAPTURE_INTERNAL_PREFIXES: &[&str] = &["backtrace::", "vigil::capture::capture_stack"];

/// Capture the calling thread's stack
///
/// Frame 0 of the result is the function that called `capture_stack`, which
/// matches the pipeline's convention that frame 0 is the registration call.
pub fn capture_stack() -> Vec<StackFrame> {
    let backtrace = Backtrace::new();
    let mut frames = Vec::with_capacity(32);

    for frame in backtrace.frames() {
        let symbols = frame.symbols();
        if symbols.is_empty() {
            frames.push(StackFrame::native(
                "<unknown>",
                format!("{:p}", frame.ip()),
            ));
            continue;
        }

        for symbol in symbols {
            let name = match symbol.name() {
                Some(name) => format!("{:#}", name),
                None => format!("{:p}", frame.ip()),
            };
            // Leading frames from the unwinder and this module are not part
            // of the caller's stack.
            if frames.is_empty()
                && CAPTURE_INTERNAL_PREFIXES
                    .iter()
                    .any(|prefix| name.starts_with(prefix))
            {
                continue;
            }

            let (declaring_type, method_name) = split_symbol(&name);
            let file_name = symbol
                .filename()
                .and_then(|path| path.file_name())
                .map(|file| file.to_string_lossy().into_owned());
            let line_number = frame_line(symbol.lineno());

            frames.push(StackFrame {
                declaring_type,
                method_name,
                native: file_name.is_none() && line_number < 0,
                file_name,
                line_number,
            });
        }

        if frames.len() >= MAX_STACK_DEPTH {
            break;
        }
    }

    frames.truncate(MAX_STACK_DEPTH);
    frames
}

/// Source line as a frame line number, -1 when unknown or out of range
fn frame_line(lineno: Option<u32>) -> i32 {
    lineno.and_then(|line| i32::try_from(line).ok()).unwrap_or(-1)
}

/// Split a demangled symbol path into (declaring type, method name)
fn split_symbol(symbol: &str) -> (String, String) {
    match symbol.rsplit_once("::") {
        Some((path, method)) => (path.to_string(), method.to_string()),
        None => (String::new(), symbol.to_string()),
    }
}
