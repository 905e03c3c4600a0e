//! User-code attribution
//!
//! Finds the frame of the request's own service code that led to an
//! operation. The baseline is the first frame of the service trace captured
//! when the host entered its service method.
//!
//! Two rules are evaluated for every frame, in this order:
//!
//! 1. the frame names the same method as `service_trace[0]`: attribute to it
//!    and stop;
//! 2. the frame's string form equals the operation's source method and a
//!    next frame exists: attribute to the next frame and keep walking.
//!
//! Rule 2 is not an `else` branch of rule 1. When the source method appears
//! before the service frame, rule 2 records a provisional attribution that a
//! later rule 1 match replaces; when it appears more than once, the last
//! occurrence wins. `tests::test_secondary_rule_*` pin this order.

use crate::operation::UserClassEntity;
use crate::request_context::RequestMetaData;
use crate::stack_frame::StackFrame;

/// Attribute an operation's normalized stack to user code
pub fn attribute(
    stack: &[StackFrame],
    source_method: Option<&str>,
    meta: &RequestMetaData,
) -> UserClassEntity {
    let mut entity = UserClassEntity::default();
    let service_frame = meta.service_trace.first();
    let called_by_user_code = meta.user_level_service_method_encountered;

    for (i, frame) in stack.iter().enumerate() {
        if let Some(service_frame) = service_frame {
            if frame.same_method(service_frame) {
                entity.frame = Some(frame.clone());
                entity.called_by_user_code = Some(called_by_user_code);
                return entity;
            }
        }

        if let (Some(source_method), Some(next)) = (source_method, stack.get(i + 1)) {
            if frame.to_string() == source_method {
                entity.frame = Some(next.clone());
                entity.called_by_user_code = Some(called_by_user_code);
            }
        }
    }

    entity
}
