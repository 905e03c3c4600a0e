//! Property-based tests for normalization and fingerprinting
//!
//! Properties covered:
//! 1. Determinism: equal stacks yield equal API ids
//! 2. Sensitivity: changing a retained frame changes the API id
//! 3. Bounded depth: nothing below the service entry point survives
//! 4. Self-filtering: all-agent stacks are always dropped
//! 5. Attribution never panics and only picks frames from the stack

use proptest::prelude::*;
use vigil::attribution::attribute;
use vigil::config::AgentConfig;
use vigil::fingerprint::{api_id_or_undefined, UNDEFINED_API_ID};
use vigil::internal_filter::InternalCallFilter;
use vigil::normalizer::{StackNormalizer, SERVICE_ENTRY_SLACK};
use vigil::operation::CaseType;
use vigil::request_context::RequestMetaData;
use vigil::StackFrame;

fn user_frame() -> impl Strategy<Value = StackFrame> {
    ("[a-z]{2,6}", "[A-Z][a-z]{2,8}", "[a-z]{3,8}", 1i32..5000).prop_map(|(pkg, class, method, line)| {
        StackFrame::new(
            format!("org.{}.{}", pkg, class),
            method,
            format!("{}.java", class),
            line,
        )
    })
}

fn agent_frame() -> impl Strategy<Value = StackFrame> {
    ("[A-Z][a-z]{2,8}", "[a-z]{3,8}", 1i32..500).prop_map(|(class, method, line)| {
        StackFrame::new(
            format!("com.newrelic.agent.{}", class),
            method,
            format!("{}.java", class),
            line,
        )
    })
}

fn registration() -> StackFrame {
    StackFrame::new(
        "com.newrelic.api.agent.security.Agent",
        "registerOperation",
        "Agent.java",
        210,
    )
}

fn case_type() -> impl Strategy<Value = CaseType> {
    prop_oneof![
        Just(CaseType::SqlDbCommand),
        Just(CaseType::SystemCommand),
        Just(CaseType::FileOperation),
        Just(CaseType::HttpRequest),
        Just(CaseType::Ldap),
    ]
}

fn fingerprint(mut stack: Vec<StackFrame>, case: CaseType) -> String {
    let normalizer = StackNormalizer::from_config(&AgentConfig::default());
    let mut meta = RequestMetaData::default();
    let trace = normalizer.normalize(&mut stack, &mut meta);
    api_id_or_undefined(case, &trace.id_hashes, trace.source_method.as_deref())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_fingerprint_is_deterministic(
        frames in prop::collection::vec(user_frame(), 1..30),
        case in case_type(),
    ) {
        let mut stack = vec![registration()];
        stack.extend(frames);

        let a = fingerprint(stack.clone(), case);
        let b = fingerprint(stack, case);
        prop_assert_eq!(&a, &b);
        prop_assert!(a.starts_with(case.as_str()));
        prop_assert_ne!(a, UNDEFINED_API_ID);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_changing_a_retained_frame_changes_id(
        frames in prop::collection::vec(user_frame(), 1..20),
        index in any::<prop::sample::Index>(),
        bump in 1i32..100,
    ) {
        let mut stack = vec![registration()];
        stack.extend(frames);
        let original = fingerprint(stack.clone(), CaseType::SqlDbCommand);

        let i = 1 + index.index(stack.len() - 1);
        stack[i].line_number += bump;
        let changed = fingerprint(stack, CaseType::SqlDbCommand);

        prop_assert_ne!(original, changed);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_depth_bounded_by_service_entry(
        len in 0usize..200,
        service_len in 0usize..200,
    ) {
        let mut stack: Vec<StackFrame> = (0..len)
            .map(|i| StackFrame::new("org.app.Frame", "call", "Frame.java", i as i32 + 1))
            .collect();
        StackNormalizer::bound_to_service_entry(&mut stack, service_len);

        let expected = (len + SERVICE_ENTRY_SLACK).saturating_sub(service_len).min(len);
        prop_assert_eq!(stack.len(), expected);
        // The innermost frames are the ones kept.
        for (i, frame) in stack.iter().enumerate() {
            prop_assert_eq!(frame.line_number, i as i32 + 1);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_all_agent_stack_is_filtered(frames in prop::collection::vec(agent_frame(), 1..20)) {
        let filter = InternalCallFilter::from_config(&AgentConfig::default());
        let mut stack = vec![registration()];
        stack.extend(frames);
        prop_assert!(filter.is_agent_generated(&stack));
    }

    #[test]
    fn prop_user_only_stack_is_not_filtered(frames in prop::collection::vec(user_frame(), 1..20)) {
        let filter = InternalCallFilter::from_config(&AgentConfig::default());
        let mut stack = vec![registration()];
        stack.extend(frames);
        prop_assert!(!filter.is_agent_generated(&stack));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_attribution_picks_a_stack_frame(
        frames in prop::collection::vec(user_frame(), 0..20),
        service in prop::collection::vec(user_frame(), 0..3),
        user_level in any::<bool>(),
    ) {
        let meta = RequestMetaData {
            service_trace: service,
            user_level_service_method_encountered: user_level,
            ..RequestMetaData::default()
        };
        let source_method = frames.first().map(ToString::to_string);
        let entity = attribute(&frames, source_method.as_deref(), &meta);

        if let Some(frame) = &entity.frame {
            prop_assert!(frames.contains(frame));
            prop_assert_eq!(entity.called_by_user_code, Some(user_level));
        } else {
            prop_assert!(entity.called_by_user_code.is_none());
        }
    }
}
