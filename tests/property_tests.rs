//! Property-based tests for rust_structured_logger using proptest

use proptest::prelude::*;
use rust_structured_logger::destructure::{CapabilityCache, Destructurer};
use rust_structured_logger::prelude::*;
use rust_structured_logger::template::{CaptureHint, ParsedTemplate};
use rust_structured_logger::FieldSet;
use std::collections::HashMap;
use std::sync::Arc;

fn any_level() -> impl Strategy<Value = LogLevel> {
    prop_oneof![
        Just(LogLevel::Trace),
        Just(LogLevel::Debug),
        Just(LogLevel::Info),
        Just(LogLevel::Warn),
        Just(LogLevel::Error),
        Just(LogLevel::Fatal),
    ]
}

fn isolated(policy: DestructuringPolicy) -> Destructurer {
    Destructurer::with_capabilities(policy, Arc::new(CapabilityCache::new()))
}

// ============================================================================
// LogLevel Tests
// ============================================================================

proptest! {
    /// Test that LogLevel string conversions roundtrip correctly
    #[test]
    fn test_log_level_str_roundtrip(level in any_level()) {
        let parsed: LogLevel = level.to_str().parse().unwrap();
        prop_assert_eq!(level, parsed);
    }

    /// Test that LogLevel ordering is consistent with its numeric value
    #[test]
    fn test_log_level_ordering(level1 in any_level(), level2 in any_level()) {
        let val1 = level1 as u8;
        let val2 = level2 as u8;
        prop_assert_eq!(level1 <= level2, val1 <= val2);
        prop_assert_eq!(level1 > level2, val1 > val2);
    }

    /// Test that parsing accepts any letter case
    #[test]
    fn test_log_level_case_insensitive(level in any_level(), mask in any::<u8>()) {
        let mixed: String = level
            .to_str()
            .chars()
            .enumerate()
            .map(|(i, c)| if mask & (1 << (i % 8)) != 0 { c.to_ascii_lowercase() } else { c })
            .collect();
        prop_assert_eq!(mixed.parse::<LogLevel>(), Ok(level));
    }

    /// A level switch enables exactly the levels at or above its minimum
    #[test]
    fn test_level_switch_gate(min in any_level(), level in any_level()) {
        let switch = LevelSwitch::new(min);
        prop_assert_eq!(switch.is_enabled(level), level >= min);
    }
}

// ============================================================================
// Template Tests
// ============================================================================

proptest! {
    /// Parsing never loses text: token spans tile the input
    #[test]
    fn test_template_spans_cover_input(template in "\\PC{0,64}") {
        let parsed = ParsedTemplate::parse(&template);
        prop_assert_eq!(parsed.to_template_string(), template.clone());

        let mut cursor = 0;
        for token in parsed.tokens() {
            prop_assert_eq!(token.span().start, cursor);
            cursor = token.span().end;
        }
        prop_assert_eq!(cursor, template.len());
    }

    /// Text without braces renders unchanged
    #[test]
    fn test_plain_text_renders_verbatim(text in "[^{}]{0,64}") {
        let parsed = ParsedTemplate::parse(&text);
        prop_assert!(parsed.property_names().is_empty());
        prop_assert_eq!(parsed.render(|_| None), text);
    }

    /// Every well-formed placeholder becomes one distinct property name
    #[test]
    fn test_placeholder_names(names in prop::collection::vec("[A-Za-z_][A-Za-z0-9_]{0,8}", 1..6)) {
        let template = names
            .iter()
            .map(|n| format!("{{{}}}", n))
            .collect::<Vec<_>>()
            .join(" ");
        let parsed = ParsedTemplate::parse(&template);

        let mut expected: Vec<&str> = Vec::new();
        for name in &names {
            if !expected.contains(&name.as_str()) {
                expected.push(name);
            }
        }
        let actual: Vec<&str> = parsed.property_names().iter().map(|n| &**n).collect();
        prop_assert_eq!(actual, expected);
    }
}

// ============================================================================
// Destructuring Tests
// ============================================================================

proptest! {
    /// Sequences keep at most `max_collection_items` and count the rest
    #[test]
    fn test_fan_out_bound(values in prop::collection::vec(any::<u32>(), 0..50), limit in 1usize..20) {
        let d = isolated(DestructuringPolicy::default().with_max_collection_items(limit));
        let captured = d.destructure(&values, CaptureHint::Default);
        match captured.value {
            PropertyValue::Sequence { items, truncated } => {
                prop_assert_eq!(items.len(), values.len().min(limit));
                prop_assert_eq!(truncated as usize, values.len().saturating_sub(limit));
                prop_assert_eq!(captured.truncated, values.len() > limit);
            }
            other => prop_assert!(false, "unexpected capture {:?}", other),
        }
    }

    /// Strings never exceed the length bound plus the ellipsis
    #[test]
    fn test_string_bound(text in "\\PC{0,80}", limit in 1usize..40) {
        let d = isolated(DestructuringPolicy::default().with_max_string_length(limit));
        let captured = d.destructure(&text, CaptureHint::Default);
        let kept = captured.value.as_str().unwrap().chars().count();
        let original = text.chars().count();
        if original <= limit {
            prop_assert_eq!(kept, original);
            prop_assert!(!captured.truncated);
        } else {
            prop_assert_eq!(kept, limit + 3);
            prop_assert!(captured.truncated);
        }
    }

    /// Maps are captured with every entry while under the bound
    #[test]
    fn test_map_capture(entries in prop::collection::btree_map("[a-z]{1,6}", any::<i32>(), 0..20)) {
        let d = isolated(DestructuringPolicy::default());
        let captured = d.destructure(&entries, CaptureHint::Default).value;
        for (key, value) in &entries {
            prop_assert_eq!(captured.field(key), Some(&PropertyValue::from(i64::from(*value))));
        }
    }
}

// ============================================================================
// Field Set Tests
// ============================================================================

proptest! {
    /// Chained `extend` keeps one entry per name holding the last value,
    /// and never changes the parent
    #[test]
    fn test_field_merge_last_wins(
        steps in prop::collection::vec(
            prop::collection::vec(("[a-d]", any::<i64>()), 0..4),
            1..6,
        )
    ) {
        let mut fields = FieldSet::new();
        let mut expected: HashMap<String, i64> = HashMap::new();

        for step in &steps {
            let parent = fields.clone();
            let parent_len = parent.len();
            let pairs: Vec<Property> = step
                .iter()
                .map(|(name, value)| Property::new(name.as_str(), *value))
                .collect();
            fields = parent.extend(pairs);
            prop_assert_eq!(parent.len(), parent_len);

            for (name, value) in step {
                expected.insert(name.clone(), *value);
            }
        }

        prop_assert_eq!(fields.len(), expected.len());
        for (name, value) in &expected {
            prop_assert_eq!(fields.get(name), Some(&PropertyValue::from(*value)));
        }
    }
}

// ============================================================================
// Sampling Tests
// ============================================================================

proptest! {
    /// Every-nth sampling accepts ceil(count / n) events per key
    #[test]
    fn test_every_nth_count(n in 1u64..10, count in 0usize..60) {
        let memory = Arc::new(MemorySink::new());
        let sampler = Arc::new(SamplingFilter::every_nth(n));
        let logger = Logger::builder()
            .shared_filter(sampler.clone())
            .shared_sink(memory.clone())
            .build();

        for i in 0..count {
            logger.info("tick {N}", &[&i]);
        }
        let expected = (count as u64).div_ceil(n) as usize;
        prop_assert_eq!(memory.len(), expected);
        prop_assert_eq!(sampler.metrics().total_count(), count as u64);
    }

    /// The same seed yields the same decisions
    #[test]
    fn test_probabilistic_is_deterministic(seed in any::<u64>(), rate in 0.0f64..1.0) {
        let run = || {
            let memory = Arc::new(MemorySink::new());
            let logger = Logger::builder()
                .filter(SamplingFilter::probabilistic(rate, seed))
                .shared_sink(memory.clone())
                .build();
            for i in 0..50 {
                logger.info("event {N}", &[&i]);
            }
            memory.messages()
        };
        prop_assert_eq!(run(), run());
    }
}
