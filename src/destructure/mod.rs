//! Destructuring of log arguments into property trees
//!
//! Arguments are captured through their `serde::Serialize` implementation
//! by a serializer that enforces a [`DestructuringPolicy`]. Values whose
//! type has a registered [`LogValueProvider`] are replaced by the
//! provider's output wherever they appear in the tree.

pub mod arg;
pub mod capability;
pub mod capture;

pub use arg::LogArg;
pub use capability::{CapabilityCache, LogValueProvider};
pub use capture::{CaptureError, Capturer};

use crate::core::property::{PropertyValue, Scalar};
use crate::core::selflog;
use crate::template::CaptureHint;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Bounds applied while capturing a value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestructuringPolicy {
    /// Nesting levels kept below the top-level value
    pub max_depth: usize,
    /// Children kept per sequence, mapping or structure
    pub max_collection_items: usize,
    /// Characters kept per string
    pub max_string_length: usize,
    /// Capture plain structures field by field without an `@` hint
    pub structs_by_default: bool,
}

impl Default for DestructuringPolicy {
    fn default() -> Self {
        Self {
            max_depth: 5,
            max_collection_items: 100,
            max_string_length: 1000,
            structs_by_default: false,
        }
    }
}

impl DestructuringPolicy {
    #[must_use = "builder methods return a new value"]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn with_max_collection_items(mut self, items: usize) -> Self {
        self.max_collection_items = items;
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn with_max_string_length(mut self, length: usize) -> Self {
        self.max_string_length = length;
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn with_structs_by_default(mut self, enabled: bool) -> Self {
        self.structs_by_default = enabled;
        self
    }
}

/// Result of destructuring one argument
#[derive(Debug, Clone, PartialEq)]
pub struct Captured {
    pub value: PropertyValue,
    /// A bound cut something out of `value`
    pub truncated: bool,
}

/// Turns arguments into [`PropertyValue`]s
///
/// # Example
///
/// ```
/// use rust_structured_logger::destructure::{Destructurer, DestructuringPolicy};
/// use rust_structured_logger::template::CaptureHint;
/// use serde::Serialize;
///
/// #[derive(Serialize)]
/// struct Request {
///     path: &'static str,
///     method: &'static str,
/// }
///
/// let destructurer = Destructurer::new(DestructuringPolicy::default());
/// let request = Request { path: "/login", method: "POST" };
///
/// let structured = destructurer.destructure(&request, CaptureHint::Structure);
/// assert_eq!(structured.value.field("path").and_then(|v| v.as_str()), Some("/login"));
///
/// let text = destructurer.destructure(&request, CaptureHint::Default);
/// assert_eq!(text.value.as_str(), Some("Request { path: \"/login\", method: \"POST\" }"));
/// ```
#[derive(Debug, Clone)]
pub struct Destructurer {
    policy: DestructuringPolicy,
    capabilities: Arc<CapabilityCache>,
}

impl Destructurer {
    /// Destructurer backed by the process-wide capability cache
    pub fn new(policy: DestructuringPolicy) -> Self {
        Self::with_capabilities(policy, CapabilityCache::global())
    }

    pub fn with_capabilities(policy: DestructuringPolicy, capabilities: Arc<CapabilityCache>) -> Self {
        Self {
            policy,
            capabilities,
        }
    }

    pub fn policy(&self) -> &DestructuringPolicy {
        &self.policy
    }

    pub fn capabilities(&self) -> &Arc<CapabilityCache> {
        &self.capabilities
    }

    /// Capture `arg` under `hint`
    ///
    /// Never fails: a value whose serialization errors or panics is
    /// replaced by a `"<capture failed: ...>"` string.
    pub fn destructure(&self, arg: &dyn LogArg, hint: CaptureHint) -> Captured {
        let capturer = Capturer::new(&self.policy, &self.capabilities);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| arg.capture(&capturer)));

        let value = match outcome {
            Ok(Ok(value)) => value,
            Ok(Err(err)) => {
                selflog::report("destructure", format_args!("capture failed: {}", err));
                return failed(err.to_string());
            }
            Err(payload) => {
                let message = selflog::panic_message(payload.as_ref());
                selflog::report("destructure", format_args!("capture panicked: {}", message));
                return failed(message);
            }
        };

        let mut truncated = capturer.was_truncated();
        let value = match hint {
            CaptureHint::Structure => value,
            CaptureHint::Stringify => self.stringify(value, &mut truncated),
            CaptureHint::Default => match value {
                PropertyValue::Structure { .. } if !self.policy.structs_by_default => {
                    self.stringify(value, &mut truncated)
                }
                other => other,
            },
        };

        Captured { value, truncated }
    }

    fn stringify(&self, value: PropertyValue, truncated: &mut bool) -> PropertyValue {
        if let PropertyValue::Scalar(Scalar::Str(_)) = value {
            return value;
        }
        let mut text = value.to_string();
        if let Some((cut, _)) = text.char_indices().nth(self.policy.max_string_length) {
            text.truncate(cut);
            text.push_str("...");
            *truncated = true;
        }
        PropertyValue::str(text)
    }
}

impl Default for Destructurer {
    fn default() -> Self {
        Self::new(DestructuringPolicy::default())
    }
}

fn failed(message: String) -> Captured {
    Captured {
        value: PropertyValue::str(format!("<capture failed: {}>", message)),
        truncated: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::ser::{Error as _, Serializer};
    use serde::Serialize;
    use std::collections::BTreeMap;

    #[derive(Serialize)]
    struct Credentials {
        user: String,
        password: String,
    }

    #[derive(Serialize)]
    struct Login {
        attempt: u32,
        credentials: Credentials,
    }

    #[derive(Serialize)]
    struct Node {
        value: u32,
        next: Option<Box<Node>>,
    }

    struct Broken;

    impl Serialize for Broken {
        fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("socket is gone"))
        }
    }

    struct Exploding;

    impl Serialize for Exploding {
        fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            panic!("boom")
        }
    }

    fn isolated(policy: DestructuringPolicy) -> Destructurer {
        Destructurer::with_capabilities(policy, Arc::new(CapabilityCache::new()))
    }

    fn chain(len: u32) -> Node {
        (0..len).fold(Node { value: len, next: None }, |next, value| Node {
            value,
            next: Some(Box::new(next)),
        })
    }

    #[test]
    fn test_scalars_pass_through() {
        let d = isolated(DestructuringPolicy::default());
        assert_eq!(d.destructure(&42i32, CaptureHint::Default).value, PropertyValue::from(42i64));
        assert_eq!(d.destructure(&true, CaptureHint::Structure).value, PropertyValue::from(true));
        assert_eq!(d.destructure(&"plain", CaptureHint::Default).value, PropertyValue::str("plain"));
        assert_eq!(d.destructure(&None::<u8>, CaptureHint::Default).value, PropertyValue::null());
    }

    #[test]
    fn test_stringify_hint() {
        let d = isolated(DestructuringPolicy::default());
        let captured = d.destructure(&vec![1, 2, 3], CaptureHint::Stringify);
        assert_eq!(captured.value, PropertyValue::str("[1, 2, 3]"));
    }

    #[test]
    fn test_default_hint_keeps_collections() {
        let d = isolated(DestructuringPolicy::default());
        let mut map = BTreeMap::new();
        map.insert("region", 3);
        let captured = d.destructure(&map, CaptureHint::Default);
        assert!(matches!(captured.value, PropertyValue::Mapping { .. }));
        assert_eq!(captured.value.field("region"), Some(&PropertyValue::from(3i64)));
    }

    #[test]
    fn test_structs_by_default_policy() {
        let d = isolated(DestructuringPolicy::default().with_structs_by_default(true));
        let login = Login {
            attempt: 1,
            credentials: Credentials {
                user: "ann".into(),
                password: "hunter2".into(),
            },
        };
        let captured = d.destructure(&login, CaptureHint::Default);
        match &captured.value {
            PropertyValue::Structure { type_tag, fields, .. } => {
                assert_eq!(type_tag.as_deref(), Some("Login"));
                assert_eq!(fields.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_provider_redacts_nested_values() {
        let caps = Arc::new(CapabilityCache::new());
        caps.register("Credentials", |captured: PropertyValue| match captured {
            PropertyValue::Structure {
                type_tag,
                fields,
                truncated,
            } => PropertyValue::Structure {
                type_tag,
                fields: fields
                    .into_iter()
                    .map(|mut p| {
                        if &*p.name == "password" {
                            p.value = PropertyValue::str("***");
                        }
                        p
                    })
                    .collect(),
                truncated,
            },
            other => other,
        })
        .unwrap();

        let d = Destructurer::with_capabilities(DestructuringPolicy::default(), caps);
        let login = Login {
            attempt: 3,
            credentials: Credentials {
                user: "ann".into(),
                password: "hunter2".into(),
            },
        };
        let captured = d.destructure(&login, CaptureHint::Structure);
        let credentials = captured.value.field("credentials").unwrap();
        assert_eq!(credentials.field("password").unwrap().as_str(), Some("***"));
        assert!(!captured.value.to_json().to_string().contains("hunter2"));
    }

    #[test]
    fn test_depth_bound_truncates() {
        let d = isolated(DestructuringPolicy::default().with_max_depth(2));
        let captured = d.destructure(&chain(6), CaptureHint::Structure);
        assert!(captured.truncated);
        assert!(captured.value.is_truncated());

        let level2 = captured
            .value
            .field("next")
            .and_then(|v| v.field("next"))
            .unwrap();
        match level2 {
            PropertyValue::Structure { fields, truncated, .. } => {
                assert!(fields.is_empty());
                assert_eq!(*truncated, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_fan_out_and_string_bounds() {
        let d = isolated(
            DestructuringPolicy::default()
                .with_max_collection_items(3)
                .with_max_string_length(4),
        );
        let captured = d.destructure(&(0..10).collect::<Vec<u32>>(), CaptureHint::Default);
        match &captured.value {
            PropertyValue::Sequence { items, truncated } => {
                assert_eq!(items.len(), 3);
                assert_eq!(*truncated, 7);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(captured.truncated);

        let clipped = d.destructure(&"abcdefgh", CaptureHint::Default);
        assert_eq!(clipped.value, PropertyValue::str("abcd..."));
        assert!(clipped.truncated);
    }

    #[test]
    fn test_failing_serialize_is_contained() {
        let d = isolated(DestructuringPolicy::default());
        let captured = d.destructure(&Broken, CaptureHint::Structure);
        assert_eq!(captured.value, PropertyValue::str("<capture failed: socket is gone>"));

        let captured = d.destructure(&Exploding, CaptureHint::Default);
        assert_eq!(captured.value, PropertyValue::str("<capture failed: boom>"));
    }

    #[test]
    fn test_enum_variants() {
        #[derive(Serialize)]
        enum Shape {
            Unit,
            Circle(f64),
            Rect { w: u32, h: u32 },
        }

        let d = isolated(DestructuringPolicy::default());
        assert_eq!(
            d.destructure(&Shape::Unit, CaptureHint::Structure).value,
            PropertyValue::str("Unit")
        );
        let circle = d.destructure(&Shape::Circle(1.5), CaptureHint::Structure).value;
        assert_eq!(circle.field("Value"), Some(&PropertyValue::from(1.5f64)));
        let rect = d.destructure(&Shape::Rect { w: 2, h: 3 }, CaptureHint::Structure).value;
        assert_eq!(rect.to_string(), "Rect { w: 2, h: 3 }");
    }

    #[test]
    fn test_time_values_become_timestamps() {
        use chrono::{TimeZone, Utc};
        use std::time::{Duration, UNIX_EPOCH};

        let d = isolated(DestructuringPolicy::default());
        let when = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();

        let captured = d.destructure(&when, CaptureHint::Default).value;
        assert_eq!(captured, PropertyValue::Scalar(Scalar::Timestamp(when)));

        let offset = d.destructure(&"2024-05-06T09:08:09+02:00", CaptureHint::Default).value;
        assert_eq!(offset, PropertyValue::Scalar(Scalar::Timestamp(when)));

        let system = UNIX_EPOCH + Duration::from_secs(when.timestamp() as u64);
        let captured = d.destructure(&system, CaptureHint::Default).value;
        assert_eq!(captured, PropertyValue::Scalar(Scalar::Timestamp(when)));
    }

    #[test]
    fn test_timestamp_lookalikes_stay_strings() {
        let d = isolated(DestructuringPolicy::default());
        for text in ["2024-05-06", "2024-05-06T07:08:09", "2024-13-06T07:08:09Z", "order 2024-05-06T07:08:09Z"] {
            let captured = d.destructure(&text, CaptureHint::Default).value;
            assert_eq!(captured.as_str(), Some(text));
        }
    }
}
