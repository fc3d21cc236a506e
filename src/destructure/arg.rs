//! Arguments accepted by the logging calls

use super::capture::{CaptureError, Capturer};
use crate::core::property::PropertyValue;
use serde::Serialize;

/// A value that can be bound to a template placeholder or a field
///
/// Implemented for every `serde::Serialize` type, including unsized and
/// borrowed ones such as `str` and `&[T]`. The trait is object safe so call
/// sites pass heterogeneous arguments as `&[&dyn LogArg]`.
pub trait LogArg {
    fn capture(&self, cx: &Capturer<'_>) -> Result<PropertyValue, CaptureError>;
}

impl<T: Serialize + ?Sized> LogArg for T {
    fn capture(&self, cx: &Capturer<'_>) -> Result<PropertyValue, CaptureError> {
        self.serialize(cx.serializer())
    }
}
