//! Bounded capture of `serde::Serialize` values into [`PropertyValue`] trees
//!
//! The serializer stops descending at the configured depth, keeps at most
//! `max_collection_items` children per container and clips long strings.
//! Skipped children are counted on their container, never serialized.
//!
//! Time values become [`Scalar::Timestamp`]: strings in RFC 3339 form (how
//! chrono serializes `DateTime`) and `std::time::SystemTime`. Strings without
//! an offset, such as chrono's `NaiveDateTime`, stay strings.

use super::capability::CapabilityCache;
use super::DestructuringPolicy;
use crate::core::property::{Property, PropertyValue, Scalar};
use chrono::{DateTime, Utc};
use serde::ser::{self, Serialize};
use std::cell::Cell;
use std::fmt;

/// Failure reported by a value's `Serialize` implementation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureError(String);

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for CaptureError {}

impl ser::Error for CaptureError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        CaptureError(msg.to_string())
    }
}

/// State shared by one capture pass
pub struct Capturer<'a> {
    policy: &'a DestructuringPolicy,
    capabilities: &'a CapabilityCache,
    truncated: Cell<bool>,
}

impl<'a> Capturer<'a> {
    pub(crate) fn new(policy: &'a DestructuringPolicy, capabilities: &'a CapabilityCache) -> Self {
        Self {
            policy,
            capabilities,
            truncated: Cell::new(false),
        }
    }

    pub(crate) fn serializer(&self) -> ValueSerializer<'_> {
        ValueSerializer { cx: self, depth: 0 }
    }

    pub(crate) fn was_truncated(&self) -> bool {
        self.truncated.get()
    }

    fn mark_truncated(&self) {
        self.truncated.set(true);
    }

    fn clip(&self, s: &str) -> String {
        let max = self.policy.max_string_length;
        match s.char_indices().nth(max) {
            Some((cut, _)) => {
                self.mark_truncated();
                let mut clipped = String::with_capacity(cut + 3);
                clipped.push_str(&s[..cut]);
                clipped.push_str("...");
                clipped
            }
            None => s.to_string(),
        }
    }

    /// Give a registered provider the chance to replace a named value
    fn finish_named(&self, type_name: &'static str, value: PropertyValue) -> PropertyValue {
        match self.capabilities.provider_for(type_name) {
            Some(provider) => provider.log_value(value),
            None => value,
        }
    }
}

fn scalar(s: Scalar) -> PropertyValue {
    PropertyValue::Scalar(s)
}

/// `2024-05-06T07:08:09Z`, `2024-05-06T07:08:09.250+02:00` and the like
fn parse_timestamp(v: &str) -> Option<DateTime<Utc>> {
    let b = v.as_bytes();
    let shaped = (20..=35).contains(&b.len())
        && b[4] == b'-'
        && b[7] == b'-'
        && matches!(b[10], b'T' | b't' | b' ')
        && b[13] == b':';
    if !shaped {
        return None;
    }
    DateTime::parse_from_rfc3339(v)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// serde's encoding of `SystemTime`: seconds and nanoseconds since the epoch
fn system_time(fields: &[Property]) -> Option<DateTime<Utc>> {
    let [secs, nanos] = fields else {
        return None;
    };
    if &*secs.name != "secs_since_epoch" || &*nanos.name != "nanos_since_epoch" {
        return None;
    }
    match (&secs.value, &nanos.value) {
        (PropertyValue::Scalar(Scalar::U64(s)), PropertyValue::Scalar(Scalar::U64(n))) => {
            DateTime::from_timestamp(i64::try_from(*s).ok()?, u32::try_from(*n).ok()?)
        }
        _ => None,
    }
}

#[derive(Clone, Copy)]
pub struct ValueSerializer<'a> {
    cx: &'a Capturer<'a>,
    depth: usize,
}

impl<'a> ValueSerializer<'a> {
    fn nested(self) -> Self {
        Self {
            cx: self.cx,
            depth: self.depth + 1,
        }
    }

    fn at_depth_limit(&self) -> bool {
        self.depth >= self.cx.policy.max_depth
    }
}

impl<'a> ser::Serializer for ValueSerializer<'a> {
    type Ok = PropertyValue;
    type Error = CaptureError;
    type SerializeSeq = SeqCollector<'a>;
    type SerializeTuple = SeqCollector<'a>;
    type SerializeTupleStruct = StructCollector<'a>;
    type SerializeTupleVariant = StructCollector<'a>;
    type SerializeMap = MapCollector<'a>;
    type SerializeStruct = StructCollector<'a>;
    type SerializeStructVariant = StructCollector<'a>;

    fn serialize_bool(self, v: bool) -> Result<PropertyValue, CaptureError> {
        Ok(scalar(Scalar::Bool(v)))
    }

    fn serialize_i8(self, v: i8) -> Result<PropertyValue, CaptureError> {
        self.serialize_i64(i64::from(v))
    }

    fn serialize_i16(self, v: i16) -> Result<PropertyValue, CaptureError> {
        self.serialize_i64(i64::from(v))
    }

    fn serialize_i32(self, v: i32) -> Result<PropertyValue, CaptureError> {
        self.serialize_i64(i64::from(v))
    }

    fn serialize_i64(self, v: i64) -> Result<PropertyValue, CaptureError> {
        Ok(scalar(Scalar::I64(v)))
    }

    fn serialize_i128(self, v: i128) -> Result<PropertyValue, CaptureError> {
        Ok(match i64::try_from(v) {
            Ok(v) => scalar(Scalar::I64(v)),
            Err(_) => scalar(Scalar::Str(v.to_string())),
        })
    }

    fn serialize_u8(self, v: u8) -> Result<PropertyValue, CaptureError> {
        self.serialize_u64(u64::from(v))
    }

    fn serialize_u16(self, v: u16) -> Result<PropertyValue, CaptureError> {
        self.serialize_u64(u64::from(v))
    }

    fn serialize_u32(self, v: u32) -> Result<PropertyValue, CaptureError> {
        self.serialize_u64(u64::from(v))
    }

    fn serialize_u64(self, v: u64) -> Result<PropertyValue, CaptureError> {
        Ok(scalar(Scalar::U64(v)))
    }

    fn serialize_u128(self, v: u128) -> Result<PropertyValue, CaptureError> {
        Ok(match u64::try_from(v) {
            Ok(v) => scalar(Scalar::U64(v)),
            Err(_) => scalar(Scalar::Str(v.to_string())),
        })
    }

    fn serialize_f32(self, v: f32) -> Result<PropertyValue, CaptureError> {
        self.serialize_f64(f64::from(v))
    }

    fn serialize_f64(self, v: f64) -> Result<PropertyValue, CaptureError> {
        // JSON has no NaN or infinity; keep spooled events decodable
        if v.is_finite() {
            Ok(scalar(Scalar::F64(v)))
        } else {
            Ok(scalar(Scalar::Str(v.to_string())))
        }
    }

    fn serialize_char(self, v: char) -> Result<PropertyValue, CaptureError> {
        Ok(scalar(Scalar::Char(v)))
    }

    fn serialize_str(self, v: &str) -> Result<PropertyValue, CaptureError> {
        if let Some(t) = parse_timestamp(v) {
            return Ok(scalar(Scalar::Timestamp(t)));
        }
        Ok(scalar(Scalar::Str(self.cx.clip(v))))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<PropertyValue, CaptureError> {
        match std::str::from_utf8(v) {
            Ok(s) => self.serialize_str(s),
            Err(_) => {
                let hex: String = v.iter().map(|b| format!("{:02x}", b)).collect();
                self.serialize_str(&hex)
            }
        }
    }

    fn serialize_none(self) -> Result<PropertyValue, CaptureError> {
        Ok(PropertyValue::null())
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<PropertyValue, CaptureError> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<PropertyValue, CaptureError> {
        Ok(PropertyValue::null())
    }

    fn serialize_unit_struct(self, name: &'static str) -> Result<PropertyValue, CaptureError> {
        Ok(self.cx.finish_named(name, PropertyValue::str(name)))
    }

    fn serialize_unit_variant(
        self,
        name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<PropertyValue, CaptureError> {
        Ok(self.cx.finish_named(name, PropertyValue::str(variant)))
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        name: &'static str,
        value: &T,
    ) -> Result<PropertyValue, CaptureError> {
        let inner = value.serialize(self)?;
        Ok(self.cx.finish_named(name, inner))
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<PropertyValue, CaptureError> {
        let mut fields = StructCollector::new(self, Some(variant), name, 1);
        fields.push("Value".into(), value)?;
        Ok(fields.finish())
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<SeqCollector<'a>, CaptureError> {
        Ok(SeqCollector::new(self, len))
    }

    fn serialize_tuple(self, len: usize) -> Result<SeqCollector<'a>, CaptureError> {
        Ok(SeqCollector::new(self, Some(len)))
    }

    fn serialize_tuple_struct(
        self,
        name: &'static str,
        len: usize,
    ) -> Result<StructCollector<'a>, CaptureError> {
        Ok(StructCollector::new(self, Some(name), name, len))
    }

    fn serialize_tuple_variant(
        self,
        name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<StructCollector<'a>, CaptureError> {
        Ok(StructCollector::new(self, Some(variant), name, len))
    }

    fn serialize_map(self, len: Option<usize>) -> Result<MapCollector<'a>, CaptureError> {
        Ok(MapCollector::new(self, len))
    }

    fn serialize_struct(
        self,
        name: &'static str,
        len: usize,
    ) -> Result<StructCollector<'a>, CaptureError> {
        Ok(StructCollector::new(self, Some(name), name, len))
    }

    fn serialize_struct_variant(
        self,
        name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<StructCollector<'a>, CaptureError> {
        Ok(StructCollector::new(self, Some(variant), name, len))
    }
}

pub struct SeqCollector<'a> {
    ser: ValueSerializer<'a>,
    items: Vec<PropertyValue>,
    truncated: u64,
    skip: bool,
}

impl<'a> SeqCollector<'a> {
    fn new(ser: ValueSerializer<'a>, len: Option<usize>) -> Self {
        let skip = ser.at_depth_limit();
        let capacity = if skip {
            0
        } else {
            len.unwrap_or(0).min(ser.cx.policy.max_collection_items)
        };
        Self {
            ser,
            items: Vec::with_capacity(capacity),
            truncated: 0,
            skip,
        }
    }

    fn push<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), CaptureError> {
        if self.skip || self.items.len() >= self.ser.cx.policy.max_collection_items {
            self.truncated += 1;
            self.ser.cx.mark_truncated();
            return Ok(());
        }
        self.items.push(value.serialize(self.ser.nested())?);
        Ok(())
    }

    fn finish(self) -> PropertyValue {
        PropertyValue::Sequence {
            items: self.items,
            truncated: self.truncated,
        }
    }
}

impl<'a> ser::SerializeSeq for SeqCollector<'a> {
    type Ok = PropertyValue;
    type Error = CaptureError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), CaptureError> {
        self.push(value)
    }

    fn end(self) -> Result<PropertyValue, CaptureError> {
        Ok(self.finish())
    }
}

impl<'a> ser::SerializeTuple for SeqCollector<'a> {
    type Ok = PropertyValue;
    type Error = CaptureError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), CaptureError> {
        self.push(value)
    }

    fn end(self) -> Result<PropertyValue, CaptureError> {
        Ok(self.finish())
    }
}

pub struct StructCollector<'a> {
    ser: ValueSerializer<'a>,
    type_tag: Option<&'static str>,
    provider_key: &'static str,
    fields: Vec<Property>,
    truncated: u64,
    skip: bool,
}

impl<'a> StructCollector<'a> {
    fn new(
        ser: ValueSerializer<'a>,
        type_tag: Option<&'static str>,
        provider_key: &'static str,
        len: usize,
    ) -> Self {
        let skip = ser.at_depth_limit();
        let capacity = if skip {
            0
        } else {
            len.min(ser.cx.policy.max_collection_items)
        };
        Self {
            ser,
            type_tag,
            provider_key,
            fields: Vec::with_capacity(capacity),
            truncated: 0,
            skip,
        }
    }

    fn push<T: ?Sized + Serialize>(&mut self, name: std::sync::Arc<str>, value: &T) -> Result<(), CaptureError> {
        if self.skip || self.fields.len() >= self.ser.cx.policy.max_collection_items {
            self.truncated += 1;
            self.ser.cx.mark_truncated();
            return Ok(());
        }
        let value = value.serialize(self.ser.nested())?;
        self.fields.push(Property { name, value });
        Ok(())
    }

    fn push_positional<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), CaptureError> {
        let index = self.fields.len() as u64 + self.truncated;
        self.push(index.to_string().into(), value)
    }

    fn finish(self) -> PropertyValue {
        if self.provider_key == "SystemTime" && self.truncated == 0 {
            if let Some(t) = system_time(&self.fields) {
                return self.ser.cx.finish_named(self.provider_key, scalar(Scalar::Timestamp(t)));
            }
        }
        let value = PropertyValue::Structure {
            type_tag: self.type_tag.map(str::to_string),
            fields: self.fields,
            truncated: self.truncated,
        };
        self.ser.cx.finish_named(self.provider_key, value)
    }
}

impl<'a> ser::SerializeStruct for StructCollector<'a> {
    type Ok = PropertyValue;
    type Error = CaptureError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), CaptureError> {
        self.push(key.into(), value)
    }

    fn end(self) -> Result<PropertyValue, CaptureError> {
        Ok(self.finish())
    }
}

impl<'a> ser::SerializeStructVariant for StructCollector<'a> {
    type Ok = PropertyValue;
    type Error = CaptureError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), CaptureError> {
        self.push(key.into(), value)
    }

    fn end(self) -> Result<PropertyValue, CaptureError> {
        Ok(self.finish())
    }
}

impl<'a> ser::SerializeTupleStruct for StructCollector<'a> {
    type Ok = PropertyValue;
    type Error = CaptureError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), CaptureError> {
        self.push_positional(value)
    }

    fn end(self) -> Result<PropertyValue, CaptureError> {
        Ok(self.finish())
    }
}

impl<'a> ser::SerializeTupleVariant for StructCollector<'a> {
    type Ok = PropertyValue;
    type Error = CaptureError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), CaptureError> {
        self.push_positional(value)
    }

    fn end(self) -> Result<PropertyValue, CaptureError> {
        Ok(self.finish())
    }
}

pub struct MapCollector<'a> {
    ser: ValueSerializer<'a>,
    entries: Vec<(String, PropertyValue)>,
    pending_key: Option<String>,
    truncated: u64,
    skip: bool,
}

impl<'a> MapCollector<'a> {
    fn new(ser: ValueSerializer<'a>, len: Option<usize>) -> Self {
        let skip = ser.at_depth_limit();
        let capacity = if skip {
            0
        } else {
            len.unwrap_or(0).min(ser.cx.policy.max_collection_items)
        };
        Self {
            ser,
            entries: Vec::with_capacity(capacity),
            pending_key: None,
            truncated: 0,
            skip,
        }
    }

    fn is_full(&self) -> bool {
        self.skip || self.entries.len() >= self.ser.cx.policy.max_collection_items
    }
}

impl<'a> ser::SerializeMap for MapCollector<'a> {
    type Ok = PropertyValue;
    type Error = CaptureError;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<(), CaptureError> {
        if self.is_full() {
            self.pending_key = None;
            return Ok(());
        }
        let key = match key.serialize(self.ser.nested())? {
            PropertyValue::Scalar(Scalar::Str(s)) => s,
            other => other.to_string(),
        };
        self.pending_key = Some(key);
        Ok(())
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), CaptureError> {
        match self.pending_key.take() {
            Some(key) => {
                let value = value.serialize(self.ser.nested())?;
                self.entries.push((key, value));
            }
            None => {
                self.truncated += 1;
                self.ser.cx.mark_truncated();
            }
        }
        Ok(())
    }

    fn end(self) -> Result<PropertyValue, CaptureError> {
        Ok(PropertyValue::Mapping {
            entries: self.entries,
            truncated: self.truncated,
        })
    }
}
