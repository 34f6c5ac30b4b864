// -----------------------------------------------------------------------------
// Rust SECoP playground
//
// This program is free software; you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation; either version 2 of the License, or (at your option) any later
// version.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program; if not, write to the Free Software Foundation, Inc.,
// 59 Temple Place, Suite 330, Boston, MA  02111-1307  USA
//
// Module authors:
//   Georg Brandl <g.brandl@fz-juelich.de>
//
// -----------------------------------------------------------------------------
//
//! The SECoP datatype system.
//!
//! Every datatype validates, exports (internal -> wire) and imports
//! (wire -> internal) `serde_json::Value`s. Using `Value` on both sides
//! (rather than a generic associated representation) lets a module's
//! accessible table hold datatypes of different Rust shapes side by side
//! as `Arc<dyn TypeInfo>`, which is required to merge accessible maps
//! across class hierarchies and to support config-driven `.datatype`
//! overrides at runtime.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use serde_json::{json, Value};

use crate::errors::{Error, Result};

/// Object-safe datatype behaviour: validate, export (cache -> wire),
/// import (wire -> cache) and describe (JSON datatype descriptor).
pub trait TypeInfo: Send + Sync + fmt::Debug {
    /// Validate and coerce an internal value, e.g. after a handler wrote
    /// a fresh cache value. Default implementation round-trips through
    /// export/import, which is correct for all of our concrete types.
    fn validate(&self, value: &Value) -> Result<Value> {
        self.import_value(&self.export_value(value)?)
    }

    /// Convert a cached (internal) value into its wire representation.
    fn export_value(&self, value: &Value) -> Result<Value>;

    /// Convert a wire value (e.g. from a `change` request) into the
    /// internal representation, validating range/length/membership.
    fn import_value(&self, wire: &Value) -> Result<Value>;

    /// The JSON datatype descriptor sent in the `describing` message.
    fn describe(&self) -> Value;
}

pub type DynType = Arc<dyn TypeInfo>;

// ----------------------------------------------------------------------
// Null -- used for commands without argument/result.

#[derive(Debug, Clone, Copy, Default)]
pub struct NullType;

impl TypeInfo for NullType {
    fn export_value(&self, _value: &Value) -> Result<Value> { Ok(Value::Null) }
    fn import_value(&self, _wire: &Value) -> Result<Value> { Ok(Value::Null) }
    fn describe(&self) -> Value { json!(["null"]) }
}

// ----------------------------------------------------------------------
// Bool

#[derive(Debug, Clone, Copy, Default)]
pub struct BoolType;

impl TypeInfo for BoolType {
    fn export_value(&self, value: &Value) -> Result<Value> {
        Ok(Value::Bool(value.as_bool().ok_or_else(|| Error::wrong_type("expected bool"))?))
    }
    fn import_value(&self, wire: &Value) -> Result<Value> {
        match wire {
            Value::Bool(b) => Ok(Value::Bool(*b)),
            Value::Number(n) => Ok(Value::Bool(n.as_i64() != Some(0))),
            _ => Err(Error::wrong_type("expected bool")),
        }
    }
    fn describe(&self) -> Value { json!(["bool"]) }
}

// ----------------------------------------------------------------------
// IntRange

#[derive(Debug, Clone)]
pub struct IntRange {
    pub min: i64,
    pub max: i64,
}

impl IntRange {
    pub fn new(min: i64, max: i64) -> Self { Self { min, max } }
    pub fn unbounded() -> Self { Self { min: i64::MIN, max: i64::MAX } }
}

impl TypeInfo for IntRange {
    fn export_value(&self, value: &Value) -> Result<Value> { self.import_value(value) }
    fn import_value(&self, wire: &Value) -> Result<Value> {
        let n = wire.as_i64()
            .or_else(|| wire.as_str().and_then(|s| s.trim().parse::<i64>().ok()))
            .ok_or_else(|| Error::wrong_type("expected integer"))?;
        if n < self.min || n > self.max {
            return Err(Error::range_error(format!("{} out of range [{}, {}]", n, self.min, self.max)));
        }
        Ok(json!(n))
    }
    fn describe(&self) -> Value { json!(["int", self.min, self.max]) }
}

// ----------------------------------------------------------------------
// FloatRange

#[derive(Debug, Clone)]
pub struct FloatRange {
    pub min: f64,
    pub max: f64,
    pub unit: String,
    pub fmtstr: String,
    pub absolute_resolution: f64,
    pub relative_resolution: f64,
}

impl FloatRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self {
            min, max,
            unit: String::new(),
            fmtstr: "%g".into(),
            absolute_resolution: 0.0,
            relative_resolution: 1.2e-7,
        }
    }
    pub fn unbounded() -> Self { Self::new(f64::NEG_INFINITY, f64::INFINITY) }
    pub fn unit(mut self, unit: impl Into<String>) -> Self { self.unit = unit.into(); self }
    pub fn fmtstr(mut self, fmtstr: impl Into<String>) -> Self { self.fmtstr = fmtstr.into(); self }
    pub fn absolute_resolution(mut self, v: f64) -> Self { self.absolute_resolution = v; self }
    pub fn relative_resolution(mut self, v: f64) -> Self { self.relative_resolution = v; self }
}

impl TypeInfo for FloatRange {
    fn export_value(&self, value: &Value) -> Result<Value> { self.import_value(value) }
    fn import_value(&self, wire: &Value) -> Result<Value> {
        let f = wire.as_f64()
            .or_else(|| wire.as_str().and_then(|s| s.trim().parse::<f64>().ok()))
            .ok_or_else(|| Error::wrong_type("expected float"))?;
        if f < self.min || f > self.max {
            return Err(Error::range_error(format!("{} out of range [{}, {}]", f, self.min, self.max)));
        }
        Ok(json!(f))
    }
    fn describe(&self) -> Value {
        json!(["double", {
            "min": self.min, "max": self.max, "unit": self.unit,
            "fmtstr": self.fmtstr,
            "absolute_resolution": self.absolute_resolution,
            "relative_resolution": self.relative_resolution,
        }])
    }
}

// ----------------------------------------------------------------------
// Scaled -- fixed point, wire is an integer multiple of `scale`.

#[derive(Debug, Clone)]
pub struct Scaled {
    pub scale: f64,
    pub min: i64,
    pub max: i64,
    pub unit: String,
    pub fmtstr: String,
}

impl Scaled {
    pub fn new(scale: f64, min: i64, max: i64) -> Self {
        Self { scale, min, max, unit: String::new(), fmtstr: "%g".into() }
    }
    pub fn unit(mut self, unit: impl Into<String>) -> Self { self.unit = unit.into(); self }
}

impl TypeInfo for Scaled {
    fn export_value(&self, value: &Value) -> Result<Value> {
        let f = value.as_f64().ok_or_else(|| Error::wrong_type("expected float"))?;
        Ok(json!((f / self.scale).round() as i64))
    }
    fn import_value(&self, wire: &Value) -> Result<Value> {
        let n = wire.as_i64()
            .or_else(|| wire.as_str().and_then(|s| s.trim().parse::<i64>().ok()))
            .ok_or_else(|| Error::wrong_type("expected scaled integer"))?;
        if n < self.min || n > self.max {
            return Err(Error::range_error(format!("{} out of range [{}, {}]", n, self.min, self.max)));
        }
        Ok(json!(n as f64 * self.scale))
    }
    fn describe(&self) -> Value {
        json!(["scaled", {
            "scale": self.scale, "min": self.min, "max": self.max,
            "unit": self.unit, "fmtstr": self.fmtstr,
        }])
    }
}

// ----------------------------------------------------------------------
// Blob -- base64 on the wire, the internal repr is the raw bytes stored
// as a lossy UTF-8 string (SECoP blobs in practice carry short binary
// payloads; this mirrors the teacher's choice to keep cache values as
// plain JSON strings rather than introduce a byte-vector variant).

#[derive(Debug, Clone)]
pub struct BlobType {
    pub minbytes: usize,
    pub maxbytes: usize,
}

impl BlobType {
    pub fn new(minbytes: usize, maxbytes: usize) -> Self { Self { minbytes, maxbytes } }
}

impl TypeInfo for BlobType {
    fn export_value(&self, value: &Value) -> Result<Value> {
        let bytes = value.as_str().ok_or_else(|| Error::wrong_type("expected blob bytes"))?;
        Ok(json!(B64.encode(bytes)))
    }
    fn import_value(&self, wire: &Value) -> Result<Value> {
        let s = wire.as_str().ok_or_else(|| Error::wrong_type("expected base64 string"))?;
        let decoded = B64.decode(s).map_err(|e| Error::bad_value(e.to_string()))?;
        if decoded.len() < self.minbytes || decoded.len() > self.maxbytes {
            return Err(Error::range_error("blob length out of range"));
        }
        Ok(json!(String::from_utf8_lossy(&decoded).into_owned()))
    }
    fn describe(&self) -> Value { json!(["blob", {"minbytes": self.minbytes, "maxbytes": self.maxbytes}]) }
}

// ----------------------------------------------------------------------
// StringType / TextType

#[derive(Debug, Clone)]
pub struct StringType {
    pub minchars: usize,
    pub maxchars: usize,
    pub is_text: bool,
}

impl StringType {
    pub fn new() -> Self { Self { minchars: 0, maxchars: usize::MAX, is_text: false } }
    pub fn minchars(mut self, n: usize) -> Self { self.minchars = n; self }
    pub fn maxchars(mut self, n: usize) -> Self { self.maxchars = n; self }
    /// The `text` variant: a free-form, usually multi-line string.
    pub fn text() -> Self { Self { minchars: 0, maxchars: usize::MAX, is_text: true } }
}

impl Default for StringType {
    fn default() -> Self { Self::new() }
}

impl TypeInfo for StringType {
    fn export_value(&self, value: &Value) -> Result<Value> { self.import_value(value) }
    fn import_value(&self, wire: &Value) -> Result<Value> {
        let s = wire.as_str().ok_or_else(|| Error::wrong_type("expected string"))?;
        let n = s.chars().count();
        if n < self.minchars || n > self.maxchars {
            return Err(Error::range_error("string length out of range"));
        }
        Ok(json!(s))
    }
    fn describe(&self) -> Value {
        if self.is_text {
            json!(["text", {"minchars": self.minchars, "maxchars": self.maxchars}])
        } else {
            json!(["string", {"minchars": self.minchars, "maxchars": self.maxchars}])
        }
    }
}

// ----------------------------------------------------------------------
// EnumType -- name <-> integer mapping.

#[derive(Debug, Clone)]
pub struct EnumType {
    pub name: String,
    pub members: BTreeMap<String, i64>,
}

impl EnumType {
    pub fn new(members: impl IntoIterator<Item = (&'static str, i64)>) -> Self {
        Self {
            name: String::new(),
            members: members.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        }
    }

    /// Used by the accessible-merge step to name the enum after the
    /// parameter it describes, per the inheritance algorithm's naming rule.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn value_for(&self, name: &str) -> Option<i64> {
        self.members.get(name).copied()
    }

    fn name_for(&self, value: i64) -> Option<&str> {
        self.members.iter().find(|(_, v)| **v == value).map(|(k, _)| k.as_str())
    }
}

impl TypeInfo for EnumType {
    fn export_value(&self, value: &Value) -> Result<Value> {
        // internal repr is always the integer; export as integer (the
        // wire format for enums is the numeric value, clients resolve
        // the name from the descriptor).
        let n = value.as_i64().ok_or_else(|| Error::wrong_type("expected enum value"))?;
        if self.name_for(n).is_none() {
            return Err(Error::bad_value(format!("{} is not a member of enum {}", n, self.name)));
        }
        Ok(json!(n))
    }
    fn import_value(&self, wire: &Value) -> Result<Value> {
        if let Some(s) = wire.as_str() {
            return self.value_for(s)
                .map(|n| json!(n))
                .ok_or_else(|| Error::bad_value(format!("{} is not a member of enum {}", s, self.name)));
        }
        let n = wire.as_i64().ok_or_else(|| Error::wrong_type("expected enum value"))?;
        if self.name_for(n).is_none() {
            return Err(Error::bad_value(format!("{} is not a member of enum {}", n, self.name)));
        }
        Ok(json!(n))
    }
    fn describe(&self) -> Value {
        json!(["enum", {"members": self.members}])
    }
}

// ----------------------------------------------------------------------
// ArrayOf

#[derive(Debug, Clone)]
pub struct ArrayOf {
    pub minlen: usize,
    pub maxlen: usize,
    pub members: DynType,
}

impl ArrayOf {
    pub fn new(members: DynType, minlen: usize, maxlen: usize) -> Self {
        Self { minlen, maxlen, members }
    }
}

impl TypeInfo for ArrayOf {
    fn export_value(&self, value: &Value) -> Result<Value> {
        let arr = value.as_array().ok_or_else(|| Error::wrong_type("expected array"))?;
        let out: Result<Vec<Value>> = arr.iter().map(|v| self.members.export_value(v)).collect();
        Ok(Value::Array(out?))
    }
    fn import_value(&self, wire: &Value) -> Result<Value> {
        let arr = wire.as_array().ok_or_else(|| Error::wrong_type("expected array"))?;
        if arr.len() < self.minlen || arr.len() > self.maxlen {
            return Err(Error::range_error("array length out of range"));
        }
        let out: Result<Vec<Value>> = arr.iter().map(|v| self.members.import_value(v)).collect();
        Ok(Value::Array(out?))
    }
    fn describe(&self) -> Value {
        json!(["array", {"minlen": self.minlen, "maxlen": self.maxlen, "members": self.members.describe()}])
    }
}

// ----------------------------------------------------------------------
// TupleOf -- fixed arity, heterogeneous members.

#[derive(Debug, Clone)]
pub struct TupleOf {
    pub members: Vec<DynType>,
}

impl TupleOf {
    pub fn new(members: Vec<DynType>) -> Self { Self { members } }
}

impl TypeInfo for TupleOf {
    fn export_value(&self, value: &Value) -> Result<Value> {
        let arr = value.as_array().ok_or_else(|| Error::wrong_type("expected tuple"))?;
        if arr.len() != self.members.len() {
            return Err(Error::wrong_type("tuple arity mismatch"));
        }
        let out: Result<Vec<Value>> = arr.iter().zip(&self.members)
            .map(|(v, t)| t.export_value(v)).collect();
        Ok(Value::Array(out?))
    }
    fn import_value(&self, wire: &Value) -> Result<Value> {
        let arr = wire.as_array().ok_or_else(|| Error::wrong_type("expected tuple"))?;
        if arr.len() != self.members.len() {
            return Err(Error::wrong_type("tuple arity mismatch"));
        }
        let out: Result<Vec<Value>> = arr.iter().zip(&self.members)
            .map(|(v, t)| t.import_value(v)).collect();
        Ok(Value::Array(out?))
    }
    fn describe(&self) -> Value {
        json!(["tuple", {"members": self.members.iter().map(|m| m.describe()).collect::<Vec<_>>()}])
    }
}

// ----------------------------------------------------------------------
// StructOf -- name -> datatype, order preserved for the wire descriptor.

#[derive(Debug, Clone)]
pub struct StructOf {
    pub members: Vec<(String, DynType)>,
}

impl StructOf {
    pub fn new(members: Vec<(&'static str, DynType)>) -> Self {
        Self { members: members.into_iter().map(|(k, v)| (k.to_string(), v)).collect() }
    }
}

impl TypeInfo for StructOf {
    fn export_value(&self, value: &Value) -> Result<Value> {
        let obj = value.as_object().ok_or_else(|| Error::wrong_type("expected struct"))?;
        let mut out = serde_json::Map::new();
        for (name, t) in &self.members {
            let v = obj.get(name).ok_or_else(|| Error::bad_value(format!("missing field {}", name)))?;
            out.insert(name.clone(), t.export_value(v)?);
        }
        Ok(Value::Object(out))
    }
    fn import_value(&self, wire: &Value) -> Result<Value> {
        let obj = wire.as_object().ok_or_else(|| Error::wrong_type("expected struct"))?;
        let mut out = serde_json::Map::new();
        for (name, t) in &self.members {
            let v = obj.get(name).ok_or_else(|| Error::bad_value(format!("missing field {}", name)))?;
            out.insert(name.clone(), t.import_value(v)?);
        }
        Ok(Value::Object(out))
    }
    fn describe(&self) -> Value {
        let members: serde_json::Map<String, Value> = self.members.iter()
            .map(|(k, v)| (k.clone(), v.describe())).collect();
        json!(["struct", {"members": members}])
    }
}

// ----------------------------------------------------------------------
// Status: enum-of-codes + free-text tuple.

/// Coarse status code ranges, per the component design: classify by
/// *range*, never by exact value, since device-specific codes subdivide
/// each band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct StatusCode(pub i64);

impl StatusCode {
    pub const DISABLED: i64 = 0;
    pub const IDLE: i64 = 100;
    pub const WARN: i64 = 200;
    pub const BUSY: i64 = 300;
    pub const DRIVING: i64 = 300;
    pub const FINALIZING: i64 = 390;
    pub const ERROR: i64 = 400;
    pub const UNKNOWN: i64 = 401;

    pub fn is_disabled(self) -> bool { self.0 < Self::IDLE }
    pub fn is_idle(self) -> bool { (Self::IDLE..Self::WARN).contains(&self.0) }
    pub fn is_warn(self) -> bool { (Self::WARN..Self::BUSY).contains(&self.0) }
    pub fn is_busy(self) -> bool { (Self::BUSY..Self::ERROR).contains(&self.0) }
    pub fn is_driving(self) -> bool { (Self::DRIVING..Self::FINALIZING).contains(&self.0) }
    pub fn is_finalizing(self) -> bool { (Self::FINALIZING..Self::ERROR).contains(&self.0) }
    pub fn is_error(self) -> bool { self.0 >= Self::ERROR }
}

pub mod status {
    use super::StatusCode;
    pub const DISABLED: StatusCode = StatusCode(StatusCode::DISABLED);
    pub const IDLE: StatusCode = StatusCode(StatusCode::IDLE);
    pub const WARN: StatusCode = StatusCode(StatusCode::WARN);
    pub const BUSY: StatusCode = StatusCode(StatusCode::BUSY);
    pub const ERROR: StatusCode = StatusCode(StatusCode::ERROR);
    pub const UNKNOWN: StatusCode = StatusCode(StatusCode::UNKNOWN);
}

/// `(code, text)` as used for the mandatory `status` parameter. Stored
/// internally as a 2-element JSON array `[code, text]`.
pub fn status_value(code: StatusCode, text: impl Into<String>) -> Value {
    json!([code.0, text.into()])
}

/// Build the `StatusType` datatype: a tuple of an enum datatype (names
/// given by caller, for device-specific subdivisions) and a string.
pub fn status_type(members: impl IntoIterator<Item = (&'static str, i64)>) -> TupleOf {
    let enum_t: DynType = Arc::new(EnumType::new(members).with_name("status"));
    TupleOf::new(vec![enum_t, Arc::new(StringType::new())])
}

pub fn default_status_members() -> Vec<(&'static str, i64)> {
    vec![
        ("DISABLED", StatusCode::DISABLED),
        ("IDLE", StatusCode::IDLE),
        ("WARN", StatusCode::WARN),
        ("BUSY", StatusCode::BUSY),
        ("ERROR", StatusCode::ERROR),
        ("UNKNOWN", StatusCode::UNKNOWN),
    ]
}

pub fn default_status_type() -> TupleOf {
    status_type(default_status_members())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_range_rejects_out_of_bounds() {
        let t = IntRange::new(0, 10);
        assert!(t.import_value(&json!(5)).is_ok());
        assert!(t.import_value(&json!(11)).is_err());
    }

    #[test]
    fn enum_type_accepts_name_or_value() {
        let t = EnumType::new([("off", 0), ("on", 1)]).with_name("switch");
        assert_eq!(t.import_value(&json!("on")).unwrap(), json!(1));
        assert_eq!(t.import_value(&json!(1)).unwrap(), json!(1));
        assert!(t.import_value(&json!("bogus")).is_err());
    }

    #[test]
    fn struct_of_round_trips() {
        let s = StructOf::new(vec![
            ("p", Arc::new(FloatRange::new(0.0, 10.0)) as DynType),
            ("i", Arc::new(FloatRange::new(0.0, 10.0)) as DynType),
        ]);
        let v = json!({"p": 1.0, "i": 2.0});
        assert_eq!(s.import_value(&v).unwrap(), v);
    }

    #[test]
    fn status_ranges_classify_by_range_not_exact_value() {
        assert!(StatusCode(305).is_busy());
        assert!(StatusCode(305).is_driving());
        assert!(StatusCode(395).is_busy());
        assert!(StatusCode(395).is_finalizing());
        assert!(!StatusCode(395).is_driving());
        assert!(StatusCode(450).is_error());
    }

    #[test]
    fn scaled_round_trips_through_scale() {
        let t = Scaled::new(0.1, -100, 100);
        let wire = t.export_value(&json!(1.5)).unwrap();
        assert_eq!(wire, json!(15));
        assert_eq!(t.import_value(&wire).unwrap(), json!(1.5));
    }
}
