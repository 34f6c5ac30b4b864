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
// -----------------------------------------------------------------------------
//
//! Plain-data description of a module's accessibles (parameters and
//! commands), and the read/write wrapper contract.
//!
//! A concrete module type implements `Module::accessibles()` returning a
//! `Vec<AccessibleDef<Self>>`. Shared "kind" traits (`Readable`,
//! `Writable`, `Drivable`, `Communicator`) provide helper functions that
//! build the common prefix of that table for any module implementing
//! them; a module's own `accessibles()` appends/overrides on top. This
//! is the runtime equivalent of the inherited, mergeable class-body
//! accessible map: ordinary `Vec` concatenation plus a last-one-wins
//! dedup by name.

use serde_json::Value;

use crate::errors::{Error, ErrorKind, Result};
use crate::types::DynType;

/// Visibility levels control whether an accessible appears in the
/// `describing` message at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Visibility {
    None,
    User,
    Advanced,
    Expert,
}

impl Default for Visibility {
    fn default() -> Self { Visibility::User }
}

impl Visibility {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Visibility::None),
            "user" => Ok(Visibility::User),
            "advanced" => Ok(Visibility::Advanced),
            "expert" => Ok(Visibility::Expert),
            other => Err(Error::config(format!("invalid visibility: {}", other))),
        }
    }
}

/// Outcome of a read wrapper invocation.
pub enum ReadOutcome {
    /// The handler already called `announce_update` itself (e.g. it
    /// updates the cache from a background thread); the wrapper should
    /// not announce again, just report the current cached value.
    AlreadyAnnounced,
    /// The handler returned a fresh value to announce and report.
    Value(Value),
}

/// Outcome of a write wrapper invocation, replacing the `Done` sentinel
/// the original dynamic implementation used.
pub enum WriteOutcome {
    /// The handler already announced the accepted value itself.
    AlreadyAnnounced,
    /// The handler accepted (and possibly transformed) the input; this
    /// is the value to cache and announce.
    Accepted(Value),
    /// The handler has no override; cache and announce the validated
    /// input value as-is.
    AcceptInput,
}

pub type ReadFn<M> = Box<dyn Fn(&mut M) -> Result<ReadOutcome> + Send + Sync>;
pub type WriteFn<M> = Box<dyn Fn(&mut M, Value) -> Result<WriteOutcome> + Send + Sync>;
pub type DoFn<M> = Box<dyn Fn(&mut M, Value) -> Result<Value> + Send + Sync>;

/// How often the poller should read this parameter.
///
/// `Every(0)` disables polling entirely (`needscfg`-only parameters).
/// `Every(n)` (n > 0) polls every nth tick. `WhileBusy(n)` polls every
/// tick while the module is busy, else every `n`th tick -- used for the
/// fast/slow split on `Drivable` modules.
#[derive(Debug, Clone, Copy)]
pub enum PollRate {
    Every(u32),
    WhileBusy(u32),
}

impl Default for PollRate {
    fn default() -> Self { PollRate::Every(1) }
}

pub struct ParamDef<M> {
    pub name: String,
    pub description: String,
    pub datatype: DynType,
    pub default: Option<Value>,
    pub mandatory: bool,
    pub settable: bool,
    pub export: bool,
    pub visibility: Visibility,
    pub group: String,
    pub unit: Option<String>,
    pub poll: PollRate,
    pub read: Option<ReadFn<M>>,
    pub write: Option<WriteFn<M>>,
}

impl<M> ParamDef<M> {
    pub fn new(name: impl Into<String>, datatype: DynType) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            datatype,
            default: None,
            mandatory: false,
            settable: false,
            export: true,
            visibility: Visibility::User,
            group: String::new(),
            unit: None,
            poll: PollRate::Every(1),
            read: None,
            write: None,
        }
    }

    pub fn description(mut self, d: impl Into<String>) -> Self { self.description = d.into(); self }
    pub fn default(mut self, v: Value) -> Self { self.default = Some(v); self }
    pub fn mandatory(mut self) -> Self { self.mandatory = true; self }
    pub fn settable(mut self) -> Self { self.settable = true; self }
    pub fn readonly(mut self) -> Self { self.settable = false; self }
    pub fn not_exported(mut self) -> Self { self.export = false; self }
    pub fn visibility(mut self, v: Visibility) -> Self { self.visibility = v; self }
    pub fn group(mut self, g: impl Into<String>) -> Self { self.group = g.into(); self }
    pub fn unit(mut self, u: impl Into<String>) -> Self { self.unit = Some(u.into()); self }
    pub fn poll(mut self, p: PollRate) -> Self { self.poll = p; self }

    pub fn on_read<F>(mut self, f: F) -> Self
    where F: Fn(&mut M) -> Result<ReadOutcome> + Send + Sync + 'static {
        self.read = Some(Box::new(f));
        self
    }

    /// Convenience for the common case: the handler reads a hardware
    /// value and returns it, the wrapper announces it.
    pub fn on_read_value<F>(mut self, f: F) -> Self
    where F: Fn(&mut M) -> Result<Value> + Send + Sync + 'static {
        self.read = Some(Box::new(move |m| f(m).map(ReadOutcome::Value)));
        self
    }

    pub fn on_write<F>(mut self, f: F) -> Self
    where F: Fn(&mut M, Value) -> Result<WriteOutcome> + Send + Sync + 'static {
        self.write = Some(Box::new(f));
        self.settable = true;
        self
    }

    /// Convenience: the handler validates/forwards to hardware and
    /// the (possibly coerced) value it returns is cached/announced.
    pub fn on_write_value<F>(mut self, f: F) -> Self
    where F: Fn(&mut M, Value) -> Result<Value> + Send + Sync + 'static {
        self.write = Some(Box::new(move |m, v| f(m, v).map(WriteOutcome::Accepted)));
        self.settable = true;
        self
    }
}

pub struct CmdDef<M> {
    pub name: String,
    pub description: String,
    pub argtype: DynType,
    pub restype: DynType,
    pub visibility: Visibility,
    pub group: String,
    pub handler: DoFn<M>,
}

impl<M> CmdDef<M> {
    pub fn new<F>(name: impl Into<String>, argtype: DynType, restype: DynType, handler: F) -> Self
    where F: Fn(&mut M, Value) -> Result<Value> + Send + Sync + 'static {
        Self {
            name: name.into(),
            description: String::new(),
            argtype,
            restype,
            visibility: Visibility::User,
            group: String::new(),
            handler: Box::new(handler),
        }
    }

    pub fn description(mut self, d: impl Into<String>) -> Self { self.description = d.into(); self }
    pub fn visibility(mut self, v: Visibility) -> Self { self.visibility = v; self }
    pub fn group(mut self, g: impl Into<String>) -> Self { self.group = g.into(); self }
}

pub enum AccessibleDef<M> {
    Param(ParamDef<M>),
    Cmd(CmdDef<M>),
}

impl<M> AccessibleDef<M> {
    pub fn name(&self) -> &str {
        match self {
            AccessibleDef::Param(p) => &p.name,
            AccessibleDef::Cmd(c) => &c.name,
        }
    }
}

/// Merge a base table (e.g. from a kind helper) with a subclass's own
/// entries: concatenate, then keep only the *last* occurrence of each
/// name (subclass entries override same-named base entries), preserving
/// first-seen order for everything that survives. This implements the
/// "ordered merge, last wins" rule for accessible inheritance.
pub fn merge_accessibles<M>(
    base: Vec<AccessibleDef<M>>,
    overrides: Vec<AccessibleDef<M>>,
) -> Result<Vec<AccessibleDef<M>>> {
    let mut all = base;
    all.extend(overrides);
    for a in &all {
        if a.name().starts_with('.') {
            return Err(Error::new(ErrorKind::Programming,
                format!("accessible name must not start with '.': {}", a.name())));
        }
    }
    let mut order = Vec::new();
    let mut by_name: std::collections::HashMap<String, AccessibleDef<M>> = std::collections::HashMap::new();
    for a in all {
        let name = a.name().to_string();
        if !by_name.contains_key(&name) {
            order.push(name.clone());
        }
        by_name.insert(name, a);
    }
    Ok(order.into_iter().filter_map(|n| by_name.remove(&n)).collect())
}

/// Reorder a merged table according to an explicit parameter order list;
/// names not mentioned keep their relative position after the named ones.
pub fn apply_param_order<M>(mut table: Vec<AccessibleDef<M>>, order: &[&str]) -> Vec<AccessibleDef<M>> {
    if order.is_empty() {
        return table;
    }
    let mut out = Vec::with_capacity(table.len());
    for name in order {
        if let Some(pos) = table.iter().position(|a| a.name() == *name) {
            out.push(table.remove(pos));
        }
    }
    out.extend(table);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoolType;
    use std::sync::Arc;

    struct Dummy;

    #[test]
    fn subclass_param_overrides_base_by_name() {
        let base: Vec<AccessibleDef<Dummy>> = vec![
            AccessibleDef::Param(ParamDef::new("value", Arc::new(BoolType) as DynType).description("base")),
        ];
        let over: Vec<AccessibleDef<Dummy>> = vec![
            AccessibleDef::Param(ParamDef::new("value", Arc::new(BoolType) as DynType).description("sub")),
        ];
        let merged = merge_accessibles(base, over).unwrap();
        assert_eq!(merged.len(), 1);
        match &merged[0] {
            AccessibleDef::Param(p) => assert_eq!(p.description, "sub"),
            _ => panic!("expected param"),
        }
    }

    #[test]
    fn dot_prefixed_name_is_rejected() {
        let base: Vec<AccessibleDef<Dummy>> = vec![
            AccessibleDef::Param(ParamDef::new(".bad", Arc::new(BoolType) as DynType)),
        ];
        assert!(merge_accessibles(base, vec![]).is_err());
    }

    #[test]
    fn param_order_reorders_without_dropping_unlisted() {
        let table: Vec<AccessibleDef<Dummy>> = vec![
            AccessibleDef::Param(ParamDef::new("b", Arc::new(BoolType) as DynType)),
            AccessibleDef::Param(ParamDef::new("a", Arc::new(BoolType) as DynType)),
            AccessibleDef::Param(ParamDef::new("c", Arc::new(BoolType) as DynType)),
        ];
        let reordered = apply_param_order(table, &["a", "b"]);
        let names: Vec<_> = reordered.iter().map(|a| a.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
