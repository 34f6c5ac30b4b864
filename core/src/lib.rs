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
//! The main entry point and crate definitions.

pub mod accessible;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod module;
pub mod poller;
pub mod proto;
pub mod server;
pub mod types;

// Lets the derive crate refer to `::secop_core::...` from generated code
// uniformly, whether the derive is used here or downstream in secop-modules.
extern crate self as secop_core;

/// Re-exports mostly everything needed for writing modules.
pub mod prelude {
    pub use crate::accessible::{
        AccessibleDef, CmdDef, ParamDef, PollRate, ReadOutcome, Visibility, WriteOutcome,
    };
    pub use crate::client::Client;
    pub use crate::config::{ModuleConfig, ServerConfig};
    pub use crate::errors::{Error, ErrorKind, Result};
    pub use crate::module::{
        communicator_accessibles, drivable_accessibles, readable_accessibles,
        writable_accessibles, Communicator, Drivable, ModInternals, Module, Readable, Writable,
    };
    pub use crate::types::{
        default_status_type, status, status_value, status_type, ArrayOf, BlobType, BoolType,
        DynType, EnumType, FloatRange, IntRange, NullType, Scaled, StatusCode, StringType,
        StructOf, TupleOf, TypeInfo,
    };
}
