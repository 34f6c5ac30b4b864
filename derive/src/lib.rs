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
//! # Derive support for secop modules
//!
//! `TypeInfo` can be derived for plain C-like Rust enums, generating a
//! zero-sized `<Name>Type` datatype (the compile-time equivalent of
//! building an `EnumType` by hand) that is used wherever a module wants
//! a device-specific status subdivision or mode enum as a `DynType`.

#![recursion_limit = "256"]

mod typeinfo;

use synstructure::decl_derive;

decl_derive!([TypeInfo] => crate::typeinfo::derive_typeinfo);
