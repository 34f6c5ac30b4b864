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
//! Derive a `TypeInfo` for a plain C-like Rust enum.
//!
//! ```
//! #[derive(TypeInfo)]
//! enum Mode {
//!     Off,
//!     On,
//!     Auto = 5,
//! }
//! ```
//!
//! generates a zero-sized `ModeType` implementing `TypeInfo`: the wire
//! representation is the integer discriminant (a `change` request may
//! also send the variant name, which is resolved the same way
//! `EnumType::import_value` does it). This is the compile-time
//! equivalent of `EnumType::new([("Off", 0), ("On", 1), ("Auto", 5)])`,
//! for enums fixed enough at compile time to be worth naming.

use quote::{format_ident, quote};
use proc_macro2::TokenStream;

pub fn derive_typeinfo(input: synstructure::Structure) -> TokenStream {
    match input.ast().data {
        syn::Data::Enum(..) => derive_typeinfo_enum(input),
        _ => panic!("TypeInfo can only be derived for plain enums"),
    }
}

pub fn derive_typeinfo_enum(input: synstructure::Structure) -> TokenStream {
    let name = &input.ast().ident;
    let vis = &input.ast().vis;
    let struct_name = format_ident!("{}Type", name);

    let mut descr_members = Vec::new();
    let mut str_arms = Vec::new();
    let mut int_arms = Vec::new();

    let mut discr = -1i64;
    for variant in input.variants() {
        let ident = &variant.ast().ident;
        let ident_str = ident.to_string();
        if variant.ast().fields != &syn::Fields::Unit {
            panic!("enum member {} cannot have data associated with it", ident);
        }
        if let Some((_, dis)) = &variant.ast().discriminant {
            if let syn::Expr::Lit(syn::ExprLit { lit: syn::Lit::Int(i), .. }) = dis {
                discr = i.base10_parse().unwrap();
            } else {
                panic!("explicit enum discriminants can only be integer literals");
            }
        } else {
            discr += 1;
        }
        descr_members.push(quote! { (#ident_str, #discr), });
        str_arms.push(quote! { #ident_str => Ok(#discr), });
        int_arms.push(quote! { #discr => Ok(#discr), });
    }

    quote! {
        #[derive(Debug, Clone, Copy, Default)]
        #vis struct #struct_name;

        const _: () = {
            use std::collections::BTreeMap;
            use serde_json::{json, Value};
            use ::secop_core::errors::Error;
            use ::secop_core::types::TypeInfo;

            impl TypeInfo for #struct_name {
                fn export_value(&self, value: &Value) -> std::result::Result<Value, Error> {
                    let n = value.as_i64().ok_or_else(|| Error::wrong_type("expected enum value"))?;
                    match n {
                        #( #int_arms )*
                        _ => Err(Error::bad_value(format!("{} is not a member of enum {}", n, stringify!(#name)))),
                    }.map(|n| json!(n))
                }

                fn import_value(&self, wire: &Value) -> std::result::Result<Value, Error> {
                    if let Some(s) = wire.as_str() {
                        return match s {
                            #( #str_arms )*
                            _ => Err(Error::bad_value(format!("{:?} is not a member of enum {}", s, stringify!(#name)))),
                        }.map(|n| json!(n));
                    }
                    let n = wire.as_i64().ok_or_else(|| Error::wrong_type("expected enum value"))?;
                    match n {
                        #( #int_arms )*
                        _ => Err(Error::bad_value(format!("{} is not a member of enum {}", n, stringify!(#name)))),
                    }.map(|n| json!(n))
                }

                fn describe(&self) -> Value {
                    let members: BTreeMap<&'static str, i64> = [#( #descr_members )*].into_iter().collect();
                    json!(["enum", {"members": members}])
                }
            }
        };
    }
}
