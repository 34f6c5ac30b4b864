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
//! Module to communicate with a Toellner power supply via a submodule
//! (serial or TCP) reached through the in-process loopback client.

use std::sync::Arc;

use serde_json::{json, Value};

use secop_core::prelude::*;

pub struct ToellnerPS {
    io: Client,
    channel: i64,
}

impl Module for ToellnerPS {
    fn create(internals: ModInternals) -> Result<Self> {
        let props = &internals.config().properties;
        let iomod = props.get("iomod.default").and_then(|v| v.as_str())
            .ok_or_else(|| Error::config("invalid or missing iomod parameter"))?
            .to_string();
        let channel = props.get("channel.default").and_then(|v| v.as_integer()).unwrap_or(1);
        let io = Client::new(iomod.clone())
            .map_err(|e| e.amend(&format!(" (connecting to submodule {})", iomod)))?;
        Ok(ToellnerPS { io, channel })
    }

    fn accessibles() -> Vec<AccessibleDef<Self>> {
        let mut v = writable_accessibles::<Self>();
        v.push(AccessibleDef::Param(
            ParamDef::new("iomod", Arc::new(StringType::new().maxchars(64)) as DynType)
                .description("module name of the communication port")
                .mandatory().visibility(Visibility::None),
        ));
        v.push(AccessibleDef::Param(
            ParamDef::new("channel", Arc::new(IntRange::new(1, 2)) as DynType)
                .description("channel to control")
                .default(json!(1)).visibility(Visibility::None),
        ));
        v
    }
}

impl Readable for ToellnerPS {
    fn value_type() -> DynType {
        Arc::new(FloatRange::unbounded())
    }

    fn read_value(&mut self) -> Result<Value> {
        let query = format!("MV{}?", self.channel);
        let reply = self.io.command("communicate", json!(query))?;
        let s = reply.as_str().ok_or_else(|| Error::comm_failed(format!("invalid comm reply: {}", reply)))?;
        let v: f64 = s.trim().parse()
            .map_err(|_| Error::comm_failed(format!("invalid comm reply: {}", reply)))?;
        Ok(json!(v))
    }
}

impl Writable for ToellnerPS {
    fn write_target(&mut self, _target: Value) -> Result<Value> {
        Err(Error::bad_value("not implemented yet"))
    }
}
