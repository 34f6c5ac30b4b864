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
//! Module to communicate via a TCP connection.

use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use log::*;
use serde_json::{json, Value};

use secop_core::errors::{Error, Result};
use secop_core::prelude::*;

use crate::support::comm::{CommClient, CommThread, HasComm};

pub struct TcpComm {
    comm: Option<CommClient<TcpStream>>,
    host: String,
    port: i64,
    sol: String,
    eol: String,
    timeout: f64,
}

impl Module for TcpComm {
    fn create(internals: ModInternals) -> Result<Self> {
        let props = &internals.config().properties;
        let host = props.get("host.default").and_then(|v| v.as_str())
            .ok_or_else(|| Error::config("need a host configured"))?
            .to_string();
        let port = props.get("port.default").and_then(|v| v.as_integer()).unwrap_or(0);
        let sol = props.get("sol.default").and_then(|v| v.as_str()).unwrap_or("").to_string();
        let eol = props.get("eol.default").and_then(|v| v.as_str()).unwrap_or("\n").to_string();
        let timeout = props.get("timeout.default").and_then(|v| v.as_float()).unwrap_or(2.0);
        Ok(TcpComm { comm: None, host, port, sol, eol, timeout })
    }

    fn setup(&mut self) -> Result<()> {
        let address = format!("{}:{}", self.host, self.port);
        let timeout = Duration::from_millis((self.timeout * 1000.) as u64);

        let connect = move || -> Result<(TcpStream, TcpStream)> {
            info!("connecting to {}...", address);
            let wstream = TcpStream::connect(address.as_str())?;
            wstream.set_write_timeout(Some(timeout))?;
            wstream.set_nodelay(true)?;
            let rstream = wstream.try_clone()?;
            info!("connection established to {}", address);
            Ok((rstream, wstream))
        };

        self.comm = Some(CommThread::spawn(
            Box::new(connect),
            self.sol.as_bytes(),
            self.eol.as_bytes(),
            timeout,
        )?);
        Ok(())
    }

    fn teardown(&mut self) {
        self.comm.take();
    }

    fn accessibles() -> Vec<AccessibleDef<Self>> {
        let mut v = communicator_accessibles::<Self>();
        v.push(AccessibleDef::Cmd(
            CmdDef::new("readline", Arc::new(NullType) as DynType, Arc::new(StringType::new().maxchars(1024)) as DynType,
                        |m, _arg| m.do_readline().map(|s| json!(s)))
                .description("read a message"),
        ));
        v.push(AccessibleDef::Cmd(
            CmdDef::new("writeline", Arc::new(StringType::new().maxchars(1024)) as DynType, Arc::new(NullType) as DynType,
                        |m, arg| {
                            let s = arg.as_str().ok_or_else(|| Error::wrong_type("expected string"))?;
                            m.do_writeline(s)?;
                            Ok(Value::Null)
                        })
                .description("write a message"),
        ));
        v.push(AccessibleDef::Cmd(
            CmdDef::new("read", Arc::new(NullType) as DynType, Arc::new(StringType::new().maxchars(1024)) as DynType,
                        |m, _arg| m.do_read().map(|s| json!(s)))
                .description("read input buffer"),
        ));
        v.push(AccessibleDef::Cmd(
            CmdDef::new("write", Arc::new(StringType::new().maxchars(1024)) as DynType, Arc::new(NullType) as DynType,
                        |m, arg| {
                            let s = arg.as_str().ok_or_else(|| Error::wrong_type("expected string"))?;
                            m.do_write(s)?;
                            Ok(Value::Null)
                        })
                .description("write raw string"),
        ));
        v.push(AccessibleDef::Cmd(
            CmdDef::new(
                "multi_communicate",
                Arc::new(ArrayOf::new(
                    Arc::new(TupleOf::new(vec![
                        Arc::new(StringType::new().maxchars(1024)) as DynType,
                        Arc::new(FloatRange::unbounded()) as DynType,
                    ])),
                    1, 16,
                )) as DynType,
                Arc::new(ArrayOf::new(Arc::new(StringType::new().maxchars(1024)) as DynType, 1, 16)) as DynType,
                |m, arg| {
                    let arr = arg.as_array().ok_or_else(|| Error::wrong_type("expected array"))?;
                    let mut pairs = Vec::with_capacity(arr.len());
                    for item in arr {
                        let t = item.as_array().ok_or_else(|| Error::wrong_type("expected tuple"))?;
                        let req = t[0].as_str().ok_or_else(|| Error::wrong_type("expected string"))?.to_string();
                        let delay = t[1].as_f64().ok_or_else(|| Error::wrong_type("expected float"))?;
                        pairs.push((req, delay));
                    }
                    let out = m.do_multi_communicate(&pairs)?;
                    Ok(json!(out))
                },
            ).description("do multiple communicate cycles"),
        ));
        v.push(AccessibleDef::Param(
            ParamDef::new("status", Arc::new(default_status_type()) as DynType)
                .description("status")
                .on_read_value(|_m| Ok(status_value(status::IDLE, "idle"))),
        ));
        v.push(AccessibleDef::Param(
            ParamDef::new("host", Arc::new(StringType::new().maxchars(1024)) as DynType)
                .description("host to connect to").mandatory().visibility(Visibility::None),
        ));
        v.push(AccessibleDef::Param(
            ParamDef::new("port", Arc::new(IntRange::new(1, 65535)) as DynType)
                .description("port to connect to").mandatory().visibility(Visibility::None),
        ));
        v.push(AccessibleDef::Param(
            ParamDef::new("sol", Arc::new(StringType::new().maxchars(8)) as DynType)
                .description("start-of-line").default(json!("")).visibility(Visibility::None),
        ));
        v.push(AccessibleDef::Param(
            ParamDef::new("eol", Arc::new(StringType::new().maxchars(8)) as DynType)
                .description("end-of-line").default(json!("\n")).visibility(Visibility::None),
        ));
        v.push(AccessibleDef::Param(
            ParamDef::new("timeout", Arc::new(FloatRange::new(0.0, f64::INFINITY)) as DynType)
                .description("comm timeout").default(json!(2.0)).visibility(Visibility::None),
        ));
        v
    }
}

impl Communicator for TcpComm {
    fn communicate(&mut self, request: String) -> Result<String> {
        self.do_communicate(&request)
    }
}

impl HasComm for TcpComm {
    type IO = TcpStream;

    fn get_comm(&self) -> Result<&CommClient<Self::IO>> {
        self.comm.as_ref().ok_or_else(|| Error::comm_failed("connection not open"))
    }
}
