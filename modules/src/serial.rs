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
//! Module to communicate via a serial port.

use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use log::*;
use serde_json::json;
use serialport::SerialPort;

use secop_core::errors::{Error, Result};
use secop_core::prelude::*;

use crate::support::comm::{CommClient, CommThread, HasComm};

/// `serialport::SerialPort` handles are used for both directions; the
/// reader/writer split `CommThread` wants is just two handles to the
/// same `Box<dyn SerialPort>`, via `try_clone`.
struct PortHalf(Box<dyn SerialPort>);

impl Read for PortHalf {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> { self.0.read(buf) }
}

impl Write for PortHalf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> { self.0.write(buf) }
    fn flush(&mut self) -> std::io::Result<()> { self.0.flush() }
}

pub struct SerialComm {
    comm: Option<CommClient<PortHalf>>,
    device: String,
    baudrate: i64,
    sol: String,
    eol: String,
    timeout: f64,
}

impl Module for SerialComm {
    fn create(internals: ModInternals) -> Result<Self> {
        let props = &internals.config().properties;
        let device = props.get("device.default").and_then(|v| v.as_str())
            .ok_or_else(|| Error::config("need a device configured"))?
            .to_string();
        let baudrate = props.get("baudrate.default").and_then(|v| v.as_integer()).unwrap_or(9600);
        let sol = props.get("sol.default").and_then(|v| v.as_str()).unwrap_or("").to_string();
        let eol = props.get("eol.default").and_then(|v| v.as_str()).unwrap_or("\n").to_string();
        let timeout = props.get("timeout.default").and_then(|v| v.as_float()).unwrap_or(2.0);
        Ok(SerialComm { comm: None, device, baudrate, sol, eol, timeout })
    }

    fn setup(&mut self) -> Result<()> {
        let device = self.device.clone();
        let baudrate = self.baudrate as u32;
        let timeout = Duration::from_millis((self.timeout * 1000.) as u64);

        let connect = move || -> Result<(PortHalf, PortHalf)> {
            info!("opening serial port {} at {} baud...", device, baudrate);
            let port = serialport::new(device.as_str(), baudrate)
                .timeout(timeout)
                .open()
                .map_err(|e| Error::comm_failed(e.to_string()))?;
            let wport = port.try_clone().map_err(|e| Error::comm_failed(e.to_string()))?;
            info!("serial port {} opened", device);
            Ok((PortHalf(port), PortHalf(wport)))
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
        v.push(AccessibleDef::Param(
            ParamDef::new("status", Arc::new(default_status_type()) as DynType)
                .description("status")
                .on_read_value(|_m| Ok(status_value(status::IDLE, "idle"))),
        ));
        v.push(AccessibleDef::Param(
            ParamDef::new("device", Arc::new(StringType::new().maxchars(1024)) as DynType)
                .description("device file or port name").mandatory().visibility(Visibility::None),
        ));
        v.push(AccessibleDef::Param(
            ParamDef::new("baudrate", Arc::new(IntRange::new(50, 4_000_000)) as DynType)
                .description("serial baud rate").default(json!(9600)).visibility(Visibility::None),
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

impl Communicator for SerialComm {
    fn communicate(&mut self, request: String) -> Result<String> {
        self.do_communicate(&request)
    }
}

impl HasComm for SerialComm {
    type IO = PortHalf;

    fn get_comm(&self) -> Result<&CommClient<Self::IO>> {
        self.comm.as_ref().ok_or_else(|| Error::comm_failed("port not open"))
    }
}

