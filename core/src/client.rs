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
//! A client for modules to talk to other modules in the same process
//! (e.g. `ToellnerPS` driving several logical channels through one
//! physical supply). Connecting to a module in a remote SEC node is out
//! of scope; `Client::new` only ever loops back through this process's
//! own dispatcher.

use std::time::Duration;

use crossbeam_channel::unbounded;
use serde_json::Value;

use crate::dispatcher::{next_handler_id, ClientRepReceiver, HandlerId, ReqMsgSender, CON_SENDER, REQ_SENDER};
use crate::errors::{Error, Result};
use crate::proto::{IncomingMsg, Msg};

/// A handle to a module in this process, reached via the same request
/// channel a TCP client's `Handler` would use.
pub struct Client {
    hid: HandlerId,
    modname: String,
    timeout: Duration,
    req_sender: ReqMsgSender,
    rep_receiver: ClientRepReceiver,
}

impl Drop for Client {
    fn drop(&mut self) {
        let _ = self.req_sender.send((self.hid, IncomingMsg(String::new(), Msg::Quit)));
    }
}

impl Client {
    /// Connect to a module by name. Fails if no server is running yet in
    /// this process (the dispatcher's global senders are unset before
    /// `Server::start`).
    pub fn new(modname: impl Into<String>) -> Result<Self> {
        let timeout = Duration::from_secs(2);
        let hid = next_handler_id();
        let con_sender = CON_SENDER.lock().clone()
            .ok_or_else(|| Error::comm_failed("no local server running"))?;
        let req_sender = REQ_SENDER.lock().clone()
            .ok_or_else(|| Error::comm_failed("no local server running"))?;
        let (rep_sender, rep_receiver) = unbounded();
        con_sender.send((hid, rep_sender)).unwrap();
        Ok(Self { hid, modname: modname.into(), timeout, req_sender, rep_receiver })
    }

    fn transact(&self, msg: Msg) -> Result<Msg> {
        self.req_sender.send((self.hid, IncomingMsg(String::new(), msg))).unwrap();
        match self.rep_receiver.recv_timeout(self.timeout) {
            Err(_) => Err(Error::comm_failed("local module timed out")),
            Ok(msg) => Ok(msg),
        }
    }

    pub fn ping(&self) -> Result<()> {
        match self.transact(Msg::Ping { token: self.modname.clone() })? {
            Msg::Pong { ref token, .. } if token == &self.modname => Ok(()),
            msg => Err(Error::protocol(format!("invalid reply message for ping: {}", msg))),
        }
    }

    pub fn read(&self, param: &str) -> Result<Value> {
        let req = Msg::Read { module: self.modname.clone(), param: param.into() };
        match self.transact(req)? {
            Msg::Changed { data, .. } => Ok(data[0].clone()),
            msg => Err(Error::protocol(format!("invalid reply message for read: {}", msg))),
        }
    }

    pub fn change(&self, param: &str, value: Value) -> Result<Value> {
        let req = Msg::Change { module: self.modname.clone(), param: param.into(), value };
        match self.transact(req)? {
            Msg::Changed { data, .. } => Ok(data[0].clone()),
            msg => Err(Error::protocol(format!("invalid reply message for change: {}", msg))),
        }
    }

    pub fn command(&self, cmd: &str, arg: Value) -> Result<Value> {
        let req = Msg::Do { module: self.modname.clone(), command: cmd.into(), arg };
        match self.transact(req)? {
            Msg::Done { data, .. } => Ok(data[0].clone()),
            msg => Err(Error::protocol(format!("invalid reply message for do: {}", msg))),
        }
    }
}
