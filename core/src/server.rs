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
//! The TCP accept loop and per-connection `Handler`. Protocol state lives
//! in `dispatcher`; this module only owns sockets and line framing.

use std::io::{Read as IoRead, Write as IoWrite};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;

use crossbeam_channel::unbounded;
use derive_new::new;
use hashbrown::HashMap;
use log::*;
use memchr::memchr;
use mlzutil::time::localtime;
use serde_json::json;

use crate::config::ServerConfig;
use crate::dispatcher::{
    next_handler_id, ClientRepReceiver, ClientRepSender, Dispatcher, HandlerId, ReqMsgSender,
    CON_SENDER, REQ_SENDER,
};
use crate::errors::Result;
use crate::module::ModInternals;
use crate::proto::{IncomingMsg, Msg, Msg::*, IDENT_REPLY};

pub const RECVBUF_LEN: usize = 4096;
pub const MAX_MSG_LEN: usize = 1024 * 1024;

#[derive(new)]
pub struct Server {
    config: ServerConfig,
}

impl Server {
    /// Listen for connections on the TCP socket and spawn handlers for it.
    fn tcp_listener(tcp_sock: TcpListener) {
        mlzlog::set_thread_prefix("TCP: ");
        info!("listener started");
        let con_sender = CON_SENDER.lock().clone().expect("no server running?");
        while let Ok((stream, addr)) = tcp_sock.accept() {
            info!("[{}] new client connected", addr);
            let new_req_sender = REQ_SENDER.lock().clone().expect("no server running?");
            let (rep_sender, rep_receiver) = unbounded();
            let disp_rep_sender = rep_sender.clone();
            let hid = next_handler_id();
            con_sender.send((hid, disp_rep_sender)).unwrap();
            thread::spawn(move || {
                Handler::new(hid, stream, addr, new_req_sender, rep_sender, rep_receiver).handle()
            });
        }
    }

    /// Start the dispatcher, the per-module threads and the TCP accept
    /// loop. Returns once everything is spawned; the server keeps running
    /// on its background threads.
    pub fn start<F>(mut self, addr: &str, mod_runner: F) -> Result<()>
    where
        F: Fn(ModInternals) -> Result<()>,
    {
        let (con_sender, con_receiver) = unbounded();
        *CON_SENDER.lock() = Some(con_sender);
        let (req_sender, req_receiver) = unbounded();
        *REQ_SENDER.lock() = Some(req_sender);
        let (rep_sender, rep_receiver) = unbounded();

        let mut mod_senders = HashMap::default();

        for modcfg in self.config.modules.drain(..) {
            let name = modcfg.name.clone();
            let (mod_sender, mod_receiver) = unbounded();
            let mod_rep_sender = rep_sender.clone();
            let internals = ModInternals::new(name.clone(), modcfg, mod_receiver, mod_rep_sender);
            mod_runner(internals)?;
            mod_senders.insert(name, mod_sender);
        }

        let descriptive = json!({
            "description": self.config.description,
            "equipment_id": self.config.equipment_id,
            "firmware": "secop-rs",
            "modules": []
        });

        let dispatcher = Dispatcher::new(descriptive, mod_senders, con_receiver, req_receiver, rep_receiver);
        thread::spawn(move || dispatcher.run());

        let tcp_sock = TcpListener::bind(addr)?;
        thread::spawn(move || Server::tcp_listener(tcp_sock));
        Ok(())
    }
}

/// A single client connection, read and write halves. The write half runs
/// on its own thread so replies fanned out from the dispatcher can be sent
/// back instantly, independent of how busy the read loop is.
pub struct Handler {
    client: TcpStream,
    hid: HandlerId,
    req_sender: ReqMsgSender,
    rep_sender: ClientRepSender,
}

impl Handler {
    pub fn new(
        hid: HandlerId,
        client: TcpStream,
        addr: SocketAddr,
        req_sender: ReqMsgSender,
        rep_sender: ClientRepSender,
        rep_receiver: ClientRepReceiver,
    ) -> Handler {
        let send_client = client.try_clone().expect("could not clone socket");
        let thread_name = addr.to_string();
        thread::spawn(move || Handler::sender(&thread_name, send_client, rep_receiver));
        mlzlog::set_thread_prefix(format!("[{}] ", addr));
        Handler { hid, client, req_sender, rep_sender }
    }

    fn sender(name: &str, client: TcpStream, rep_receiver: ClientRepReceiver) {
        mlzlog::set_thread_prefix(format!("[{}] ", name));
        let mut client = std::io::BufWriter::new(client);
        for to_send in rep_receiver {
            if let Err(err) = writeln!(client, "{}", to_send) {
                warn!("write error in sender: {}", err);
                break;
            }
            let _ = client.flush();
        }
        info!("sender quit");
    }

    fn send_back(&self, msg: Msg) {
        self.rep_sender.send(msg).expect("sending to client failed");
    }

    /// Handle an incoming, already-parsed message. A few message types are
    /// answered directly here; everything that needs module or protocol
    /// state goes through the dispatcher.
    fn handle_msg(&self, msg: IncomingMsg) {
        match msg.1 {
            Change { .. } | Do { .. } | Read { .. } | Describe | Activate { .. } | Deactivate { .. } => {
                self.req_sender.send((self.hid, msg)).unwrap();
            }
            Ping { token } => {
                let data = json!([null, {"t": localtime()}]);
                self.send_back(Pong { token, data });
            }
            Idn => {
                self.send_back(IdnReply { encoded: IDENT_REPLY.into() });
            }
            _ => {
                warn!("message {:?} not handled yet", msg.1);
            }
        }
    }

    /// Process a single line. A parse failure produces an `ErrMsg` that is
    /// sent straight back -- the connection is never torn down for it.
    fn process(&self, line: String) {
        match Msg::parse(line) {
            Ok(msg) => {
                debug!("processing {}", msg);
                self.handle_msg(msg);
            }
            Err(msg) => {
                warn!("failed to parse line: {}", msg);
                self.send_back(msg);
            }
        }
    }

    pub fn handle(mut self) {
        let mut buf = Vec::with_capacity(RECVBUF_LEN);
        let mut recvbuf = [0u8; RECVBUF_LEN];

        loop {
            let got = match self.client.read(&mut recvbuf) {
                Err(err) => {
                    warn!("error in recv, closing connection: {}", err);
                    break;
                }
                Ok(0) => break,
                Ok(got) => got,
            };
            buf.extend_from_slice(&recvbuf[..got]);
            let mut from = 0;
            while let Some(to) = memchr(b'\n', &buf[from..]) {
                let line_str = String::from_utf8_lossy(&buf[from..from + to]);
                let line_str = line_str.trim_end_matches('\r');
                self.process(line_str.to_owned());
                from += to + 1;
            }
            buf.drain(..from);
            if buf.len() > MAX_MSG_LEN {
                warn!("hit request length limit, closing connection");
                break;
            }
        }
        self.req_sender.send((self.hid, IncomingMsg(String::new(), Quit))).unwrap();
        info!("handler is finished");
    }
}
