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
//! Enumeration of possible SECoP errors.

use std::{error, fmt, result};
use serde_json::json;

use crate::proto::Msg;


pub type Result<T> = result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    // Internal, never supposed to leak to the wire except as InternalError.
    Config,
    Programming,
    Parsing,
    Internal,
    // API defined, spec section 7.
    Protocol,
    NoSuchModule,
    NoSuchParameter,
    NoSuchCommand,
    CommandFailed,
    CommandRunning,
    ReadOnly,
    BadValue,
    WrongType,
    RangeError,
    CommunicationFailed,
    Timeout,       // ATM also C.F.
    HardwareError, // ATM also C.F.
    IsBusy,
    IsError,
    Disabled,
    /// Suppresses logging and announce_update's error dedup bookkeeping;
    /// a handler returns this to mean "transient, just retry later".
    Silent,
}

#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self { kind, message: msg.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn bad_value(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::BadValue, message: msg.into() }
    }

    pub fn wrong_type(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::WrongType, message: msg.into() }
    }

    pub fn range_error(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::RangeError, message: msg.into() }
    }

    pub fn amend(mut self, msg: &str) -> Self {
        self.message = format!("{} ({})", self.message, msg);
        self
    }

    /// Wrap an arbitrary error as InternalError, per the announce_update
    /// rule that any non-framework error gets wrapped before being cached.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Internal, message: msg.into() }
    }

    pub fn into_msg(self, specifier: String) -> Msg {
        Msg::ErrMsg {
            class: self.wire_name().into(),
            report: json!([specifier, self.message, {}]),
        }
    }

    // Quick construction.

    pub fn config(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Config, message: msg.into() }
    }

    pub fn programming(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Programming, message: msg.into() }
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Protocol, message: msg.into() }
    }

    pub fn no_module() -> Self {
        Self { kind: ErrorKind::NoSuchModule, message: "".into() }
    }

    pub fn no_param() -> Self {
        Self { kind: ErrorKind::NoSuchParameter, message: "".into() }
    }

    pub fn no_command() -> Self {
        Self { kind: ErrorKind::NoSuchCommand, message: "".into() }
    }

    pub fn read_only() -> Self {
        Self { kind: ErrorKind::ReadOnly, message: "parameter is read-only".into() }
    }

    pub fn comm_failed(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::CommunicationFailed, message: msg.into() }
    }

    /// This is also the wire format of the error kind.
    pub fn wire_name(&self) -> &'static str {
        use self::ErrorKind::*;
        match self.kind {
            Config => "ConfigError",
            Programming => "ProgrammingError",
            Parsing | Internal => "InternalError",
            Protocol => "ProtocolError",
            NoSuchModule => "NoSuchModule",
            NoSuchParameter => "NoSuchParameter",
            NoSuchCommand => "NoSuchCommand",
            CommandFailed => "CommandFailed",
            CommandRunning => "CommandRunning",
            ReadOnly => "ReadOnly",
            BadValue => "BadValue",
            WrongType => "WrongType",
            RangeError => "RangeError",
            CommunicationFailed => "CommunicationFailed",
            Timeout => "CommunicationFailed",
            HardwareError => "CommunicationFailed",
            IsBusy => "IsBusy",
            IsError => "IsError",
            Disabled => "Disabled",
            Silent => "InternalError",
        }
    }

    /// True for the startup/programmer-error kinds that spec.md says
    /// should never be sent over the wire at all (only logged).
    pub fn is_internal_only(&self) -> bool {
        matches!(self.kind, ErrorKind::Config | ErrorKind::Programming | ErrorKind::Parsing)
    }
}

/// Allow quick conversion of io::Error to SECoP errors.
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::comm_failed(e.to_string())
    }
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.wire_name(), self.message)
    }
}
