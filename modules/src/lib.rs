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
//! Built-in device modules and the glue that spawns each one onto its
//! own thread, keyed by the `class` string from the config file.

mod cryo;
mod serial;
mod tcp;
mod toellner;

pub(crate) mod support;

use std::panic::catch_unwind;
use std::sync::Arc;
use std::thread::{sleep, Builder};
use std::time::Duration;

use log::*;

use secop_core::errors::{Error, Result};
use secop_core::module::{Instance, ModInternals, Module};
use secop_core::poller;

/// Inner (generic) implementation of `run_module`: validate construction
/// synchronously, then spawn a named thread that runs the instance and
/// restarts it (after draining any pending requests) if it ever panics.
/// An instance configured with `pollerkind = "generic"` is additionally
/// registered with the shared `poller::generic()` scheduler before its
/// own request loop starts.
///
/// The synchronous validation pass matters: a `ConfigError` from a bad
/// module config must abort the whole server with a nonzero exit (spec
/// section 6 exit conditions), not get silently absorbed by the
/// panic-retry loop below, which is meant for later runtime failures
/// (e.g. hardware going away), not startup misconfiguration.
fn inner_run<T: Module>(internals: ModInternals) -> Result<()> {
    Instance::<T>::new(internals.clone())?;
    let name = internals.name().to_owned();
    Builder::new().name(name.clone()).spawn(move || loop {
        if catch_unwind(|| {
            let instance = Arc::new(Instance::<T>::new(internals.clone()).expect("module init failed"));
            if instance.uses_generic_poller() {
                poller::generic().register(instance.clone(), Duration::from_millis(200));
            }
            instance.run()
        }).is_err() {
            error!("module {} panicked, waiting...", name);
            internals.req_receiver().try_iter().count();
            while internals.req_receiver().is_empty() {
                sleep(Duration::from_millis(100));
            }
            info!("now restarting module {}", name);
        }
    }).expect("could not start thread");
    Ok(())
}

/// Start the module's own thread, picking the concrete type by the
/// `class` string from its config entry.
pub fn run_module(internals: ModInternals) -> Result<()> {
    match internals.class() {
        "SimCryo" => inner_run::<cryo::Cryo>(internals),
        "SerialComm" => inner_run::<serial::SerialComm>(internals),
        "TcpComm" => inner_run::<tcp::TcpComm>(internals),
        "ToellnerPS" => inner_run::<toellner::ToellnerPS>(internals),
        other => Err(Error::config(format!("no such module class: {}", other))),
    }
}
