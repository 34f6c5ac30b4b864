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
//! The main entry point for the server executable.

use clap::Parser;
use log::*;
use mlzutil::fs as fsutil;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use secop_core::config;
use secop_core::server::Server;

/// A generic SECoP server.
#[derive(Parser)]
#[command(name = "secop-rs", author = "Georg Brandl, Enrico Faulhaber", version)]
struct Args {
    /// Debug logging output?
    #[arg(short = 'v')]
    verbose: bool,

    /// Bind address (host:port)
    #[arg(long, default_value = "0.0.0.0:10767")]
    bind: String,

    /// Logging path
    #[arg(long, default_value = "log")]
    log: String,

    /// PID path
    #[arg(long, default_value = "pid")]
    pid: String,

    /// Daemonize?
    #[arg(short = 'd')]
    daemon: bool,

    /// User name for daemon
    #[arg(long)]
    user: Option<String>,

    /// Group name for daemon
    #[arg(long)]
    group: Option<String>,

    /// Configuration file name to load
    config: String,
}

fn main() {
    let args = Args::parse();

    let log_path = fsutil::abspath(&args.log);
    let pid_path = fsutil::abspath(&args.pid);
    if args.daemon {
        let mut daemon = daemonize::Daemonize::new();
        if let Some(user) = &args.user {
            daemon = daemon.user(user.as_str());
        }
        if let Some(group) = &args.group {
            daemon = daemon.group(group.as_str());
        }
        if let Err(err) = daemon.start() {
            eprintln!("could not daemonize process: {}", err);
        }
    }

    // handle SIGINT and SIGTERM
    let mut signals = Signals::new([SIGINT, SIGTERM]).expect("signal register failed");

    let cfgname = &args.config;

    if let Err(err) = mlzlog::init(Some(log_path), cfgname, false, args.verbose, !args.daemon) {
        eprintln!("could not initialize logging: {}", err);
    }
    if let Err(err) = fsutil::write_pidfile(&pid_path, cfgname) {
        error!("could not write PID file: {}", err);
    }

    // set a panic hook to log panics into the logfile
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let payload = if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.as_str()
        } else if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s
        } else {
            "???"
        };
        if let Some(location) = panic_info.location() {
            error!("panic: {:?} ({})", payload, location);
        } else {
            error!("panic: {:?}", payload)
        }
        // call the original hook to get backtrace if requested
        default_hook(panic_info);
    }));

    // load the config and run! a ConfigError anywhere in this path (bad
    // config file, or a module that fails to construct) is fatal: exit
    // nonzero rather than limping along with some modules missing.
    let mut exit_code = 0;
    match config::load_config(cfgname) {
        Err(err) => {
            error!("could not parse config file {}: {}", cfgname, err);
            exit_code = 1;
        }
        Ok(cfg) => {
            let server = Server::new(cfg);
            info!("starting server on {}...", args.bind);
            if let Err(err) = server.start(&args.bind, secop_modules::run_module) {
                error!("could not initialize server: {}", err);
                exit_code = 1;
            } else {
                // server is running; wait for a signal to finish
                signals.forever().next();
            }
        }
    }

    info!("quitting...");
    fsutil::remove_pidfile(pid_path, cfgname);
    std::process::exit(exit_code);
}
