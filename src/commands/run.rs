//! Implementation of the `fleet-agent run` command.
//!
//! Wires the reference collaborators together:
//! - NDJSON commands on stdin, responses on stdout (`StdioTransport`)
//! - session output through a bounded `ChannelSink` drained into stdout
//! - containers from the LXC tree, registration every `registration_interval_secs`
//!
//! SIGINT and SIGTERM set a flag; the loop stops admitting and waits for
//! live sessions before returning.

use crate::cli::RunArgs;
use crate::collab::{
    ContainerInventory, LxcInventory, RegistrationTimer, StdioTransport, WatchRegistry,
};
use crate::config::AgentConfig;
use crate::dispatch::{Collaborators, DispatchLoop};
use crate::error::Result;
use crate::exit_codes;
use crate::sink::{ChannelSink, spawn_forwarder};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn request_shutdown(_signal: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() {
    let handler = request_shutdown as extern "C" fn(libc::c_int) as libc::sighandler_t;
    // SAFETY: the handler only stores to an atomic, which is async-signal-safe.
    unsafe {
        libc::signal(libc::SIGINT, handler);
        libc::signal(libc::SIGTERM, handler);
    }
}

pub fn cmd_run(args: RunArgs, config: AgentConfig) -> Result<i32> {
    install_signal_handlers();

    let inventory = Arc::new(LxcInventory::new(
        &config.lxc_path,
        config.attach_program.clone(),
        config.manager_lock_path(),
        config.manager_lock_stale_secs,
    ));
    match inventory.refresh() {
        Ok(count) => tracing::info!(containers = count, lxc_path = %config.lxc_path.display(), "inventory loaded"),
        Err(e) => tracing::warn!(error = %e, "initial container scan failed"),
    }

    let transport = StdioTransport::stdio()?;
    let writer = transport.writer();

    let (sink, receiver) = ChannelSink::bounded(config.sink_capacity, config.sink_send_timeout());
    let forwarder = spawn_forwarder(receiver, move |response| writer.write_response(&response))?;

    let housekeeping = RegistrationTimer::new(
        config.agent_id.clone(),
        Duration::from_secs(config.registration_interval_secs),
        inventory.clone(),
    );
    let collab = Collaborators {
        transport: Box::new(transport),
        inventory,
        watcher: Box::new(WatchRegistry::new()),
        housekeeping: Box::new(housekeeping),
    };

    let mut dispatch = DispatchLoop::new(&config, collab, Arc::new(sink));
    let result = dispatch.run(&SHUTDOWN, args.max_iterations);

    // Dropping the loop releases the last sink sender so the forwarder can drain and exit.
    drop(dispatch);
    let _ = forwarder.join();

    let iterations = result?;
    tracing::info!(iterations, "agent stopped");
    Ok(exit_codes::SUCCESS)
}
