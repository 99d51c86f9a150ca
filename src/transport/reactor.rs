//! # Reactor
//!
//! One current-thread Tokio runtime driven by one dedicated OS thread.
//!
//! Every I/O completion of every connection owned by an endpoint runs on
//! this thread, one at a time. Application threads never touch sockets;
//! they hand work over with [`Handle::spawn`]. Because only one task runs at
//! a time, any stretch of code without an `.await` executes atomically with
//! respect to all other connection work of the endpoint.

use std::thread::{self, JoinHandle};

use tokio::runtime::{Builder, Handle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::Result;

/// A running event loop thread
#[derive(Debug)]
pub struct Reactor {
    name: String,
    handle: Handle,
    shutdown: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl Reactor {
    /// Build the runtime and start driving it on a thread called `name`
    pub fn start(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let handle = runtime.handle().clone();
        let shutdown = CancellationToken::new();

        let stopped = shutdown.clone();
        let thread = thread::Builder::new().name(name.clone()).spawn(move || {
            runtime.block_on(stopped.cancelled());
            // Dropping the runtime drops every pending task, closing their sockets.
            drop(runtime);
        })?;

        debug!(reactor = %name, "Reactor started");
        Ok(Self {
            name,
            handle,
            shutdown,
            thread: Some(thread),
        })
    }

    /// Handle used to schedule work onto the reactor thread
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some() && !self.shutdown.is_cancelled()
    }

    /// Stop the event loop and join its thread. Idempotent.
    pub fn stop(&mut self) {
        self.shutdown.cancel();

        let Some(thread) = self.thread.take() else {
            return;
        };

        if thread.thread().id() == thread::current().id() {
            // Called from a hook running on the reactor itself: the loop exits
            // once the current task yields, joining here would deadlock.
            debug!(reactor = %self.name, "Reactor stop requested from its own thread");
            return;
        }

        if thread.join().is_err() {
            error!(reactor = %self.name, "Reactor thread panicked");
        } else {
            debug!(reactor = %self.name, "Reactor stopped");
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.stop();
    }
}
