//! The host's own update loop: the consumer context for inbound commands.
//!
//! Each tick services at most one command, the way a game or UI frame would.
//! Command handling therefore never runs on a network thread.

use agent_core::dispatch::{CommandExecutor, Dispatcher};
use agent_core::queue::InboundQueue;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use log::{debug, info};

pub struct HostLoop {
    tick_interval: Duration,
    stop: Arc<AtomicBool>,
}

impl HostLoop {
    pub fn new(tick_interval: Duration) -> Self {
        Self {
            tick_interval,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that ends [`HostLoop::run`] after the current tick when set.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// One frame: pop and dispatch one command if any is waiting.
    pub fn tick<E: CommandExecutor>(
        &self,
        dispatcher: &mut Dispatcher<E>,
        inbound: &InboundQueue,
    ) -> bool {
        dispatcher.service_one(inbound)
    }

    /// Ticks every `tick_interval` until the stop flag is set.
    ///
    /// Returns the number of commands serviced.
    pub fn run<E: CommandExecutor>(
        &self,
        dispatcher: &mut Dispatcher<E>,
        inbound: &InboundQueue,
    ) -> u64 {
        info!("Host loop running, tick every {:?}", self.tick_interval);
        let mut serviced = 0;

        while !self.stop.load(Ordering::SeqCst) {
            if self.tick(dispatcher, inbound) {
                serviced += 1;
            }
            thread::sleep(self.tick_interval);
        }

        if !inbound.is_empty() {
            debug!("{} commands left unprocessed", inbound.len());
        }
        info!("Host loop stopped after {serviced} commands");
        serviced
    }
}
