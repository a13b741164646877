//! Explicitly constructed application context.
//!
//! [`AgentContext`] owns both message queues and the [`Exchange`]. Components
//! receive what they need from it at construction; there is no global state.
//!
//! # Lifecycle
//!
//! 1. [`AgentContext::new`] with a validated [`AgentConfig`]
//! 2. [`AgentContext::start`] binds the port and starts the network and sender threads
//! 3. The host builds a [`Dispatcher`] with [`AgentContext::dispatcher`] and drives
//!    it from its own loop
//! 4. [`AgentContext::shutdown`] (also run on drop)

use crate::config::AgentConfig;
use crate::dispatch::{CommandExecutor, DispatchOptions, Dispatcher};
use crate::error::CoreError;
use crate::queue::{InboundQueue, OutboundQueue};
use crate::transport::{Exchange, ExchangeOptions, PeerInfo};

use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, info, warn};

pub struct AgentContext {
    config: AgentConfig,
    inbound: Arc<InboundQueue>,
    outbound: Arc<OutboundQueue>,
    exchange: Exchange,
}

impl AgentContext {
    pub fn new(config: AgentConfig) -> Self {
        let inbound = Arc::new(InboundQueue::new());
        let outbound = Arc::new(OutboundQueue::new());
        let exchange = Exchange::new(
            ExchangeOptions::from(&config.transport),
            Arc::clone(&inbound),
            Arc::clone(&outbound),
        );

        Self {
            config,
            inbound,
            outbound,
            exchange,
        }
    }

    /// Validates the config and starts the exchange on the configured port.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Config`] for an invalid config and
    /// [`CoreError::Transport`] if the exchange fails to start.
    pub fn start(&mut self) -> Result<SocketAddr, CoreError> {
        self.config.validate()?;

        let port = self.config.transport.port;
        debug!("Starting exchange on port {port}");
        let local_addr = self.exchange.start(port)?;

        info!("Agent context started on {local_addr}");
        Ok(local_addr)
    }

    /// Stops the exchange. Idempotent.
    pub fn shutdown(&mut self) {
        if !self.exchange.is_running() && self.exchange.local_addr().is_none() {
            return;
        }

        info!("Shutting down agent context");
        self.exchange.stop();

        let undelivered = self.outbound.len();
        if undelivered > 0 {
            warn!("{undelivered} events were not delivered before shutdown");
        }
    }

    pub fn is_running(&self) -> bool {
        self.exchange.is_running()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn inbound(&self) -> &Arc<InboundQueue> {
        &self.inbound
    }

    pub fn outbound(&self) -> &Arc<OutboundQueue> {
        &self.outbound
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.exchange.local_addr()
    }

    pub fn current_peer(&self) -> Option<PeerInfo> {
        self.exchange.current_peer()
    }

    /// Builds a dispatcher that publishes to this context's outbound queue.
    pub fn dispatcher<E: CommandExecutor>(&self, executor: E) -> Dispatcher<E> {
        Dispatcher::new(
            executor,
            Arc::clone(&self.outbound),
            DispatchOptions {
                acknowledge_operations: self.config.dispatch.acknowledge_operations,
            },
        )
    }
}

impl Drop for AgentContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}
