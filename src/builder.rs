//! Builder for configuring and constructing host and follower sessions.

use crate::Result;
use metrosync_core::{AudioEngine, Clock, SystemClock, VirtualEngine};
use metrosync_session::{Channel, FollowerStateMachine, HostStateMachine, SessionConfig};
use std::path::Path;
use std::sync::Arc;

/// Collects the pieces every session needs (identity, clock, tuning) and
/// validates them once before a state machine is built.
///
/// The clock defaults to [`SystemClock`]. Sessions built without an explicit
/// engine get a [`VirtualEngine`] on the same clock.
///
/// # Example
///
/// ```ignore
/// use metrosync::prelude::*;
///
/// let bus = LocalBus::new();
/// let mut host = SessionBuilder::new("host")
///     .config_file("metrosync.toml")?
///     .build_host(bus.endpoint())?;
/// ```
pub struct SessionBuilder {
    client_id: String,
    clock: Option<Arc<dyn Clock>>,
    config: SessionConfig,
}

impl SessionBuilder {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            clock: None,
            config: SessionConfig::default(),
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the configuration with one read from a TOML file.
    pub fn config_file(mut self, path: impl AsRef<Path>) -> Result<Self> {
        self.config = SessionConfig::load(path)?;
        Ok(self)
    }

    pub fn ping_interval_ms(mut self, ms: f64) -> Self {
        self.config.ping_interval_ms = ms;
        self
    }

    pub fn lookahead_ms(mut self, ms: f64) -> Self {
        self.config.scheduler.lookahead_ms = ms;
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The clock sessions will be built on.
    pub fn resolved_clock(&self) -> Arc<dyn Clock> {
        self.clock
            .clone()
            .unwrap_or_else(|| Arc::new(SystemClock::new()))
    }

    pub fn build_host<C: Channel>(self, channel: C) -> Result<HostStateMachine<C, VirtualEngine>> {
        let engine = VirtualEngine::new(self.resolved_clock());
        self.build_host_with_engine(channel, engine)
    }

    pub fn build_host_with_engine<C: Channel, E: AudioEngine>(
        self,
        channel: C,
        engine: E,
    ) -> Result<HostStateMachine<C, E>> {
        self.config.validate()?;
        let clock = self.resolved_clock();
        tracing::debug!(host_id = %self.client_id, "building host session");
        Ok(HostStateMachine::new(
            self.client_id,
            clock,
            channel,
            engine,
            self.config,
        ))
    }

    pub fn build_follower<C: Channel>(
        self,
        channel: C,
    ) -> Result<FollowerStateMachine<C, VirtualEngine>> {
        let engine = VirtualEngine::new(self.resolved_clock());
        self.build_follower_with_engine(channel, engine)
    }

    pub fn build_follower_with_engine<C: Channel, E: AudioEngine>(
        self,
        channel: C,
        engine: E,
    ) -> Result<FollowerStateMachine<C, E>> {
        self.config.validate()?;
        let clock = self.resolved_clock();
        tracing::debug!(client_id = %self.client_id, "building follower session");
        Ok(FollowerStateMachine::new(
            self.client_id,
            clock,
            channel,
            engine,
            self.config,
        ))
    }
}
