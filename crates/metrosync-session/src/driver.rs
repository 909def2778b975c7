//! Async driver for host and follower state machines.
//!
//! The state machines are synchronous and polled. [`run`] gives them an
//! event loop on a tokio runtime: poll, then sleep until the next timer
//! deadline or the inbound poll interval, whichever comes first.

use crate::channel::Channel;
use crate::follower::FollowerStateMachine;
use crate::host::HostStateMachine;
use metrosync_core::AudioEngine;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Anything [`run`] can drive.
pub trait Session: Send {
    fn poll(&mut self);

    /// Earliest local time, in milliseconds, at which `poll` has timer work.
    fn next_deadline(&self) -> Option<f64>;

    fn now_ms(&self) -> f64;
}

impl<C: Channel, E: AudioEngine> Session for HostStateMachine<C, E> {
    fn poll(&mut self) {
        HostStateMachine::poll(self)
    }

    fn next_deadline(&self) -> Option<f64> {
        HostStateMachine::next_deadline(self)
    }

    fn now_ms(&self) -> f64 {
        HostStateMachine::now_ms(self)
    }
}

impl<C: Channel, E: AudioEngine> Session for FollowerStateMachine<C, E> {
    fn poll(&mut self) {
        FollowerStateMachine::poll(self)
    }

    fn next_deadline(&self) -> Option<f64> {
        FollowerStateMachine::next_deadline(self)
    }

    fn now_ms(&self) -> f64 {
        FollowerStateMachine::now_ms(self)
    }
}

/// Upper bound on the sleep between polls, so inbound messages are picked up
/// promptly even when no timer is due.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Time to sleep before the next poll.
pub fn sleep_duration(now_ms: f64, next_deadline: Option<f64>, max: Duration) -> Duration {
    match next_deadline {
        Some(deadline) => {
            let wait_ms = (deadline - now_ms).max(0.0);
            Duration::from_secs_f64(wait_ms / 1000.0).min(max)
        }
        None => max,
    }
}

/// Drives `session` until `shutdown` turns `true` or its sender is dropped.
///
/// The lock is held only for the duration of each poll, so the application
/// can call host or follower operations between iterations.
pub async fn run<S: Session>(
    session: Arc<Mutex<S>>,
    mut shutdown: watch::Receiver<bool>,
    poll_interval: Duration,
) {
    tracing::debug!(?poll_interval, "session driver started");
    loop {
        if *shutdown.borrow() {
            break;
        }

        let wait = {
            let mut session = session.lock();
            session.poll();
            sleep_duration(session.now_ms(), session.next_deadline(), poll_interval)
        };

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    tracing::debug!("session driver stopped");
}
