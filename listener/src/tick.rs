/// The listener's main loop.
///
/// Every notification from supervisord is acknowledged.  `TICK_*` events are
/// the sampling clock: each one consumes the activity flag and, if anything
/// changed since the previous tick, runs a restart before acknowledging.
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncWrite};

use crate::activity::ActivityFlag;
use crate::protocol::{ListenerChannel, ProtocolError};
use crate::restart::RestartDispatcher;
use crate::supervisor::ProcessControl;

/// What happened to one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    /// Not a tick; acknowledged without looking at the flag.
    Ignored,
    /// A tick with no activity since the previous one.
    Quiet,
    /// A tick that triggered a restart attempt.
    Restarted,
    /// A tick whose restart could not list processes; activity stays pending.
    Deferred,
}

pub struct TickLoop<R, W, C> {
    channel: ListenerChannel<R, W>,
    activity: Arc<ActivityFlag>,
    dispatcher: RestartDispatcher<C>,
}

impl<R, W, C> TickLoop<R, W, C>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    C: ProcessControl,
{
    pub fn new(
        channel: ListenerChannel<R, W>,
        activity: Arc<ActivityFlag>,
        dispatcher: RestartDispatcher<C>,
    ) -> Self {
        Self {
            channel,
            activity,
            dispatcher,
        }
    }

    /// Runs until the notification channel fails. Never returns `Ok`.
    pub async fn run(&mut self) -> Result<(), ProtocolError> {
        loop {
            self.handle_next().await?;
        }
    }

    /// Waits for one notification, handles it and acknowledges it.
    pub async fn handle_next(&mut self) -> Result<Handled, ProtocolError> {
        let notification = self.channel.wait().await?;

        let handled = if !notification.is_tick() {
            tracing::debug!("[tick] Ignoring {}", notification.event_name());
            Handled::Ignored
        } else if !self.activity.consume() {
            tracing::debug!(
                "[tick] {} (when={}) with no activity",
                notification.event_name(),
                notification.payload_fields().get("when").map(String::as_str).unwrap_or("?")
            );
            Handled::Quiet
        } else {
            tracing::info!("[tick] Activity detected, restarting");
            match self.dispatcher.restart().await {
                Ok(report) => {
                    tracing::debug!(
                        "[tick] Restart pass done: {} restarted, {} not found",
                        report.restarted(),
                        report.not_found().count()
                    );
                    Handled::Restarted
                }
                Err(_) => {
                    // Keep the pending activity so the next tick tries again.
                    self.activity.mark();
                    Handled::Deferred
                }
            }
        };

        self.channel.ok().await?;
        Ok(handled)
    }
}
