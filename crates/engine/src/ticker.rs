//! Drop-free periodic clock.
//!
//! The ticker owns `last` and `offset` inside a single task. Every interval
//! boundary is emitted exactly once and in order: a slow consumer makes the
//! ticker fall behind, after which it emits each missed boundary back to
//! back instead of coalescing them. While paused, `last` does not move, so
//! the boundaries that pass during the pause are emitted on unpause.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;

use vigil_common::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq)]
enum TickerCommand {
    ResetOffset(Duration),
    Pause,
    Unpause,
}

/// Cross-task control surface of a running [`Ticker`].
#[derive(Debug, Clone)]
pub struct TickerHandle {
    commands: mpsc::UnboundedSender<TickerCommand>,
}

impl TickerHandle {
    pub fn reset_offset(&self, offset: Duration) {
        let _ = self.commands.send(TickerCommand::ResetOffset(offset));
    }

    pub fn pause(&self) {
        let _ = self.commands.send(TickerCommand::Pause);
    }

    pub fn unpause(&self) {
        let _ = self.commands.send(TickerCommand::Unpause);
    }
}

pub struct Ticker {
    pub c: mpsc::Receiver<DateTime<Utc>>,
    handle: TickerHandle,
}

impl Ticker {
    /// Starts emitting `last + n * interval` for n = 1, 2, ... once the clock
    /// (shifted back by `offset`) has passed each boundary.
    pub fn spawn(
        clock: Arc<dyn Clock>,
        last: DateTime<Utc>,
        offset: Duration,
        interval_seconds: i64,
    ) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let driver = TickerDriver {
            clock,
            last,
            offset,
            interval: Duration::seconds(interval_seconds.max(1)),
            paused: false,
        };
        tokio::spawn(driver.run(tx, cmd_rx));
        Self {
            c: rx,
            handle: TickerHandle { commands: cmd_tx },
        }
    }

    pub fn handle(&self) -> TickerHandle {
        self.handle.clone()
    }
}

struct TickerDriver {
    clock: Arc<dyn Clock>,
    last: DateTime<Utc>,
    offset: Duration,
    interval: Duration,
    paused: bool,
}

impl TickerDriver {
    async fn run(
        mut self,
        tx: mpsc::Sender<DateTime<Utc>>,
        mut commands: mpsc::UnboundedReceiver<TickerCommand>,
    ) {
        let mut commands_open = true;
        loop {
            let next = self.last + self.interval;
            let diff = (self.clock.now() - self.offset) - next;

            if diff >= Duration::zero() && !self.paused {
                if tx.send(next).await.is_err() {
                    return;
                }
                self.last = next;
                continue;
            }

            let wait = (-diff).to_std().unwrap_or_default();
            let sleeping = !self.paused;
            tokio::select! {
                _ = tokio::time::sleep(wait), if sleeping => {}
                cmd = commands.recv(), if commands_open => match cmd {
                    Some(cmd) => self.apply(cmd),
                    None => commands_open = false,
                },
                _ = tx.closed() => return,
            }
        }
    }

    fn apply(&mut self, cmd: TickerCommand) {
        match cmd {
            TickerCommand::ResetOffset(offset) => self.offset = offset,
            TickerCommand::Pause => self.paused = true,
            TickerCommand::Unpause => self.paused = false,
        }
    }
}
