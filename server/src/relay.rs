use std::{fmt, sync::Arc, time::Duration};

use async_stream::stream;
use bytes::Bytes;
use common::payloads::{StreamMessage, HEARTBEAT_EVENT};
use futures::Stream;
use log::{debug, error};
use tokio::{
    select,
    time::{interval_at, sleep, sleep_until, timeout_at, Instant, Interval, MissedTickBehavior},
};

use crate::submission::Submitter;

/// A closed socket only fails the second write made after it closed.
const PINGS_BEFORE_CHECK: usize = 2;

/// Gives the server a turn to flush a ping before the stream moves on.
const FLUSH_PAUSE: Duration = Duration::from_millis(20);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReleaseReason {
    Completed,
    TimedOut,
    BackendFailed,
    Disconnected,
}

impl fmt::Display for ReleaseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Completed => "validation complete",
            Self::TimedOut => "timed out",
            Self::BackendFailed => "backend failure",
            Self::Disconnected => "client disconnected",
        };
        f.write_str(s)
    }
}

/// All three periods must be non-zero.
#[derive(Clone, Copy, Debug)]
pub struct RelayTimings {
    /// How often the validator is asked for progress.
    pub every: Duration,
    /// How often an idle stream writes a comment, so a closed connection is
    /// noticed between checks.
    pub heartbeat: Duration,
    pub timeout: Duration,
}

type ReleaseHook = Box<dyn FnOnce(ReleaseReason) + Send>;

enum Tick {
    Poll,
    Heartbeat,
    TimedOut,
    Released,
}

/// Owns the poll and heartbeat intervals and the absolute deadline of one
/// relay.
///
/// `release` may be called any number of times; only the first call stops the
/// intervals and reports a reason. Dropping the handles (the server failed to
/// write to a closed connection and dropped the response body) releases them
/// too.
pub struct RelayHandles {
    ticker: Option<Interval>,
    heartbeat: Option<Interval>,
    deadline: Instant,
    on_release: Option<ReleaseHook>,
}

impl RelayHandles {
    pub fn new(timings: RelayTimings, on_release: impl FnOnce(ReleaseReason) + Send + 'static) -> Self {
        let now = Instant::now();
        let mut ticker = interval_at(now + timings.every, timings.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat = interval_at(now + timings.heartbeat, timings.heartbeat);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            ticker: Some(ticker),
            heartbeat: Some(heartbeat),
            deadline: now + timings.timeout,
            on_release: Some(Box::new(on_release)),
        }
    }

    pub fn release(&mut self, reason: ReleaseReason) {
        if let Some(hook) = self.on_release.take() {
            self.ticker = None;
            self.heartbeat = None;
            hook(reason);
        }
    }

    pub fn is_released(&self) -> bool {
        self.on_release.is_none()
    }

    async fn next_tick(&mut self) -> Tick {
        let deadline = self.deadline;
        let (Some(ticker), Some(heartbeat)) = (self.ticker.as_mut(), self.heartbeat.as_mut()) else {
            return Tick::Released;
        };
        select! {
            biased;
            _ = sleep_until(deadline) => Tick::TimedOut,
            _ = ticker.tick() => Tick::Poll,
            _ = heartbeat.tick() => Tick::Heartbeat,
        }
    }
}

impl Drop for RelayHandles {
    fn drop(&mut self) {
        self.release(ReleaseReason::Disconnected);
    }
}

fn encode(message: StreamMessage) -> Result<Bytes, serde_json::Error> {
    message.to_event().map(Bytes::from)
}

fn ping() -> Bytes {
    Bytes::from_static(HEARTBEAT_EVENT.as_bytes())
}

/// Event stream for `file_id`. Polls every `timings.every` until the result
/// reaches 100%, the backend fails, or `timings.timeout` passes; each of those
/// ends the stream after one final event.
///
/// Every check is preceded by pings, so the body of a closed connection is
/// dropped before the validator is called for it.
pub fn progress_events(
    submitter: Arc<Submitter>,
    file_id: String,
    timings: RelayTimings,
    on_release: impl FnOnce(ReleaseReason) + Send + 'static,
) -> impl Stream<Item = Result<Bytes, serde_json::Error>> {
    stream! {
        let mut handles = RelayHandles::new(timings, on_release);
        loop {
            match handles.next_tick().await {
                Tick::Released => break,
                Tick::Heartbeat => yield Ok(ping()),
                Tick::TimedOut => {
                    error!("UI update timeout reached. Closing stream for file [{file_id}].");
                    yield encode(StreamMessage::timeout());
                    handles.release(ReleaseReason::TimedOut);
                }
                Tick::Poll => {
                    for _ in 0..PINGS_BEFORE_CHECK {
                        yield Ok(ping());
                        sleep(FLUSH_PAUSE).await;
                    }
                    match timeout_at(handles.deadline, submitter.check(&file_id)).await {
                        Err(_) => {
                            error!("UI update timeout reached while checking file [{file_id}].");
                            yield encode(StreamMessage::timeout());
                            handles.release(ReleaseReason::TimedOut);
                        }
                        Ok(Ok(result)) => {
                            debug!("File [{file_id}] is {}% complete", result.percent());
                            let done = result.is_complete();
                            yield encode(StreamMessage::result(result));
                            if done {
                                handles.release(ReleaseReason::Completed);
                            }
                        }
                        Ok(Err(e)) => {
                            error!("Encountered error while updating validation progress: {e}");
                            yield encode(StreamMessage::timeout());
                            handles.release(ReleaseReason::BackendFailed);
                        }
                    }
                }
            }
        }
    }
}
