use std::{io, time::Duration};

use async_stream::stream;
use async_trait::async_trait;
use clap::ValueEnum;
use common::payloads::{ProgressResponse, StreamMessage, StreamPayload};
use futures_util::{stream::BoxStream, StreamExt};
use log::{debug, error, warn};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::{
    io::AsyncBufReadExt,
    time::{interval_at, timeout, Instant, MissedTickBehavior},
};
use tokio_util::io::StreamReader;

/// Placeholder in the callback URL replaced with the file id.
pub const FILE_ID_PLACEHOLDER: &str = "{fileId}";

/// Attempts per progress request before polling gives up.
pub const POLL_ATTEMPTS: u32 = 3;

#[derive(Error, Debug)]
pub enum ObserveError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("bad status code {0}")]
    Status(StatusCode),
    #[error("could not decode event: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("could not read event stream: {0}")]
    Io(#[from] io::Error),
    #[error("server gave up waiting for the validator")]
    ServerTimedOut,
    #[error("event stream closed before validation finished")]
    StreamClosed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Strategy {
    /// Listen on the server-sent event stream.
    Stream,
    /// Ask for the percentage on a fixed interval.
    Poll,
}

/// Where the user ends up. Exactly one is produced per observation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Navigation {
    Results(String),
    Error(String),
}

impl Navigation {
    pub fn url(&self) -> &str {
        match self {
            Self::Results(url) | Self::Error(url) => url,
        }
    }
}

pub type MessageStream = BoxStream<'static, Result<StreamMessage, ObserveError>>;

#[async_trait]
pub trait ProgressSource: Send + Sync {
    async fn fetch_progress(&self, file_id: &str) -> Result<u8, ObserveError>;
    async fn open_stream(&self, file_id: &str) -> Result<MessageStream, ObserveError>;
}

/// Talks to the server's progress and event-stream endpoints.
pub struct HttpProgressSource {
    client: Client,
    base_url: String,
    results_base_url: String,
}

impl HttpProgressSource {
    pub fn new(client: Client, base_url: &str, results_base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            results_base_url: results_base_url.trim_end_matches('/').to_string(),
        }
    }
}

/// Turns `data:` lines of an event stream into messages. Other lines are
/// ignored.
pub fn parse_event_line(line: &str) -> Option<Result<StreamMessage, serde_json::Error>> {
    let data = line.trim_end_matches(['\r', '\n']).strip_prefix("data:")?;
    Some(serde_json::from_str(data.trim_start()))
}

#[async_trait]
impl ProgressSource for HttpProgressSource {
    async fn fetch_progress(&self, file_id: &str) -> Result<u8, ObserveError> {
        let res = self
            .client
            .get(format!("{}/progress/{file_id}", self.base_url))
            .send()
            .await?;
        if res.status() != StatusCode::OK {
            return Err(ObserveError::Status(res.status()));
        }
        let body: ProgressResponse = res.json().await?;
        Ok(body.progress)
    }

    async fn open_stream(&self, file_id: &str) -> Result<MessageStream, ObserveError> {
        let res = self
            .client
            .get(format!("{}/{file_id}/sse", self.results_base_url))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        if res.status() != StatusCode::OK {
            return Err(ObserveError::Status(res.status()));
        }
        let bytes = res.bytes_stream().map(|r| r.map_err(io::Error::other));
        let mut reader = StreamReader::new(bytes);
        let mut line = String::new();
        Ok(stream! {
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => {
                        if let Some(message) = parse_event_line(&line) {
                            yield message.map_err(ObserveError::from);
                        }
                    }
                    Err(e) => {
                        yield Err(ObserveError::from(e));
                        break;
                    }
                }
            }
        }
        .boxed())
    }
}

#[derive(Clone, Debug)]
pub struct ObserverConfig {
    pub strategy: Strategy,
    pub results_base_url: String,
    pub error_url: String,
    /// Sent to instead of the results page when set; `{fileId}` is replaced.
    pub callback_url: Option<String>,
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl ObserverConfig {
    pub fn completion_url(&self, file_id: &str) -> String {
        match self.callback_url.as_deref().filter(|c| !c.is_empty()) {
            Some(template) => template.replace(FILE_ID_PLACEHOLDER, file_id),
            None => format!("{}/{file_id}", self.results_base_url.trim_end_matches('/')),
        }
    }
}

pub struct Observer<S> {
    source: S,
    config: ObserverConfig,
}

impl<S: ProgressSource> Observer<S> {
    pub fn new(source: S, config: ObserverConfig) -> Self {
        Self { source, config }
    }

    /// Tracks `file_id` until it completes, fails or runs out of time.
    /// Whichever comes first decides the navigation; the rest is dropped.
    pub async fn observe(&self, file_id: &str, mut on_progress: impl FnMut(u8) + Send) -> Navigation {
        let work = async {
            match self.config.strategy {
                Strategy::Stream => self.follow_stream(file_id, &mut on_progress).await,
                Strategy::Poll => self.poll(file_id, &mut on_progress).await,
            }
        };
        match timeout(self.config.timeout, work).await {
            Ok(Ok(())) => Navigation::Results(self.config.completion_url(file_id)),
            Ok(Err(e)) => {
                error!("Tracking file [{file_id}] failed: {e}");
                Navigation::Error(self.config.error_url.clone())
            }
            Err(_) => {
                error!("File [{file_id}] did not finish within {:?}", self.config.timeout);
                Navigation::Error(self.config.error_url.clone())
            }
        }
    }

    async fn follow_stream(&self, file_id: &str, on_progress: &mut (impl FnMut(u8) + Send)) -> Result<(), ObserveError> {
        let mut messages = self.source.open_stream(file_id).await?;
        while let Some(message) = messages.next().await {
            match message?.message {
                StreamPayload::Result(result) => {
                    let percent = result.percent();
                    debug!("File [{file_id}] is {}: {percent}%", result.status_name());
                    on_progress(percent);
                    if percent == 100 {
                        return Ok(());
                    }
                }
                StreamPayload::Notice(notice) => {
                    warn!("Server sent {notice:?} for file [{file_id}]");
                    return Err(ObserveError::ServerTimedOut);
                }
            }
        }
        Err(ObserveError::StreamClosed)
    }

    async fn fetch_with_retries(&self, file_id: &str) -> Result<u8, ObserveError> {
        let mut attempt = 1;
        loop {
            match self.source.fetch_progress(file_id).await {
                Ok(percent) => return Ok(percent),
                Err(e) if attempt < POLL_ATTEMPTS => {
                    warn!("Progress request {attempt} for file [{file_id}] failed, retrying: {e}");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn poll(&self, file_id: &str, on_progress: &mut (impl FnMut(u8) + Send)) -> Result<(), ObserveError> {
        let every = self.config.poll_interval;
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let percent = self.fetch_with_retries(file_id).await?;
            on_progress(percent);
            if percent >= 100 {
                return Ok(());
            }
        }
    }
}
