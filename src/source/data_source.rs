use crate::gulp::{Segment, TimeWindow};
use anyhow::Result;
use futures::future::BoxFuture;

/// Failures a data source can report through `anyhow`. The gulper recovers
/// them with `downcast_ref` to decide whether a chunk is worth retrying.
#[derive(Debug)]
pub enum SourceError {
    /// Transport or protocol trouble; retried with backoff.
    Unavailable { reason: String },
    /// The source does not know the channel; retrying cannot help.
    UnknownChannel { channel: String },
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Unavailable { reason } => write!(f, "data source unavailable: {reason}"),
            SourceError::UnknownChannel { channel } => {
                write!(f, "data source has no channel {channel}")
            }
        }
    }
}

impl std::error::Error for SourceError {}

impl SourceError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SourceError::UnknownChannel { .. })
    }
}

/// Slow or remote provider of waveform windows.
///
/// `fetch` resolves to `Ok(None)` when the source simply has no data for the
/// window. Implementations are responsible for their own per-call deadlines.
pub trait DataSource: Send + Sync {
    /// Stable identity of this source, used as half of a [`crate::GulpKey`].
    fn id(&self) -> &str;

    fn fetch<'a>(
        &'a self,
        channel: &'a str,
        window: TimeWindow,
    ) -> BoxFuture<'a, Result<Option<Segment>>>;
}
