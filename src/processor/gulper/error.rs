use crate::gulp::TimeWindow;

/// Why a gulper stopped before covering its target. Attached as context to
/// the error carried by [`crate::GulpEvent::Failed`].
#[derive(Debug)]
pub enum GulpError {
    /// The source kept failing on `window` until retries ran out.
    SourceUnavailable { window: TimeWindow, attempts: usize },
    /// The source refused `window` with an error that retrying cannot fix.
    Rejected { window: TimeWindow },
    /// The gulper task panicked.
    WorkerPanicked { message: String },
}

impl std::fmt::Display for GulpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GulpError::SourceUnavailable { window, attempts } => {
                write!(f, "source unavailable for {window} after {attempts} attempts")
            }
            GulpError::Rejected { window } => write!(f, "source rejected {window}"),
            GulpError::WorkerPanicked { message } => write!(f, "gulper panicked: {message}"),
        }
    }
}

impl std::error::Error for GulpError {}
