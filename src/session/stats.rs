use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::actions::DispatchStats;
use crate::speech::RecognizerStats;

/// Statistics about a finished assistant session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    /// When the session started
    pub started_at: DateTime<Utc>,

    /// Total duration in seconds
    pub duration_secs: f64,

    /// Frames accepted into the frame queue
    pub frames_captured: u64,

    /// Frames lost to queue overruns
    pub frames_dropped: u64,

    /// Recognizer counters; `None` for typed input
    pub recognizer: Option<RecognizerStats>,

    pub dispatch: DispatchStats,
}
