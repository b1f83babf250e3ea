use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Lifecycle of a transcription job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Downloading,
    Transcribing,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Pending,
        JobStatus::Downloading,
        JobStatus::Transcribing,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Downloading => "downloading",
            JobStatus::Transcribing => "transcribing",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Statuses that make a second job for the same URL and engine a duplicate
    pub fn blocks_duplicates(&self) -> bool {
        *self == JobStatus::Completed || self.is_in_flight()
    }

    /// Non-terminal statuses; their rows can go stale if the process dies
    pub fn is_in_flight(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether `self -> next` is an edge of the job state graph
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;

        match (self, next) {
            (Pending, Downloading) => true,
            // caption engines skip the download stage
            (Pending, Transcribing) => true,
            (Downloading, Transcribing) => true,
            (Transcribing, Processing) => true,
            (Processing, Completed) => true,
            (from, Failed) | (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s.to_lowercase())
            .ok_or_else(|| format!("Invalid job status: {}", s))
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One persisted transcription job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub url: String,
    pub video_id: String,
    pub title: String,
    pub engine: String,
    pub status: JobStatus,
    pub transcript_path: Option<PathBuf>,
    pub audio_path: Option<PathBuf>,
    pub video_path: Option<PathBuf>,
    pub subtitle_path: Option<PathBuf>,
    pub summary: Option<String>,
    pub language: Option<String>,
    pub duration_seconds: Option<f64>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    /// Diagnostics: engine substitutions, post-processing warnings
    pub notes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Field changes applied together with a status transition.
///
/// `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub engine: Option<String>,
    pub transcript_path: Option<PathBuf>,
    pub audio_path: Option<PathBuf>,
    pub video_path: Option<PathBuf>,
    pub subtitle_path: Option<PathBuf>,
    pub summary: Option<String>,
    pub language: Option<String>,
    pub duration_seconds: Option<f64>,
    pub error_message: Option<String>,
}

impl JobUpdate {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Filters for the read-only query surface
#[derive(Debug, Clone)]
pub struct JobQuery {
    /// Free text matched against title and URL
    pub text: Option<String>,
    pub status: Option<JobStatus>,
    pub engine: Option<String>,
    /// 1-based page number
    pub page: u32,
    pub per_page: u32,
}

impl Default for JobQuery {
    fn default() -> Self {
        Self {
            text: None,
            status: None,
            engine: None,
            page: 1,
            per_page: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u64 {
        if self.per_page == 0 {
            return 0;
        }
        self.total.div_ceil(self.per_page as u64)
    }
}

/// Aggregate counts over the whole ledger
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobStats {
    pub total: u64,
    pub by_status: BTreeMap<String, u64>,
    pub by_engine: BTreeMap<String, u64>,
}

impl JobStats {
    pub fn count(&self, status: JobStatus) -> u64 {
        self.by_status.get(status.as_str()).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use JobStatus::*;

    #[test]
    fn test_legal_edges() {
        let legal = [
            (Pending, Downloading),
            (Pending, Transcribing),
            (Downloading, Transcribing),
            (Transcribing, Processing),
            (Processing, Completed),
            (Pending, Failed),
            (Downloading, Failed),
            (Transcribing, Cancelled),
            (Processing, Failed),
        ];
        for (from, to) in legal {
            assert!(from.can_transition_to(to), "{} -> {} should be legal", from, to);
        }
    }

    #[test]
    fn test_illegal_edges() {
        let illegal = [
            (Completed, Downloading),
            (Completed, Failed),
            (Failed, Pending),
            (Cancelled, Transcribing),
            (Downloading, Processing),
            (Pending, Completed),
            (Processing, Transcribing),
            (Transcribing, Transcribing),
        ];
        for (from, to) in illegal {
            assert!(!from.can_transition_to(to), "{} -> {} should be illegal", from, to);
        }
    }

    #[test]
    fn test_terminal_statuses_have_no_exits() {
        for from in JobStatus::ALL.iter().filter(|s| s.is_terminal()) {
            for to in JobStatus::ALL {
                assert!(!from.can_transition_to(to));
            }
        }
    }

    #[test]
    fn test_blocking_statuses() {
        for status in [Pending, Downloading, Transcribing, Processing, Completed] {
            assert!(status.blocks_duplicates(), "{} should block", status);
        }
        assert!(!Failed.blocks_duplicates());
        assert!(!Cancelled.blocks_duplicates());
    }

    #[test]
    fn test_status_round_trip_through_str() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("running".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_page_count() {
        let page: Page<()> = Page {
            items: vec![],
            total: 41,
            page: 1,
            per_page: 20,
        };
        assert_eq!(page.total_pages(), 3);
    }
}
