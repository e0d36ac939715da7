use chrono::NaiveDate;

/// Fatal conditions that abort an analysis run before any aggregation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnalysisError {
    #[error("missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("date window starts on {start} after it ends on {end}")]
    InvalidWindow { start: NaiveDate, end: NaiveDate },

    #[error("value range minimum {min} is greater than maximum {max}")]
    InvalidRange { min: f64, max: f64 },

    #[error("sample size must be at least 1")]
    InvalidSampleSize,

    #[error("unknown granularity '{0}' (expected day, week, month, quarter, year or total)")]
    UnknownGranularity(String),
}

impl AnalysisError {
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::MissingColumns(_) => "missing_column",
            AnalysisError::InvalidWindow { .. } => "invalid_window",
            AnalysisError::InvalidRange { .. } => "invalid_range",
            AnalysisError::InvalidSampleSize => "invalid_sample_size",
            AnalysisError::UnknownGranularity(_) => "unknown_granularity",
        }
    }
}
