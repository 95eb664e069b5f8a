//! Error handling for the preparation pipeline.
//!
//! Provides the fatal error taxonomy: configuration problems, insufficient
//! data, and grid-alignment failures abort a run with no partial output.
//! Recoverable conditions (degraded retrieval, corrected values) are not
//! errors; they are recorded in the run's diagnostic log instead.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PrepError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Insufficient data: {message}")]
    DataSufficiency { message: String },

    #[error(
        "No viable grid phase found within {attempts} attempts at {step_minutes} min spacing; \
         choose a different interval"
    )]
    AlignmentFailure { attempts: usize, step_minutes: f64 },

    #[error("Duplicate records for variable {variable} at {timestamp}")]
    DuplicateRecords { variable: String, timestamp: String },

    #[error("Input parsing failed at row {row}: {reason}")]
    InputParsing { row: usize, reason: String },

    #[error("Pressure retrieval failed from {src_name}: {reason}")]
    PressureRetrieval { src_name: String, reason: String },
}

impl PrepError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a data sufficiency error.
    pub fn data_sufficiency(message: impl Into<String>) -> Self {
        Self::DataSufficiency {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PrepError>;
