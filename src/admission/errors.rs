//! Memory admission controller error types.

use std::fmt;

/// Admission-specific error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionErrorCode {
    /// A `use_` call's deadline elapsed before it was admitted.
    Timeout,
    /// The request exceeds the configured absolute memory limit even when
    /// the bucket is fully drained; it can never be admitted.
    OutOfMemory,
}

impl AdmissionErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            AdmissionErrorCode::Timeout => "ADMISSION_TIMEOUT",
            AdmissionErrorCode::OutOfMemory => "ADMISSION_OUT_OF_MEMORY",
        }
    }
}

impl fmt::Display for AdmissionErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Failure to admit a request to use `size` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionError {
    code: AdmissionErrorCode,
    requested: usize,
}

impl AdmissionError {
    pub fn timeout(requested: usize) -> Self {
        Self {
            code: AdmissionErrorCode::Timeout,
            requested,
        }
    }

    pub fn out_of_memory(requested: usize) -> Self {
        Self {
            code: AdmissionErrorCode::OutOfMemory,
            requested,
        }
    }

    pub fn code(&self) -> AdmissionErrorCode {
        self.code
    }

    pub fn requested(&self) -> usize {
        self.requested
    }
}

impl fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] could not admit request for {} bytes",
            self.code, self.requested
        )
    }
}

impl std::error::Error for AdmissionError {}

pub type AdmissionResult<T> = Result<T, AdmissionError>;
