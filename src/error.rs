//! Grepable error codes shared by every error enum in the crate.

/// Stable machine-readable code for an error, plus whether retrying the
/// same operation can reasonably succeed.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}
