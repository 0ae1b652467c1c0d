//! Error interface shared by this crate's loaders.
//!
//! Loader errors implement [`Error`], which (besides being a normal [`std::error::Error`])
//! can suggest how to fix the problem.

use std::borrow::Cow;

/// Error interface for this crate's user-facing errors.
pub trait Error: std::error::Error {
    /// A clarifying message to help aid someone in how to fix the error.
    fn help(&self) -> Option<Cow<'_, str>> {
        None
    }
}
