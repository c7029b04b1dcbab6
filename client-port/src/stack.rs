//! Stack capture: every user-initiated operation captures a
//! textual call-site description so an asynchronous failure can be
//! attributed back to the code that triggered it rather than to whatever
//! task happened to be polling the transport when the reply arrived.

use std::fmt;
use std::panic::Location;

/// A captured call-site, formatted as `file:line:column`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CapturedStack(String);

impl CapturedStack {
    /// Captures the caller of this function. Annotate the function you want
    /// attributed with `#[track_caller]` and call this from inside it, or
    /// call it directly from a user-facing `async fn` that is itself
    /// `#[track_caller]`.
    #[track_caller]
    pub fn capture() -> Self {
        let loc = Location::caller();
        Self(format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
    }

    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CapturedStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[track_caller]
    fn capture_here() -> CapturedStack {
        CapturedStack::capture()
    }

    #[test]
    fn captures_this_file() {
        let stack = capture_here();
        assert!(stack.as_str().contains("stack.rs"));
    }
}
