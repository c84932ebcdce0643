use std::fmt;

use uuid::Uuid;

/// An opaque handle threaded through a broker request and echoed back,
/// unchanged, on the event that completes it.
///
/// Tokens compare by identity and are never reused: every call to
/// [`CorrelationToken::new`] yields a fresh value. They are deliberately not
/// serializable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CorrelationToken(Uuid);

impl CorrelationToken {
    /// Creates a new, never before seen token.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
