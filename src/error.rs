use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
/// Errors raised by the group itself, never by the work it runs.
pub enum Error {
    /// The leader went away without a result, either by panicking or by being dropped
    Abandoned,
    /// The caller's token fired before the result was delivered
    Cancelled,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Abandoned => write!(f, "Leader dropped before the work completed"),
            Error::Cancelled => write!(f, "Caller cancelled while waiting for the result"),
        }
    }
}

impl std::error::Error for Error {}
