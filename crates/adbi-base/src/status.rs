//! The five status tokens written into a job prefix's `status` file.
//!
//! These are compared byte-for-byte, case-sensitively, by every role, so the
//! representation here is deliberately just the fixed ASCII strings from the protocol
//! rather than a serde-derived enum: a renamed variant must never change the bytes on
//! the wire.

use std::fmt;
use std::str::FromStr;

/// One of the five literal values a job prefix's `status` file can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StatusToken {
    WillDequeue,
    Dequeued,
    Running,
    Success,
    Error,
}

impl StatusToken {
    pub const ALL: [StatusToken; 5] = [
        StatusToken::WillDequeue,
        StatusToken::Dequeued,
        StatusToken::Running,
        StatusToken::Success,
        StatusToken::Error,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            StatusToken::WillDequeue => "WILL_DEQUEUE",
            StatusToken::Dequeued => "DEQUEUED",
            StatusToken::Running => "RUNNING",
            StatusToken::Success => "SUCCESS",
            StatusToken::Error => "ERROR",
        }
    }

    pub fn as_bytes(self) -> &'static [u8] {
        self.as_str().as_bytes()
    }

    /// `SUCCESS` and `ERROR` are the only terminal tokens; once observed, a client
    /// must treat them as final.
    pub const fn is_terminal(self) -> bool {
        matches!(self, StatusToken::Success | StatusToken::Error)
    }

    /// Index of this token in the expected forward progression
    /// `[WILL_DEQUEUE, DEQUEUED, RUNNING, {SUCCESS|ERROR}]`.
    pub const fn sequence_index(self) -> u8 {
        match self {
            StatusToken::WillDequeue => 0,
            StatusToken::Dequeued => 1,
            StatusToken::Running => 2,
            StatusToken::Success | StatusToken::Error => 3,
        }
    }

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_bytes() == bytes)
    }
}

impl fmt::Display for StatusToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("not a recognized status token: {0:?}")]
pub struct UnrecognizedStatus(pub String);

impl FromStr for StatusToken {
    type Err = UnrecognizedStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s.as_bytes()).ok_or_else(|| UnrecognizedStatus(s.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_token() {
        for token in StatusToken::ALL {
            assert_eq!(StatusToken::parse(token.as_bytes()), Some(token));
            assert_eq!(token.to_string().parse::<StatusToken>().unwrap(), token);
        }
    }

    #[test]
    fn terminal_tokens() {
        assert!(StatusToken::Success.is_terminal());
        assert!(StatusToken::Error.is_terminal());
        assert!(!StatusToken::Running.is_terminal());
        assert!(!StatusToken::WillDequeue.is_terminal());
        assert!(!StatusToken::Dequeued.is_terminal());
    }

    #[test]
    fn sequence_is_monotonic_and_terminal_share_a_slot() {
        assert!(StatusToken::WillDequeue.sequence_index() < StatusToken::Dequeued.sequence_index());
        assert!(StatusToken::Dequeued.sequence_index() < StatusToken::Running.sequence_index());
        assert!(StatusToken::Running.sequence_index() < StatusToken::Success.sequence_index());
        assert_eq!(
            StatusToken::Success.sequence_index(),
            StatusToken::Error.sequence_index()
        );
    }

    #[test]
    fn unrecognized_bytes_are_not_a_status() {
        assert_eq!(StatusToken::parse(b"success"), None);
        assert_eq!(StatusToken::parse(b"PENDING"), None);
        assert!("garbage".parse::<StatusToken>().is_err());
    }
}
