//! Store lifecycle events.

use std::fmt;

/// A change to a key, delivered to notification listeners.
///
/// The `Display` form is `<verb>:<key>`, e.g. `added:session`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Event {
    /// First version written for a key
    Added(String),
    /// Another version appended to an existing key
    Updated(String),
    /// Key removed by a caller
    Deleted(String),
    /// Key evicted by the sweeper
    Expired(String),
}

impl Event {
    pub fn key(&self) -> &str {
        match self {
            Event::Added(key) | Event::Updated(key) | Event::Deleted(key) | Event::Expired(key) => {
                key
            }
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Event::Added(_) => "added",
            Event::Updated(_) => "updated",
            Event::Deleted(_) => "deleted",
            Event::Expired(_) => "expired",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.verb(), self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Event::Added("k".into()).to_string(), "added:k");
        assert_eq!(Event::Updated("k".into()).to_string(), "updated:k");
        assert_eq!(Event::Deleted("k".into()).to_string(), "deleted:k");
        assert_eq!(Event::Expired("a:b".into()).to_string(), "expired:a:b");
    }

    #[test]
    fn test_key() {
        assert_eq!(Event::Expired("session".into()).key(), "session");
    }
}
