//! The process-wide monitor roster, loaded once at startup.

use std::collections::HashSet;
use std::path::Path;

use crate::error::ServerError;

/// Set of user-ids permitted to join a room as a monitor (observer, not a
/// player slot). Loaded once and never reloaded for the life of the process.
#[derive(Debug, Clone, Default)]
pub struct MonitorRoster {
    ids: HashSet<i32>,
}

impl MonitorRoster {
    pub fn empty() -> Self {
        Self { ids: HashSet::new() }
    }

    pub fn is_monitor(&self, user_id: i32) -> bool {
        self.ids.contains(&user_id)
    }

    /// Loads `monitors.txt`-shaped whitespace-separated user-ids from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ServerError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ServerError::MonitorsFile {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::parse(&contents))
    }

    fn parse(contents: &str) -> Self {
        let ids = contents
            .split_whitespace()
            .filter_map(|token| token.parse::<i32>().ok())
            .collect();
        Self { ids }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn parses_whitespace_separated_ids() {
        let roster = MonitorRoster::parse("1 2\n3\t4\n\n5");
        assert!(roster.is_monitor(1));
        assert!(roster.is_monitor(5));
        assert!(!roster.is_monitor(6));
    }

    #[test]
    fn ignores_malformed_tokens() {
        let roster = MonitorRoster::parse("1 abc 2");
        assert!(roster.is_monitor(1));
        assert!(roster.is_monitor(2));
    }

    #[test]
    fn empty_roster_is_monitor_for_nobody() {
        let roster = MonitorRoster::empty();
        assert!(!roster.is_monitor(1));
    }
}
