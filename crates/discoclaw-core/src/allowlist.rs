//! Allowlist — a set of user or channel ids; absence means denied (fail-closed).

use std::collections::HashSet;

/// A flat, fail-closed id set. An empty allowlist denies everyone.
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    ids: HashSet<String>,
}

impl Allowlist {
    pub fn new(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a comma/space-separated snowflake list.
    pub fn parse(raw: &str) -> Self {
        let ids = raw
            .split([',', ' ', '\n', '\t'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        Self { ids }
    }

    pub fn is_allowlisted(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Standalone fail-closed check usable without constructing an [`Allowlist`].
pub fn is_allowlisted(ids: &HashSet<String>, id: &str) -> bool {
    !ids.is_empty() && ids.contains(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allowlist_denies_everyone() {
        let empty: HashSet<String> = HashSet::new();
        assert!(!is_allowlisted(&empty, "123456789012345678"));
        assert!(!is_allowlisted(&empty, ""));
    }

    #[test]
    fn allowlist_struct_closed_over_fail() {
        let list = Allowlist::default();
        assert!(!list.is_allowlisted("123456789012345678"));
    }

    #[test]
    fn allowlist_accepts_known_id() {
        let list = Allowlist::new(["123456789012345678"]);
        assert!(list.is_allowlisted("123456789012345678"));
        assert!(!list.is_allowlisted("other"));
    }

    #[test]
    fn parse_splits_on_comma_and_space() {
        let list = Allowlist::parse("111111111111111111, 222222222222222222  333333333333333333");
        assert_eq!(list.len(), 3);
        assert!(list.is_allowlisted("222222222222222222"));
    }
}
