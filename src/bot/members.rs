//! Display-name to user-ID lookup for resolving `@name` mentions.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::{Captures, Regex};

static MENTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@(\w+)").expect("mention regex is valid"));

/// Maps usernames and nicknames to user IDs.
///
/// Every mutation goes through `upsert`, `replace` or `remove_user`, which
/// keep the reverse index in step so a renamed or departed member never keeps
/// resolving under an old alias.
#[derive(Debug, Default)]
pub struct MemberDirectory {
    by_name: HashMap<String, String>,
    aliases: HashMap<String, HashSet<String>>,
}

impl MemberDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add names for a user. Existing aliases of the user are kept.
    pub fn upsert<S: AsRef<str>>(&mut self, names: &[S], user_id: &str) {
        for name in names.iter().map(AsRef::as_ref).filter(|n| !n.is_empty()) {
            // A name moving to a different user stops being that user's alias
            if let Some(previous) = self.by_name.insert(name.to_string(), user_id.to_string())
                && previous != user_id
                && let Some(set) = self.aliases.get_mut(&previous)
            {
                set.remove(name);
            }
            self.aliases
                .entry(user_id.to_string())
                .or_default()
                .insert(name.to_string());
        }
    }

    /// Swap a user's whole alias set for `names`.
    pub fn replace<S: AsRef<str>>(&mut self, user_id: &str, names: &[S]) {
        self.remove_user(user_id);
        self.upsert(names, user_id);
    }

    /// Remove specific names, whoever they point at.
    pub fn remove<S: AsRef<str>>(&mut self, names: &[S]) {
        for name in names.iter().map(AsRef::as_ref) {
            if let Some(user_id) = self.by_name.remove(name)
                && let Some(set) = self.aliases.get_mut(&user_id)
            {
                set.remove(name);
                if set.is_empty() {
                    self.aliases.remove(&user_id);
                }
            }
        }
    }

    /// Remove every name known for a user.
    pub fn remove_user(&mut self, user_id: &str) {
        if let Some(names) = self.aliases.remove(user_id) {
            for name in names {
                if self.by_name.get(&name).is_some_and(|id| id == user_id) {
                    self.by_name.remove(&name);
                }
            }
        }
    }

    /// Exact, case-sensitive lookup.
    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.by_name.get(name).map(String::as_str)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Rewrite `@name` tokens that resolve to a member into `<@id>` mentions.
    /// Unknown names are left as typed.
    pub fn resolve_mentions(&self, text: &str) -> String {
        MENTION_RE
            .replace_all(text, |caps: &Captures| match self.lookup(&caps[1]) {
                Some(user_id) => format!("<@{user_id}>"),
                None => caps[0].to_string(),
            })
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_and_lookup() {
        let mut dir = MemberDirectory::new();
        dir.upsert(&["alice", "Ally"], "1");
        assert_eq!(dir.lookup("alice"), Some("1"));
        assert_eq!(dir.lookup("Ally"), Some("1"));
        assert_eq!(dir.lookup("ALICE"), None);
    }

    #[test]
    fn test_empty_nickname_ignored() {
        let mut dir = MemberDirectory::new();
        dir.upsert(&["alice", ""], "1");
        assert_eq!(dir.len(), 1);
        assert_eq!(dir.lookup(""), None);
    }

    #[test]
    fn test_replace_drops_old_aliases() {
        let mut dir = MemberDirectory::new();
        dir.upsert(&["alice", "Ally"], "1");
        dir.replace("1", &["alice", "Queen"]);
        assert_eq!(dir.lookup("Ally"), None);
        assert_eq!(dir.lookup("Queen"), Some("1"));
        assert_eq!(dir.lookup("alice"), Some("1"));
    }

    #[test]
    fn test_remove_user_drops_everything() {
        let mut dir = MemberDirectory::new();
        dir.upsert(&["alice", "Ally"], "1");
        dir.upsert(&["bob"], "2");
        dir.remove_user("1");
        assert_eq!(dir.lookup("alice"), None);
        assert_eq!(dir.lookup("Ally"), None);
        assert_eq!(dir.lookup("bob"), Some("2"));
    }

    #[test]
    fn test_name_taken_over_by_other_user() {
        let mut dir = MemberDirectory::new();
        dir.upsert(&["sam"], "1");
        dir.upsert(&["sam"], "2");
        assert_eq!(dir.lookup("sam"), Some("2"));
        // Removing user 1 must not take user 2's name with it
        dir.remove_user("1");
        assert_eq!(dir.lookup("sam"), Some("2"));
    }

    #[test]
    fn test_remove_names() {
        let mut dir = MemberDirectory::new();
        dir.upsert(&["alice", "Ally"], "1");
        dir.remove(&["Ally", "nobody"]);
        assert_eq!(dir.lookup("Ally"), None);
        assert_eq!(dir.lookup("alice"), Some("1"));
        dir.remove(&["alice"]);
        assert!(dir.is_empty());
    }

    #[test]
    fn test_resolve_mentions() {
        let mut dir = MemberDirectory::new();
        dir.upsert(&["alice"], "42");
        let text = dir.resolve_mentions("ask @alice or @ghost, not alice");
        assert_eq!(text, "ask <@42> or @ghost, not alice");
    }
}
