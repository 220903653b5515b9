//! Per-channel conversation windows used as LLM context.

use std::collections::{HashMap, VecDeque};

use crate::openrouter::Message;

/// Bounded, ordered log of recent messages per channel.
///
/// Appending past `capacity` drops the oldest entry, so a window always holds
/// the most recent messages in arrival order. Windows live only in memory.
#[derive(Debug)]
pub struct ConversationWindows {
    capacity: usize,
    channels: HashMap<String, VecDeque<Message>>,
}

impl ConversationWindows {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            channels: HashMap::new(),
        }
    }

    pub fn append(&mut self, channel_id: &str, entry: Message) {
        if self.capacity == 0 {
            return;
        }

        let window = self
            .channels
            .entry(channel_id.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity));

        if window.len() == self.capacity {
            window.pop_front();
        }
        window.push_back(entry);
    }

    /// Copy of a channel's window, oldest first.
    pub fn snapshot(&self, channel_id: &str) -> Vec<Message> {
        self.channels
            .get(channel_id)
            .map(|w| w.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub fn len(&self, channel_id: &str) -> usize {
        self.channels.get(channel_id).map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(text: &str) -> Message {
        Message::user(text)
    }

    #[test]
    fn test_append_and_snapshot() {
        let mut windows = ConversationWindows::new(3);
        windows.append("c1", msg("a"));
        windows.append("c1", msg("b"));

        let snap = windows.snapshot("c1");
        assert_eq!(snap, vec![msg("a"), msg("b")]);
        assert!(windows.snapshot("unknown").is_empty());
    }

    #[test]
    fn test_cap_keeps_most_recent() {
        let mut windows = ConversationWindows::new(3);
        for i in 0..10 {
            windows.append("c1", msg(&i.to_string()));
        }

        let snap: Vec<String> = windows.snapshot("c1").into_iter().map(|m| m.content).collect();
        assert_eq!(snap, vec!["7", "8", "9"]);
        assert_eq!(windows.len("c1"), 3);
    }

    #[test]
    fn test_channels_are_separate() {
        let mut windows = ConversationWindows::new(2);
        windows.append("c1", msg("one"));
        windows.append("c2", msg("two"));
        assert_eq!(windows.snapshot("c1"), vec![msg("one")]);
        assert_eq!(windows.snapshot("c2"), vec![msg("two")]);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let mut windows = ConversationWindows::new(5);
        windows.append("c1", msg("before"));
        let snap = windows.snapshot("c1");
        windows.append("c1", msg("after"));
        assert_eq!(snap.len(), 1);
        assert_eq!(windows.len("c1"), 2);
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut windows = ConversationWindows::new(0);
        windows.append("c1", msg("a"));
        assert!(windows.snapshot("c1").is_empty());
    }
}
