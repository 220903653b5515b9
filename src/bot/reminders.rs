//! Reminder records and the pending set.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A reminder waiting to be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: u64,
    pub channel_id: String,
    pub user_id: String,
    pub message: String,
    /// Unix seconds at which the reminder is due.
    pub time: i64,
}

impl Reminder {
    /// Text posted to the channel when the reminder fires.
    pub fn delivery_text(&self) -> String {
        format!(
            "<@{}> You asked me to remind you about this: {}",
            self.user_id, self.message
        )
    }

    pub fn is_due(&self, now: i64) -> bool {
        self.time <= now
    }
}

/// Pending reminders plus the id counter.
///
/// Removal (`take`, `take_due`) is the only way a reminder leaves the set, and
/// whoever removes it is the one who delivers it.
#[derive(Debug, Default)]
pub struct ReminderBook {
    counter: u64,
    pending: BTreeMap<u64, Reminder>,
}

impl ReminderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next reminder id.
    pub fn next_id(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn insert(&mut self, reminder: Reminder) {
        self.pending.insert(reminder.id, reminder);
    }

    pub fn take(&mut self, id: u64) -> Option<Reminder> {
        self.pending.remove(&id)
    }

    /// Remove and return every reminder due at `now`, oldest first.
    pub fn take_due(&mut self, now: i64) -> Vec<Reminder> {
        let due: Vec<u64> = self
            .pending
            .values()
            .filter(|r| r.is_due(now))
            .map(|r| r.id)
            .collect();

        let mut taken: Vec<Reminder> = due.into_iter().filter_map(|id| self.pending.remove(&id)).collect();
        taken.sort_by_key(|r| (r.time, r.id));
        taken
    }

    #[cfg(test)]
    pub fn contains(&self, id: u64) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn snapshot(&self) -> Vec<Reminder> {
        self.pending.values().cloned().collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Replace the whole book with persisted state.
    pub fn restore(&mut self, counter: u64, reminders: Vec<Reminder>) {
        let highest = reminders.iter().map(|r| r.id).max().unwrap_or(0);
        // Never hand out an id that is already in use, even if the file disagrees
        self.counter = counter.max(highest);
        self.pending = reminders.into_iter().map(|r| (r.id, r)).collect();
    }
}

/// Parse a reminder delay like "5m", "2h", "1d" or "1h30m" into seconds.
pub fn parse_duration(input: &str) -> Result<i64, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("Empty duration".to_string());
    }

    let mut total: i64 = 0;
    let mut rest = input;
    while !rest.is_empty() {
        let unit_start = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if unit_start == 0 {
            return Err(format!("Invalid number in '{}'", input));
        }
        let num: i64 = rest[..unit_start]
            .parse()
            .map_err(|_| format!("Invalid number in '{}'", input))?;

        rest = &rest[unit_start..];
        let unit_end = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let multiplier = match &rest[..unit_end] {
            "s" | "sec" | "secs" => 1,
            "m" | "min" | "mins" => 60,
            "h" | "hr" | "hrs" => 60 * 60,
            "d" | "day" | "days" => 24 * 60 * 60,
            "w" | "week" | "weeks" => 7 * 24 * 60 * 60,
            "" => return Err(format!("Missing unit in '{}'. Use m/h/d", input)),
            unit => return Err(format!("Unknown unit '{}'. Use m/h/d", unit)),
        };
        rest = &rest[unit_end..];

        total = num
            .checked_mul(multiplier)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(|| format!("Duration '{}' is too long", input))?;
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reminder(id: u64, time: i64) -> Reminder {
        Reminder {
            id,
            channel_id: "c1".into(),
            user_id: "u1".into(),
            message: format!("reminder {id}"),
            time,
        }
    }

    #[test]
    fn test_parse_simple_units() {
        assert_eq!(parse_duration("5m").unwrap(), 300);
        assert_eq!(parse_duration("2h").unwrap(), 7200);
        assert_eq!(parse_duration("1d").unwrap(), 86_400);
        assert_eq!(parse_duration("90s").unwrap(), 90);
    }

    #[test]
    fn test_parse_compound() {
        assert_eq!(parse_duration("1h30m").unwrap(), 5400);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("30").is_err());
        assert!(parse_duration("30x").is_err());
        assert!(parse_duration("99999999999999999w").is_err());
    }

    #[test]
    fn test_delivery_text_tags_user() {
        let r = reminder(1, 0);
        assert_eq!(r.delivery_text(), "<@u1> You asked me to remind you about this: reminder 1");
    }

    #[test]
    fn test_ids_are_monotonic() {
        let mut book = ReminderBook::new();
        assert_eq!(book.next_id(), 1);
        assert_eq!(book.next_id(), 2);
        assert_eq!(book.counter(), 2);
    }

    #[test]
    fn test_take_due_removes_only_due() {
        let mut book = ReminderBook::new();
        book.insert(reminder(1, 100));
        book.insert(reminder(2, 50));
        book.insert(reminder(3, 200));

        let due: Vec<u64> = book.take_due(100).iter().map(|r| r.id).collect();
        assert_eq!(due, vec![2, 1]);
        assert_eq!(book.len(), 1);
        assert!(book.contains(3));
        assert!(book.take_due(100).is_empty());
    }

    #[test]
    fn test_take_is_once() {
        let mut book = ReminderBook::new();
        book.insert(reminder(7, 10));
        assert!(book.take(7).is_some());
        assert!(book.take(7).is_none());
    }

    #[test]
    fn test_restore_never_reuses_ids() {
        let mut book = ReminderBook::new();
        book.restore(3, vec![reminder(9, 10)]);
        assert_eq!(book.next_id(), 10);
        assert!(book.contains(9));
    }
}
