use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::model::{Message, MessageId};

/// Ordered, id-unique message sequence for one conversation.
///
/// A full replace leaves the sequence sorted by timestamp. Later merges only
/// append, so a late arrival with an older timestamp lands at the end.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    high_water: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.position(id).is_some()
    }

    pub fn position(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|m| &m.id == id)
    }

    /// Timestamp of the newest message known so far.
    pub fn high_water_mark(&self) -> Option<DateTime<Utc>> {
        self.high_water
    }

    pub fn unread_count(&self) -> usize {
        self.messages.iter().filter(|m| !m.is_read).count()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.high_water = None;
    }

    /// Replaces the whole sequence with a batch that is already sorted.
    /// A repeated id keeps its first occurrence.
    pub fn replace_all(&mut self, batch: Vec<Message>) {
        let mut seen = HashSet::with_capacity(batch.len());
        self.messages = batch
            .into_iter()
            .filter(|m| seen.insert(m.id.clone()))
            .collect();
        self.high_water = self.messages.iter().map(|m| m.timestamp).max();
    }

    /// Appends every message whose id is not present yet, in batch order,
    /// and returns what was appended. Known messages are left where they are.
    pub fn append_new(&mut self, batch: Vec<Message>) -> Vec<Message> {
        let mut seen: HashSet<MessageId> = self.messages.iter().map(|m| m.id.clone()).collect();
        let fresh: Vec<Message> = batch
            .into_iter()
            .filter(|m| seen.insert(m.id.clone()))
            .collect();
        for message in &fresh {
            self.bump_high_water(message.timestamp);
        }
        self.messages.extend(fresh.iter().cloned());
        fresh
    }

    /// Appends one message. Returns `false` without touching the sequence if
    /// the id is already present.
    pub fn push(&mut self, message: Message) -> bool {
        if self.contains(&message.id) {
            return false;
        }
        self.bump_high_water(message.timestamp);
        self.messages.push(message);
        true
    }

    /// Swaps the message stored under `id` for `message`, keeping its index.
    pub fn replace(&mut self, id: &MessageId, message: Message) -> Option<usize> {
        let index = self.position(id)?;
        self.bump_high_water(message.timestamp);
        self.messages[index] = message;
        Some(index)
    }

    pub fn remove(&mut self, id: &MessageId) -> Option<Message> {
        let index = self.position(id)?;
        Some(self.messages.remove(index))
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    /// Inserts `message` at `index`, clamped to the end. Returns `false`
    /// without touching the sequence if the id is already present.
    pub fn insert_at(&mut self, index: usize, message: Message) -> bool {
        if self.contains(&message.id) {
            return false;
        }
        self.bump_high_water(message.timestamp);
        let index = index.min(self.messages.len());
        self.messages.insert(index, message);
        true
    }

    fn bump_high_water(&mut self, ts: DateTime<Utc>) {
        if self.high_water.map_or(true, |current| ts > current) {
            self.high_water = Some(ts);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Sender;
    use chrono::TimeZone;

    fn msg(id: &str, secs: i64) -> Message {
        Message {
            id: MessageId::server(id),
            text: id.to_string(),
            sender: Sender::Other,
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            is_read: true,
            file_urls: Vec::new(),
        }
    }

    fn ids(conversation: &Conversation) -> Vec<&str> {
        conversation.messages().iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn append_new_skips_known_ids_and_keeps_order() {
        let mut conversation = Conversation::new();
        conversation.replace_all(vec![msg("b", 5), msg("a", 10)]);
        let appended = conversation.append_new(vec![msg("b", 5), msg("c", 20)]);
        assert_eq!(appended.len(), 1);
        assert_eq!(ids(&conversation), ["b", "a", "c"]);
        assert_eq!(
            conversation.high_water_mark(),
            Some(Utc.timestamp_opt(20, 0).unwrap())
        );
    }

    #[test]
    fn append_new_does_not_resort_late_arrivals() {
        let mut conversation = Conversation::new();
        conversation.replace_all(vec![msg("a", 10)]);
        conversation.append_new(vec![msg("old", 1)]);
        assert_eq!(ids(&conversation), ["a", "old"]);
        assert_eq!(
            conversation.high_water_mark(),
            Some(Utc.timestamp_opt(10, 0).unwrap())
        );
    }

    #[test]
    fn repeated_ids_within_one_batch_collapse() {
        let mut conversation = Conversation::new();
        conversation.replace_all(vec![msg("a", 1), msg("a", 1), msg("b", 2)]);
        assert_eq!(ids(&conversation), ["a", "b"]);
        conversation.append_new(vec![msg("c", 3), msg("c", 3)]);
        assert_eq!(ids(&conversation), ["a", "b", "c"]);
    }

    #[test]
    fn replace_keeps_index() {
        let mut conversation = Conversation::new();
        conversation.replace_all(vec![msg("a", 1), msg("b", 2), msg("c", 3)]);
        let index = conversation.replace(&MessageId::server("b"), msg("b2", 4));
        assert_eq!(index, Some(1));
        assert_eq!(ids(&conversation), ["a", "b2", "c"]);
    }

    #[test]
    fn push_refuses_duplicate_id() {
        let mut conversation = Conversation::new();
        assert!(conversation.push(msg("a", 1)));
        assert!(!conversation.push(msg("a", 2)));
        assert_eq!(conversation.len(), 1);
    }

    #[test]
    fn insert_at_clamps_and_refuses_duplicates() {
        let mut conversation = Conversation::new();
        conversation.replace_all(vec![msg("a", 1), msg("c", 3)]);
        assert!(conversation.insert_at(1, msg("b", 2)));
        assert!(conversation.insert_at(99, msg("d", 4)));
        assert!(!conversation.insert_at(0, msg("c", 3)));
        assert_eq!(ids(&conversation), ["a", "b", "c", "d"]);
    }
}
