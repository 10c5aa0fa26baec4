//! Optimistic mutations: apply locally, then commit or roll back once the
//! transport answers.

use crate::conversation::Conversation;
use crate::model::{Message, MessageId};

/// A local change applied ahead of remote confirmation.
#[derive(Debug)]
#[must_use = "an optimistic change must be committed or rolled back"]
pub struct Optimistic {
    undo: Undo,
}

#[derive(Debug)]
enum Undo {
    /// Drop the placeholder again. Anything merged meanwhile survives.
    Discard(MessageId),
    /// Put a removed message back behind the neighbour it had. The rest of
    /// the sequence is left as it is now, so confirmations and merges that
    /// landed meanwhile survive.
    Reinsert {
        message: Message,
        index: usize,
        after: Option<MessageId>,
    },
    /// The id was not in the sequence.
    Nothing,
}

/// How a confirmed insert was reconciled with the sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    /// The placeholder was swapped for the confirmed message at this index.
    InPlace(usize),
    /// The confirmed id was already merged (e.g. by a poll); the placeholder
    /// was dropped so the id appears once.
    AlreadyPresent,
    /// The placeholder was gone before confirmation arrived.
    Missing,
    /// Nothing to reconcile.
    Unchanged,
}

impl Optimistic {
    /// Appends `placeholder` to the sequence.
    pub fn insert(conversation: &mut Conversation, placeholder: Message) -> Self {
        let id = placeholder.id.clone();
        conversation.push(placeholder);
        Self {
            undo: Undo::Discard(id),
        }
    }

    /// Removes `id`, remembering where it sat.
    pub fn remove(conversation: &mut Conversation, id: &MessageId) -> Self {
        let Some(index) = conversation.position(id) else {
            return Self { undo: Undo::Nothing };
        };
        let after = index
            .checked_sub(1)
            .map(|prev| conversation.messages()[prev].id.clone());
        let undo = match conversation.remove(id) {
            Some(message) => Undo::Reinsert {
                message,
                index,
                after,
            },
            None => Undo::Nothing,
        };
        Self { undo }
    }

    /// Makes the change permanent. For an insert, `confirmed` replaces the
    /// placeholder without moving it.
    pub fn commit(self, conversation: &mut Conversation, confirmed: Option<Message>) -> Reconciled {
        match (self.undo, confirmed) {
            (Undo::Discard(placeholder), Some(confirmed)) => {
                if confirmed.id != placeholder && conversation.contains(&confirmed.id) {
                    conversation.remove(&placeholder);
                    return Reconciled::AlreadyPresent;
                }
                match conversation.replace(&placeholder, confirmed) {
                    Some(index) => Reconciled::InPlace(index),
                    None => Reconciled::Missing,
                }
            }
            (Undo::Reinsert { message, .. }, _) => {
                conversation.remove(&message.id);
                Reconciled::Unchanged
            }
            _ => Reconciled::Unchanged,
        }
    }

    pub fn rollback(self, conversation: &mut Conversation) {
        match self.undo {
            Undo::Discard(placeholder) => {
                conversation.remove(&placeholder);
            }
            Undo::Reinsert {
                message,
                index,
                after,
            } => {
                let at = match after {
                    None => 0,
                    Some(prev) => conversation
                        .position(&prev)
                        .map_or(index, |found| found + 1),
                };
                conversation.insert_at(at, message);
            }
            Undo::Nothing => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Sender;
    use chrono::{TimeZone, Utc};

    fn msg(id: MessageId, secs: i64) -> Message {
        Message {
            id,
            text: "x".into(),
            sender: Sender::Own,
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            is_read: false,
            file_urls: Vec::new(),
        }
    }

    fn seeded() -> Conversation {
        let mut conversation = Conversation::new();
        conversation.replace_all(vec![
            msg(MessageId::server("a"), 1),
            msg(MessageId::server("b"), 2),
        ]);
        conversation
    }

    #[test]
    fn insert_commit_swaps_in_place() {
        let mut conversation = seeded();
        let temp = MessageId::Temp("temp-1".into());
        let change = Optimistic::insert(&mut conversation, msg(temp, 3));
        assert_eq!(conversation.len(), 3);
        let outcome = change.commit(&mut conversation, Some(msg(MessageId::server("srv"), 4)));
        assert_eq!(outcome, Reconciled::InPlace(2));
        assert_eq!(conversation.len(), 3);
        assert_eq!(conversation.messages()[2].id, MessageId::server("srv"));
    }

    #[test]
    fn insert_commit_drops_placeholder_when_already_merged() {
        let mut conversation = seeded();
        let temp = MessageId::Temp("temp-1".into());
        let change = Optimistic::insert(&mut conversation, msg(temp.clone(), 3));
        conversation.append_new(vec![msg(MessageId::server("srv"), 4)]);
        let outcome = change.commit(&mut conversation, Some(msg(MessageId::server("srv"), 4)));
        assert_eq!(outcome, Reconciled::AlreadyPresent);
        assert!(!conversation.contains(&temp));
        assert_eq!(conversation.len(), 3);
    }

    #[test]
    fn insert_rollback_keeps_concurrent_merges() {
        let mut conversation = seeded();
        let temp = MessageId::Temp("temp-1".into());
        let change = Optimistic::insert(&mut conversation, msg(temp.clone(), 3));
        conversation.append_new(vec![msg(MessageId::server("c"), 5)]);
        change.rollback(&mut conversation);
        assert!(!conversation.contains(&temp));
        assert!(conversation.contains(&MessageId::server("c")));
    }

    #[test]
    fn remove_rollback_restores_exact_order() {
        let mut conversation = seeded();
        let before = conversation.snapshot();
        let change = Optimistic::remove(&mut conversation, &MessageId::server("a"));
        assert_eq!(conversation.len(), 1);
        change.rollback(&mut conversation);
        assert_eq!(conversation.messages(), before.as_slice());
    }

    #[test]
    fn remove_rollback_keeps_confirmation_made_meanwhile() {
        let mut conversation = seeded();
        let temp = MessageId::Temp("temp-1".into());
        let send = Optimistic::insert(&mut conversation, msg(temp, 3));
        let delete = Optimistic::remove(&mut conversation, &MessageId::server("b"));
        let _ = send.commit(&mut conversation, Some(msg(MessageId::server("srv"), 4)));
        delete.rollback(&mut conversation);

        let ids: Vec<&str> = conversation.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "srv"]);
    }

    #[test]
    fn remove_commit_drops_a_copy_merged_meanwhile() {
        let mut conversation = seeded();
        let change = Optimistic::remove(&mut conversation, &MessageId::server("b"));
        conversation.append_new(vec![msg(MessageId::server("b"), 2)]);
        let _ = change.commit(&mut conversation, None);
        assert!(!conversation.contains(&MessageId::server("b")));
    }

    #[test]
    fn removing_an_unknown_id_is_a_no_op() {
        let mut conversation = seeded();
        let change = Optimistic::remove(&mut conversation, &MessageId::server("zz"));
        change.rollback(&mut conversation);
        assert_eq!(conversation.len(), 2);
    }
}
