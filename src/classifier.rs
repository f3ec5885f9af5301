//! Classification and grouping of collected messages
//!
//! Messages carrying a `List-Unsubscribe` header are grouped by sender
//! identity; everything else is only marked for deletion.

use std::collections::HashMap;
use tracing::debug;

use crate::models::{Message, SenderGroup, LIST_UNSUBSCRIBE_HEADER};

/// Result of partitioning a mailbox folder
#[derive(Debug, Clone, Default)]
pub struct Classification {
    /// Messages without an unsubscribe directive, in input order
    pub without_directive: Vec<Message>,
    /// Sender groups, largest first, ties broken by key
    pub groups: Vec<SenderGroup>,
}

impl Classification {
    pub fn grouped_message_count(&self) -> usize {
        self.groups.iter().map(SenderGroup::len).sum()
    }

    pub fn without_directive_ids(&self) -> Vec<String> {
        self.without_directive.iter().map(|m| m.id.clone()).collect()
    }
}

pub fn has_unsubscribe_directive(message: &Message) -> bool {
    message.has_header(LIST_UNSUBSCRIBE_HEADER)
}

/// Partition messages and group the ones with a directive by sender identity
pub fn classify_messages(messages: Vec<Message>) -> Classification {
    let mut without_directive = Vec::new();
    let mut groups: Vec<SenderGroup> = Vec::new();
    let mut index_by_key: HashMap<String, usize> = HashMap::new();

    for message in messages {
        if !has_unsubscribe_directive(&message) {
            without_directive.push(message);
            continue;
        }

        let key = message.sender_key().to_string();
        match index_by_key.get(&key) {
            Some(&index) => groups[index].messages.push(message),
            None => {
                index_by_key.insert(key.clone(), groups.len());
                groups.push(SenderGroup {
                    key,
                    messages: vec![message],
                });
            }
        }
    }

    sort_groups(&mut groups);

    debug!(
        "Classified {} groups and {} messages without a directive",
        groups.len(),
        without_directive.len()
    );

    Classification {
        without_directive,
        groups,
    }
}

/// Largest group first; equal sizes ordered by key so runs are reproducible
pub fn sort_groups(groups: &mut [SenderGroup]) {
    groups.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.key.cmp(&b.key)));
}
