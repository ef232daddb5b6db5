//! Foreground conversation state: the active conversation id, its header and
//! the ordered list of displayed messages.
//!
//! Only the reconciler and full loads mutate the list. `append` never
//! reorders and never deduplicates.

use shared::{
    domain::{ConversationId, CorrelationId},
    protocol::{ChatHistoryResponse, ChatInfo},
};
use tracing::debug;

use crate::types::{ConversationSnapshot, Message, MessageOrigin};

/// Tags a full load with the conversation it was requested for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    pub conversation_id: ConversationId,
    seq: u64,
}

impl LoadTicket {
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// History installed. `settled` lists local sends the history already contains.
    Applied { settled: Vec<CorrelationId> },
    /// The response belongs to a conversation or request that is no longer current.
    Stale,
}

#[derive(Debug, Default)]
pub struct ConversationView {
    active: Option<ConversationId>,
    info: Option<ChatInfo>,
    messages: Vec<Message>,
    outstanding: Option<LoadTicket>,
    /// Leading entries of `messages` that were shown when the outstanding load was requested.
    known: usize,
    next_seq: u64,
}

impl ConversationView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<&ConversationId> {
        self.active.as_ref()
    }

    pub fn is_active(&self, conversation_id: &ConversationId) -> bool {
        self.active.as_ref() == Some(conversation_id)
    }

    pub fn info(&self) -> Option<&ChatInfo> {
        self.info.as_ref()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_loading(&self) -> bool {
        self.outstanding.is_some()
    }

    /// Makes `conversation_id` the foreground conversation. The previous list is dropped.
    pub fn switch_to(&mut self, conversation_id: ConversationId) -> LoadTicket {
        self.active = Some(conversation_id.clone());
        self.info = None;
        self.messages.clear();
        self.issue_ticket(conversation_id)
    }

    /// Requests a fresh copy of the active conversation without clearing what is shown.
    pub fn begin_reload(&mut self) -> Option<LoadTicket> {
        let conversation_id = self.active.clone()?;
        Some(self.issue_ticket(conversation_id))
    }

    fn issue_ticket(&mut self, conversation_id: ConversationId) -> LoadTicket {
        self.next_seq += 1;
        let ticket = LoadTicket {
            conversation_id,
            seq: self.next_seq,
        };
        self.outstanding = Some(ticket.clone());
        self.known = self.messages.len();
        ticket
    }

    /// Installs a load response, replacing the list wholesale.
    ///
    /// Entries shown before the response landed survive unless the history
    /// already holds them. Any entry matches a history row carrying its
    /// correlation id. Without an id, only entries that were on screen when
    /// the load was requested are matched by content, and only against rows
    /// after the last row already matched, so a repeated text never claims an
    /// older message. Entries that arrived during the load are carried until
    /// their echo settles them. Failed sends never reached the server and are
    /// always kept.
    pub fn complete_load(
        &mut self,
        ticket: &LoadTicket,
        response: ChatHistoryResponse,
    ) -> LoadOutcome {
        if self.outstanding.as_ref() != Some(ticket) || !self.is_active(&ticket.conversation_id) {
            debug!(
                conversation_id = %ticket.conversation_id,
                seq = ticket.seq,
                "view: discarding stale load response"
            );
            return LoadOutcome::Stale;
        }
        self.outstanding = None;
        let known = std::mem::take(&mut self.known);

        let conversation_id = ticket.conversation_id.clone();
        let mut history: Vec<Message> = response
            .messages
            .into_iter()
            .map(|message| Message::from_history(conversation_id.clone(), message))
            .collect();

        let mut claimed = vec![false; history.len()];
        let mut cursor = 0;
        let mut settled: Vec<CorrelationId> = history
            .iter()
            .filter_map(|message| message.correlation_id.clone())
            .collect();
        let mut carried = Vec::new();
        for (position, shown) in self.messages.drain(..).enumerate() {
            if shown.is_failed() {
                carried.push(shown);
                continue;
            }
            let was_shown = position < known;
            let by_id = shown.correlation_id.as_ref().and_then(|id| {
                claim(&history, &claimed, 0, |candidate| {
                    candidate.correlation_id.as_ref() == Some(id)
                })
            });
            let matched = by_id.or_else(|| {
                if !was_shown {
                    return None;
                }
                claim(&history, &claimed, cursor, |candidate| match shown.origin {
                    MessageOrigin::LocalPending => {
                        candidate.is_me && candidate.content == shown.content
                    }
                    _ => {
                        candidate.sender_id == shown.sender_id
                            && candidate.content == shown.content
                            && candidate.timestamp == shown.timestamp
                    }
                })
            });
            match matched {
                Some(index) => {
                    claimed[index] = true;
                    if was_shown {
                        cursor = cursor.max(index + 1);
                    }
                    settled.extend(shown.correlation_id);
                }
                None => carried.push(shown),
            }
        }
        settled.sort();
        settled.dedup();

        history.extend(carried);
        self.messages = history;
        self.info = Some(response.chat_info);
        LoadOutcome::Applied { settled }
    }

    /// Clears the loading flag after a fetch failed. Stale tickets are ignored.
    pub fn abandon_load(&mut self, ticket: &LoadTicket) -> bool {
        if self.outstanding.as_ref() != Some(ticket) {
            return false;
        }
        self.outstanding = None;
        true
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn find_local_mut(&mut self, correlation_id: &CorrelationId) -> Option<&mut Message> {
        self.messages
            .iter_mut()
            .rev()
            .find(|message| message.correlation_id.as_ref() == Some(correlation_id))
    }

    pub fn find_local(&self, correlation_id: &CorrelationId) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.correlation_id.as_ref() == Some(correlation_id))
    }

    pub fn remove_local(&mut self, correlation_id: &CorrelationId) -> Option<Message> {
        let index = self
            .messages
            .iter()
            .position(|message| message.correlation_id.as_ref() == Some(correlation_id))?;
        if index < self.known {
            self.known -= 1;
        }
        Some(self.messages.remove(index))
    }

    pub fn snapshot(&self) -> Option<ConversationSnapshot> {
        let conversation_id = self.active.clone()?;
        Some(ConversationSnapshot {
            conversation_id,
            info: self.info.clone(),
            messages: self.messages.clone(),
            loading: self.is_loading(),
        })
    }
}

/// First unclaimed history row at or after `from` that satisfies `matches`.
fn claim(
    history: &[Message],
    claimed: &[bool],
    from: usize,
    matches: impl Fn(&Message) -> bool,
) -> Option<usize> {
    history
        .iter()
        .zip(claimed)
        .enumerate()
        .skip(from)
        .find(|(_, (candidate, taken))| !**taken && matches(candidate))
        .map(|(index, _)| index)
}

#[cfg(test)]
#[path = "tests/view_tests.rs"]
mod tests;
