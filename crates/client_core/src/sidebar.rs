use shared::{domain::ConversationId, protocol::SidebarEntry};

use crate::types::SidebarSnapshot;

/// Most-recently-active ordering of the conversation list.
#[derive(Debug, Default)]
pub struct Sidebar {
    entries: Vec<SidebarEntry>,
}

impl Sidebar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a full list, e.g. from `/api/init` or after a conversation was created.
    pub fn replace(&mut self, entries: Vec<SidebarEntry>) {
        self.entries = entries;
    }

    pub fn entries(&self) -> &[SidebarEntry] {
        &self.entries
    }

    pub fn get(&self, conversation_id: &ConversationId) -> Option<&SidebarEntry> {
        self.entries
            .iter()
            .find(|entry| &entry.chat_id == conversation_id)
    }

    /// Sets the preview and moves the entry to the head. Unknown ids are left alone.
    ///
    /// Returns whether the list changed.
    pub fn touch(
        &mut self,
        conversation_id: &ConversationId,
        preview: &str,
        count_unread: bool,
    ) -> bool {
        let Some(index) = self
            .entries
            .iter()
            .position(|entry| &entry.chat_id == conversation_id)
        else {
            return false;
        };

        let mut entry = self.entries.remove(index);
        entry.last_message = preview.to_string();
        if count_unread {
            entry.unread = entry.unread.saturating_add(1);
        }
        self.entries.insert(0, entry);
        true
    }

    pub fn mark_read(&mut self, conversation_id: &ConversationId) -> bool {
        match self
            .entries
            .iter_mut()
            .find(|entry| &entry.chat_id == conversation_id)
        {
            Some(entry) if entry.unread > 0 => {
                entry.unread = 0;
                true
            }
            _ => false,
        }
    }

    pub fn snapshot(&self) -> SidebarSnapshot {
        SidebarSnapshot {
            entries: self.entries.clone(),
        }
    }
}

#[cfg(test)]
#[path = "tests/sidebar_tests.rs"]
mod tests;
