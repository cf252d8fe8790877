//! Bounded conversation window for one execution.

use std::collections::VecDeque;

use crate::llm::{ChatMessage, Role};

/// Role-tagged messages, oldest evicted first once `max_messages` is exceeded.
#[derive(Debug, Clone)]
pub struct ConversationWindow {
    messages: VecDeque<ChatMessage>,
    max_messages: usize,
}

impl ConversationWindow {
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(max_messages.saturating_add(1)),
            max_messages: max_messages.max(1),
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push_back(message);
        let mut evicted = 0;
        while self.messages.len() > self.max_messages {
            self.messages.pop_front();
            evicted += 1;
        }
        if evicted > 0 {
            tracing::debug!("Trimmed conversation window: removed {} old messages", evicted);
        }
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(ChatMessage::new(Role::User, content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.push(ChatMessage::new(Role::Assistant, content));
    }

    /// Messages in order, oldest first.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_eviction() {
        let mut window = ConversationWindow::new(3);
        for i in 0..5 {
            window.push_user(format!("m{}", i));
        }
        let contents: Vec<String> = window.messages().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
        assert_eq!(window.len(), 3);
    }

    #[test]
    fn test_roles_are_kept() {
        let mut window = ConversationWindow::new(10);
        window.push_user("do it");
        window.push_assistant("{\"actions\": []}");
        let roles: Vec<Role> = window.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
    }
}
