//! The synchronous message queue
//!
//! A single bounded FIFO shared by every process. Records preserve
//! insertion order and are removed by first match on the recipient, so
//! messages from one sender to one recipient are always delivered in
//! the order they were sent. Waking blocked recipients is the runtime's
//! job; the queue itself is pure.

use alloc::vec::Vec;

use crate::types::{Message, Pid, MAX_MESSAGES};

/// Error: the queue is at capacity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFull;

impl core::fmt::Display for QueueFull {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "message queue is full")
    }
}

/// Bounded FIFO of pending messages.
#[derive(Clone, Debug, Default)]
pub struct MessageQueue {
    messages: Vec<Message>,
}

impl MessageQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
        }
    }

    /// Enqueue a message, refusing when full.
    pub fn send(&mut self, msg: Message) -> Result<(), QueueFull> {
        if self.messages.len() >= MAX_MESSAGES {
            return Err(QueueFull);
        }
        self.messages.push(msg);
        Ok(())
    }

    /// Remove and return the first message addressed to `recipient`.
    pub fn receive_for(&mut self, recipient: Pid) -> Option<Message> {
        let pos = self.messages.iter().position(|m| m.recipient == recipient)?;
        Some(self.messages.remove(pos))
    }

    /// Whether any message is addressed to `recipient`.
    pub fn has_message_for(&self, recipient: Pid) -> bool {
        self.messages.iter().any(|m| m.recipient == recipient)
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(recipient: u16, sender: u16, content: u8) -> Message {
        Message {
            recipient: Pid(recipient),
            sender: Pid(sender),
            content,
        }
    }

    #[test]
    fn test_send_receive_roundtrip() {
        let mut q = MessageQueue::new();
        q.send(msg(1, 2, 42)).unwrap();

        let got = q.receive_for(Pid(1)).unwrap();
        assert_eq!(got.sender, Pid(2));
        assert_eq!(got.content, 42);
        assert!(q.is_empty());
    }

    #[test]
    fn test_receive_empty_queue() {
        let mut q = MessageQueue::new();
        assert_eq!(q.receive_for(Pid(1)), None);
    }

    #[test]
    fn test_receive_only_matching_recipient() {
        let mut q = MessageQueue::new();
        q.send(msg(2, 0, 1)).unwrap();
        q.send(msg(1, 0, 2)).unwrap();

        assert_eq!(q.receive_for(Pid(1)), Some(msg(1, 0, 2)));
        assert_eq!(q.len(), 1);
        assert!(q.has_message_for(Pid(2)));
        assert!(!q.has_message_for(Pid(1)));
    }

    #[test]
    fn test_same_sender_fifo_order() {
        let mut q = MessageQueue::new();
        q.send(msg(1, 2, 10)).unwrap();
        q.send(msg(1, 2, 20)).unwrap();
        q.send(msg(1, 2, 30)).unwrap();

        assert_eq!(q.receive_for(Pid(1)).unwrap().content, 10);
        assert_eq!(q.receive_for(Pid(1)).unwrap().content, 20);
        assert_eq!(q.receive_for(Pid(1)).unwrap().content, 30);
        assert_eq!(q.receive_for(Pid(1)), None);
    }

    #[test]
    fn test_first_match_skips_other_recipients() {
        let mut q = MessageQueue::new();
        q.send(msg(5, 0, 1)).unwrap();
        q.send(msg(6, 0, 2)).unwrap();
        q.send(msg(5, 0, 3)).unwrap();

        // Removing for 5 takes the first match and leaves the rest in order
        assert_eq!(q.receive_for(Pid(5)).unwrap().content, 1);
        assert_eq!(q.receive_for(Pid(5)).unwrap().content, 3);
        assert_eq!(q.receive_for(Pid(6)).unwrap().content, 2);
    }

    #[test]
    fn test_send_refuses_when_full() {
        let mut q = MessageQueue::new();
        for i in 0..MAX_MESSAGES {
            q.send(msg(1, 2, i as u8)).unwrap();
        }
        assert_eq!(q.send(msg(1, 2, 0xFF)), Err(QueueFull));
        assert_eq!(q.len(), MAX_MESSAGES);

        // Draining one makes room again
        q.receive_for(Pid(1)).unwrap();
        q.send(msg(1, 2, 0xFF)).unwrap();
    }
}
