//! Bounded, closable outbound queue.
//!
//! Each connection owns one [`Mailbox`]. Anyone holding a clone can queue
//! messages for the connection's writer without waiting; a full queue refuses
//! the new message instead of blocking the caller. Closing is shared by all
//! clones and happens at most once.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::{error::SendError, message::Message};

#[derive(Debug, Clone)]
pub struct Mailbox {
    slot: Arc<Mutex<Option<mpsc::Sender<Message>>>>,
}

/// Creates a mailbox holding up to `capacity` undelivered messages and the
/// receiver the connection's writer drains.
pub fn mailbox(capacity: usize) -> (Mailbox, mpsc::Receiver<Message>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    let mailbox = Mailbox {
        slot: Arc::new(Mutex::new(Some(sender))),
    };
    (mailbox, receiver)
}

impl Mailbox {
    /// Queues `message` without waiting.
    pub fn deliver(&self, message: Message) -> Result<(), SendError> {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = slot.as_ref() else {
            return Err(SendError::Closed);
        };
        match sender.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(SendError::Full),
            Err(TrySendError::Closed(_)) => Err(SendError::Closed),
        }
    }

    /// Stops accepting messages. Already queued messages are still handed to
    /// the receiver, after which it yields `None`.
    ///
    /// Returns `true` only for the call that actually closed the mailbox.
    pub fn close(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_none_or(|sender| sender.is_closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Identity;

    fn joined(name: &str) -> Message {
        Message::UserConnected {
            sender: Identity::new(name, format!("{name}-id")).expect("identity"),
        }
    }

    #[tokio::test]
    async fn delivers_in_order() {
        let (mailbox, mut outbox) = mailbox(4);
        mailbox.deliver(joined("a")).expect("deliver a");
        mailbox.deliver(joined("b")).expect("deliver b");

        assert_eq!(outbox.recv().await, Some(joined("a")));
        assert_eq!(outbox.recv().await, Some(joined("b")));
    }

    #[tokio::test]
    async fn full_mailbox_refuses_new_messages_without_blocking() {
        let (mailbox, mut outbox) = mailbox(1);
        mailbox.deliver(joined("first")).expect("deliver");
        assert_eq!(mailbox.deliver(joined("second")), Err(SendError::Full));

        assert_eq!(outbox.recv().await, Some(joined("first")));
        mailbox.deliver(joined("third")).expect("room again");
        assert_eq!(outbox.recv().await, Some(joined("third")));
    }

    #[tokio::test]
    async fn close_is_shared_and_happens_once() {
        let (mailbox, mut outbox) = mailbox(4);
        let other = mailbox.clone();
        mailbox.deliver(joined("queued")).expect("deliver");

        assert!(other.close());
        assert!(!mailbox.close());
        assert!(!other.close());
        assert!(mailbox.is_closed());
        assert_eq!(mailbox.deliver(joined("late")), Err(SendError::Closed));

        assert_eq!(outbox.recv().await, Some(joined("queued")));
        assert_eq!(outbox.recv().await, None);
    }

    #[test]
    fn dropped_receiver_counts_as_closed() {
        let (mailbox, outbox) = mailbox(4);
        drop(outbox);

        assert!(mailbox.is_closed());
        assert_eq!(mailbox.deliver(joined("nobody")), Err(SendError::Closed));
    }
}
