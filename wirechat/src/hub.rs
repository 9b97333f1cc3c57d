//! Registry of connected participants.
//!
//! The hub maps participant ids to their outbound mailboxes. Notifications
//! are computed under the registry lock but queued only after it is released,
//! and queuing never waits, so a slow participant cannot stall the hub.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    error::{HubError, SendError},
    mailbox::Mailbox,
    message::{Identity, Message},
};

pub struct Participant {
    identity: Identity,
    mailbox: Mailbox,
}

impl Participant {
    pub fn new(identity: Identity, mailbox: Mailbox) -> Self {
        Self { identity, mailbox }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    /// Queues `message`, dropping it if the mailbox is full or closed.
    pub fn deliver(&self, message: Message) -> bool {
        let kind = message.kind();
        match self.mailbox.deliver(message) {
            Ok(()) => true,
            Err(SendError::Full) => {
                warn!(participant = %self.identity, %kind, "outbound queue full, dropping message");
                false
            }
            Err(SendError::Closed) => {
                debug!(participant = %self.identity, %kind, "outbound queue closed, dropping message");
                false
            }
        }
    }
}

#[derive(Default)]
pub struct Hub {
    participants: Mutex<HashMap<String, Arc<Participant>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `participant` and tells everyone already present that it joined.
    pub async fn register(&self, participant: Arc<Participant>) -> Result<(), HubError> {
        let identity = participant.identity().clone();
        let others: Vec<Arc<Participant>> = {
            let mut participants = self.participants.lock().await;
            if participants.contains_key(identity.id()) {
                return Err(HubError::AlreadyRegistered(identity.id().to_string()));
            }
            let others = participants.values().cloned().collect();
            participants.insert(identity.id().to_string(), participant);
            others
        };

        info!(participant = %identity, online = others.len() + 1, "participant registered");
        for other in others {
            other.deliver(Message::UserConnected {
                sender: identity.clone(),
            });
        }
        Ok(())
    }

    /// Removes the participant with `id`, closes its mailbox and tells the
    /// remaining participants that it left.
    pub async fn unregister(&self, id: &str) -> Result<Arc<Participant>, HubError> {
        let (departed, remaining): (Arc<Participant>, Vec<Arc<Participant>>) = {
            let mut participants = self.participants.lock().await;
            let departed = participants
                .remove(id)
                .ok_or_else(|| HubError::NotRegistered(id.to_string()))?;
            (departed, participants.values().cloned().collect())
        };

        departed.mailbox().close();
        info!(participant = %departed.identity(), online = remaining.len(), "participant unregistered");
        for other in remaining {
            other.deliver(Message::UserDisconnected {
                sender: departed.identity().clone(),
            });
        }
        Ok(departed)
    }

    /// Everyone except `requester_id`, sorted by name and then id.
    pub async fn list_others(&self, requester_id: &str) -> Vec<Identity> {
        let participants = self.participants.lock().await;
        sorted_others(&participants, requester_id)
    }

    /// Sends a [`Message::GetUsersResponse`] to the requester alone.
    pub async fn answer_get_users(&self, requester_id: &str) -> Result<(), HubError> {
        let (requester, others) = {
            let participants = self.participants.lock().await;
            let requester = participants
                .get(requester_id)
                .cloned()
                .ok_or_else(|| HubError::NotRegistered(requester_id.to_string()))?;
            (requester, sorted_others(&participants, requester_id))
        };

        debug!(participant = %requester.identity(), count = others.len(), "answering user list request");
        requester.deliver(Message::GetUsersResponse {
            sender: requester.identity().clone(),
            content: others,
        });
        Ok(())
    }

    /// Forwards a [`Message::SendMsgSingle`] to its recipient, unchanged.
    ///
    /// Fails without delivering anything when the sender or the recipient is
    /// not registered. Other message kinds are not routable.
    pub async fn route(&self, message: Message) -> Result<(), HubError> {
        let Message::SendMsgSingle {
            sender, recipient, ..
        } = &message
        else {
            return Err(HubError::Unroutable(message.kind()));
        };

        let target = {
            let participants = self.participants.lock().await;
            if !participants.contains_key(sender.id()) {
                return Err(HubError::NotRegistered(sender.id().to_string()));
            }
            participants
                .get(recipient.id())
                .cloned()
                .ok_or_else(|| HubError::NotRegistered(recipient.id().to_string()))?
        };

        target.deliver(message);
        Ok(())
    }

    pub async fn is_registered(&self, id: &str) -> bool {
        self.participants.lock().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.participants.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Closes every participant's mailbox so their connections wind down.
    /// Participants stay registered until their connections report closure.
    pub async fn close_all(&self) -> usize {
        let participants: Vec<Arc<Participant>> =
            self.participants.lock().await.values().cloned().collect();
        participants
            .iter()
            .filter(|participant| participant.mailbox().close())
            .count()
    }
}

fn sorted_others(participants: &HashMap<String, Arc<Participant>>, requester_id: &str) -> Vec<Identity> {
    let mut others: Vec<Identity> = participants
        .values()
        .filter(|participant| participant.identity().id() != requester_id)
        .map(|participant| participant.identity().clone())
        .collect();
    others.sort_by(|a, b| a.name().cmp(b.name()).then_with(|| a.id().cmp(b.id())));
    others
}
