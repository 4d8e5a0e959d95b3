use super::{
    CallContext,
    ParticipantConnection,
};
use std::{
    cell::RefCell,
    fmt,
    rc::Rc,
};

/// The remote participants of a call, in join order.
#[derive(Clone)]
pub struct ParticipantCollection {
    context: CallContext,
    participants: Rc<RefCell<Vec<ParticipantConnection>>>,
}

impl fmt::Debug for ParticipantCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.participants.borrow().iter().map(ParticipantConnection::peer_id))
            .finish()
    }
}

impl ParticipantCollection {
    pub fn new(context: CallContext) -> Self {
        Self {
            context,
            participants: Rc::default(),
        }
    }

    pub fn context(&self) -> &CallContext {
        &self.context
    }

    /// Returns the model of `peer_id`, creating it on first use.
    pub fn add(&self, peer_id: &str) -> ParticipantConnection {
        if let Some(existing) = self.get(peer_id) {
            return existing;
        }
        let participant = ParticipantConnection::new(peer_id, &self.context);
        self.participants.borrow_mut().push(participant.clone());
        debug!(peer_id, "participant added");
        participant
    }

    pub fn get(&self, peer_id: &str) -> Option<ParticipantConnection> {
        self.participants
            .borrow()
            .iter()
            .find(|participant| participant.peer_id() == peer_id)
            .cloned()
    }

    /// Removes and destroys the model of `peer_id`.
    pub fn remove(&self, peer_id: &str) -> Option<ParticipantConnection> {
        let removed = {
            let mut participants = self.participants.borrow_mut();
            let index = participants.iter().position(|participant| participant.peer_id() == peer_id)?;
            participants.remove(index)
        };
        // Change handlers may read the collection while the model shuts down.
        removed.destroy();
        debug!(peer_id, "participant removed");
        Some(removed)
    }

    pub fn values(&self) -> Vec<ParticipantConnection> {
        self.participants.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.participants.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.borrow().is_empty()
    }

    /// Destroys every model.
    pub fn clear(&self) {
        let participants = std::mem::take(&mut *self.participants.borrow_mut());
        for participant in participants {
            participant.destroy();
        }
    }
}
