//! Game-object ownership table.
//!
//! Maps live object ids to the client that owns them and enforces the
//! authority rule: only the current owner may destroy an object or hand it
//! to someone else. Violations are reported as [`AuthorityError`] for
//! logging; the room never tells the violator.

use std::collections::HashMap;

use hubbub_proto::{ClientId, ObjectId};
use thiserror::Error;

/// A live network-visible object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameObject {
    /// Object id (unique while live).
    pub id: ObjectId,
    /// Current owner.
    pub owner: ClientId,
}

/// Rejected ownership operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthorityError {
    /// No live object has this id.
    #[error("unknown object {0}")]
    UnknownObject(ObjectId),

    /// Requester does not own the object.
    #[error("client {requester} does not own object {object} (owner {owner})")]
    NotOwner {
        /// Object in question.
        object: ObjectId,
        /// Client that asked.
        requester: ClientId,
        /// Actual owner.
        owner: ClientId,
    },
}

/// Ownership table for one room.
#[derive(Debug, Default, Clone)]
pub struct ObjectTable {
    objects: HashMap<ObjectId, GameObject>,
}

impl ObjectTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `object` owned by `owner`.
    ///
    /// Returns `false` (and changes nothing) if the id is already live.
    pub fn instantiate(&mut self, object: ObjectId, owner: ClientId) -> bool {
        if self.objects.contains_key(&object) {
            return false;
        }
        self.objects.insert(object, GameObject { id: object, owner });
        true
    }

    /// Destroy `object` on behalf of `requester`.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthorityError`] if the object is unknown or the
    /// requester is not its owner; the table is unchanged.
    pub fn destroy(&mut self, object: ObjectId, requester: ClientId) -> Result<(), AuthorityError> {
        self.check_owner(object, requester)?;
        self.objects.remove(&object);
        Ok(())
    }

    /// Hand `object` from `requester` to `new_owner`.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthorityError`] if the object is unknown or the
    /// requester is not its owner; the table is unchanged.
    pub fn transfer(
        &mut self,
        object: ObjectId,
        requester: ClientId,
        new_owner: ClientId,
    ) -> Result<(), AuthorityError> {
        self.check_owner(object, requester)?;
        if let Some(entry) = self.objects.get_mut(&object) {
            entry.owner = new_owner;
        }
        Ok(())
    }

    /// Current owner of `object`, if it is live.
    pub fn owner(&self, object: ObjectId) -> Option<ClientId> {
        self.objects.get(&object).map(|o| o.owner)
    }

    /// Ids of every object owned by `client`, sorted.
    pub fn owned_by(&self, client: ClientId) -> Vec<ObjectId> {
        let mut ids: Vec<_> =
            self.objects.values().filter(|o| o.owner == client).map(|o| o.id).collect();
        ids.sort_unstable();
        ids
    }

    /// Move every object owned by `from` to `to`. Returns the moved ids, sorted.
    pub fn reassign_all(&mut self, from: ClientId, to: ClientId) -> Vec<ObjectId> {
        let moved = self.owned_by(from);
        for id in &moved {
            if let Some(entry) = self.objects.get_mut(id) {
                entry.owner = to;
            }
        }
        moved
    }

    /// Drop every object owned by `client`. Returns how many were removed.
    pub fn remove_owned_by(&mut self, client: ClientId) -> usize {
        let before = self.objects.len();
        self.objects.retain(|_, o| o.owner != client);
        before - self.objects.len()
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether no objects are live.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.objects.clear();
    }

    fn check_owner(&self, object: ObjectId, requester: ClientId) -> Result<(), AuthorityError> {
        let entry = self.objects.get(&object).ok_or(AuthorityError::UnknownObject(object))?;
        if entry.owner != requester {
            return Err(AuthorityError::NotOwner { object, requester, owner: entry.owner });
        }
        Ok(())
    }
}
