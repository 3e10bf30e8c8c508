use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::account::UserId;

pub type GroupId = String;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GroupError {
    #[error("Group \"{0}\" not found")]
    GroupNotFound(GroupId),
    #[error("Group \"{0}\" already exists")]
    GroupExists(GroupId),
    #[error("User \"{user}\" is not the owner of group \"{group}\"")]
    InvalidGroupOwner { user: UserId, group: GroupId },
    #[error("User \"{user}\" already belongs to group \"{group}\"")]
    UserAlreadyInGroup { user: UserId, group: GroupId },
}

/// The owner is always the first member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    members: Vec<UserId>,
}

impl Group {
    fn new(owner: &str) -> Self {
        Self {
            members: vec![owner.to_owned()],
        }
    }

    pub fn owner(&self) -> &str {
        &self.members[0]
    }

    pub fn is_owner(&self, user_id: &str) -> bool {
        self.owner() == user_id
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.members.iter().any(|m| m == user_id)
    }

    pub fn members(&self) -> &[UserId] {
        &self.members
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Memberships {
    pub owned: Vec<GroupId>,
    pub member: Vec<GroupId>,
}

#[derive(Default)]
pub struct GroupRegistry {
    groups: RwLock<BTreeMap<GroupId, Group>>,
}

impl GroupRegistry {
    pub fn create(&self, group_id: &str, owner: &str) -> Result<(), GroupError> {
        let mut groups = self.groups.write();
        if groups.contains_key(group_id) {
            return Err(GroupError::GroupExists(group_id.to_owned()));
        }
        groups.insert(group_id.to_owned(), Group::new(owner));
        Ok(())
    }

    pub fn add_member(
        &self,
        group_id: &str,
        requester: &str,
        new_member: &str,
    ) -> Result<(), GroupError> {
        let mut groups = self.groups.write();
        let group = groups
            .get_mut(group_id)
            .ok_or_else(|| GroupError::GroupNotFound(group_id.to_owned()))?;
        if !group.is_owner(requester) {
            return Err(GroupError::InvalidGroupOwner {
                user: requester.to_owned(),
                group: group_id.to_owned(),
            });
        }
        if group.contains(new_member) {
            return Err(GroupError::UserAlreadyInGroup {
                user: new_member.to_owned(),
                group: group_id.to_owned(),
            });
        }
        group.members.push(new_member.to_owned());
        Ok(())
    }

    pub fn get(&self, group_id: &str) -> Result<Group, GroupError> {
        self.groups
            .read()
            .get(group_id)
            .cloned()
            .ok_or_else(|| GroupError::GroupNotFound(group_id.to_owned()))
    }

    /// Fetches a group on behalf of `user_id`, who must own it.
    pub fn get_owned(&self, group_id: &str, user_id: &str) -> Result<Group, GroupError> {
        let group = self.get(group_id)?;
        if !group.is_owner(user_id) {
            return Err(GroupError::InvalidGroupOwner {
                user: user_id.to_owned(),
                group: group_id.to_owned(),
            });
        }
        Ok(group)
    }

    pub fn list_memberships(&self, user_id: &str) -> Memberships {
        let mut memberships = Memberships::default();
        for (group_id, group) in self.groups.read().iter() {
            if group.is_owner(user_id) {
                memberships.owned.push(group_id.clone());
            } else if group.contains(user_id) {
                memberships.member.push(group_id.clone());
            }
        }
        memberships
    }

    pub fn export(&self) -> BTreeMap<GroupId, Group> {
        self.groups.read().clone()
    }

    pub fn restore(&self, groups: BTreeMap<GroupId, Group>) {
        *self.groups.write() = groups;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_add_members() {
        let registry = GroupRegistry::default();
        registry.create("trip", "alice").unwrap();
        assert_eq!(
            registry.create("trip", "bob").unwrap_err(),
            GroupError::GroupExists("trip".into())
        );

        registry.add_member("trip", "alice", "bob").unwrap();
        let group = registry.get("trip").unwrap();
        assert_eq!(group.owner(), "alice");
        assert_eq!(group.members(), ["alice", "bob"]);
    }

    #[test]
    fn only_owner_adds_members() {
        let registry = GroupRegistry::default();
        registry.create("trip", "alice").unwrap();
        registry.add_member("trip", "alice", "bob").unwrap();

        assert_eq!(
            registry.add_member("trip", "bob", "carol").unwrap_err(),
            GroupError::InvalidGroupOwner {
                user: "bob".into(),
                group: "trip".into()
            }
        );
        assert_eq!(
            registry.add_member("trip", "alice", "bob").unwrap_err(),
            GroupError::UserAlreadyInGroup {
                user: "bob".into(),
                group: "trip".into()
            }
        );
        assert_eq!(
            registry.add_member("party", "alice", "bob").unwrap_err(),
            GroupError::GroupNotFound("party".into())
        );
        // failed calls leave membership untouched
        assert_eq!(registry.get("trip").unwrap().members(), ["alice", "bob"]);
        assert!(registry.get_owned("trip", "bob").is_err());
    }

    #[test]
    fn memberships_partition_groups() {
        let registry = GroupRegistry::default();
        registry.create("trip", "alice").unwrap();
        registry.create("rent", "bob").unwrap();
        registry.create("gym", "carol").unwrap();
        registry.add_member("rent", "bob", "alice").unwrap();

        assert_eq!(
            registry.list_memberships("alice"),
            Memberships {
                owned: vec!["trip".into()],
                member: vec!["rent".into()],
            }
        );
        assert_eq!(registry.list_memberships("dave"), Memberships::default());
    }
}
