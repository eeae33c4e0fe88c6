//-
// Copyright (c) 2023, Jason Lingle
//
// This file is part of Pigeonhole.
//
// Pigeonhole is free software: you can  redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Pigeonhole is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Pigeonhole. If not, see <http://www.gnu.org/licenses/>.

use std::collections::{BTreeSet, HashMap};

use super::{AclPrincipal, MailboxAcl, MailboxAclEntryKey, MailboxAclRights};
use crate::model::MailboxOwner;

/// Answers whether a user belongs to a group.
pub trait GroupMembershipResolver: Send + Sync {
    fn is_member(&self, user: &str, group: &str) -> bool;
}

/// A fixed, in-memory group membership table.
#[derive(Clone, Debug, Default)]
pub struct SimpleGroupMembershipResolver {
    groups: HashMap<String, BTreeSet<String>>,
}

impl SimpleGroupMembershipResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_membership(
        &mut self,
        group: impl Into<String>,
        user: impl Into<String>,
    ) {
        self.groups
            .entry(group.into())
            .or_default()
            .insert(user.into());
    }
}

impl GroupMembershipResolver for SimpleGroupMembershipResolver {
    fn is_member(&self, user: &str, group: &str) -> bool {
        self.groups
            .get(group)
            .map_or(false, |members| members.contains(user))
    }
}

/// Computes the rights a user effectively holds on a mailbox.
///
/// The mailbox's own ACL is combined with a global ACL which applies to every
/// mailbox. By default the global ACL grants the owner every right, so owners
/// cannot lock themselves out unless the mailbox ACL explicitly revokes
/// something with `-owner`.
pub struct MailboxAclResolver<G> {
    global: MailboxAcl,
    groups: G,
}

impl<G: GroupMembershipResolver> MailboxAclResolver<G> {
    pub fn new(groups: G) -> Self {
        Self::with_global(
            groups,
            MailboxAcl::EMPTY
                .with(MailboxAclEntryKey::owner(), MailboxAclRights::all()),
        )
    }

    pub fn with_global(groups: G, global: MailboxAcl) -> Self {
        MailboxAclResolver { global, groups }
    }

    pub fn global(&self) -> &MailboxAcl {
        &self.global
    }

    /// Whether `user` counts as the owner of a mailbox owned by `owner`.
    pub fn is_owner(&self, owner: &MailboxOwner, user: &str) -> bool {
        if owner.is_group() {
            self.groups.is_member(user, owner.name())
        } else {
            owner.name() == user
        }
    }

    /// Return the rights `user` (an authenticated user) holds under `acl` on
    /// a mailbox owned by `owner`.
    ///
    /// Entries are applied from least to most specific: `anyone`,
    /// `authenticated`, `owner`, every group `user` is in, then `user`
    /// itself. At each level positive rights are added and then negative
    /// rights removed, so a more specific entry always wins.
    pub fn applicable(
        &self,
        acl: &MailboxAcl,
        owner: &MailboxOwner,
        user: &str,
    ) -> MailboxAclRights {
        let acl = self.global.union(acl);
        let mut rights = MailboxAclRights::empty();

        let mut apply_level = |matches: &dyn Fn(&AclPrincipal) -> bool| {
            let mut grant = MailboxAclRights::empty();
            let mut revoke = MailboxAclRights::empty();
            for (key, entry_rights) in acl.entries() {
                if matches(key.principal()) {
                    if key.is_negative() {
                        revoke |= entry_rights;
                    } else {
                        grant |= entry_rights;
                    }
                }
            }
            rights = (rights | grant) - revoke;
        };

        apply_level(&|p| AclPrincipal::Anyone == *p);
        apply_level(&|p| AclPrincipal::Authenticated == *p);
        if self.is_owner(owner, user) {
            apply_level(&|p| AclPrincipal::Owner == *p);
        }
        apply_level(&|p| match *p {
            AclPrincipal::Group(ref group) => {
                self.groups.is_member(user, group)
            }
            _ => false,
        });
        apply_level(&|p| match *p {
            AclPrincipal::User(ref name) => name == user,
            _ => false,
        });

        rights
    }
}
