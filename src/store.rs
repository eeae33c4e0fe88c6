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

//! The account-level operations a protocol layer needs, expressed over any
//! backend.
//!
//! `MailboxStore` takes names as the client wrote them, resolves them against
//! the session's user, checks the ACL, and then drives the mappers. Mailbox
//! names coming back out are unresolved again, so the caller never sees the
//! fully-qualified hierarchy.

use log::info;

use crate::acl::resolver::{
    GroupMembershipResolver, MailboxAclResolver, SimpleGroupMembershipResolver,
};
use crate::acl::{MailboxAcl, MailboxAclCommand, MailboxAclRights};
use crate::mapper::{
    MailboxMapper, MailboxSession, MailboxSessionMapperFactory, Mapper,
    MessageMapper, SubscriptionMapper,
};
use crate::model::{
    Mailbox, MailboxMessage, MailboxOwner, MessageMetaData, Subscription,
    UidValiditySource,
};
use crate::name::query::{MailboxQuery, FREE_WILDCARD, LOCAL_WILDCARD};
use crate::name::resolver::{
    ActingUser, DefaultMailboxNameResolver, MailboxNameResolver,
};
use crate::name::{MailboxName, UnresolvedMailboxName};
use crate::support::error::Error;
use crate::support::path_lock::MailboxPathLocker;
use crate::support::system_config::{NamingConfig, StoreConfig};

/// One line of a LIST response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListEntry {
    pub name: UnresolvedMailboxName,
    pub has_children: bool,
}

/// The values reported by STATUS.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MailboxStatus {
    pub messages: u64,
    pub unseen: u64,
    pub uid_next: i64,
    pub uid_validity: i64,
    pub highest_mod_seq: i64,
}

pub struct MailboxStore<F, G = SimpleGroupMembershipResolver> {
    factory: F,
    naming: NamingConfig,
    resolver: Box<dyn MailboxNameResolver>,
    acl: MailboxAclResolver<G>,
    uid_validity: Box<dyn UidValiditySource>,
    locker: MailboxPathLocker,
}

impl<F: MailboxSessionMapperFactory, G: GroupMembershipResolver>
    MailboxStore<F, G>
{
    pub fn new(factory: F, config: &StoreConfig, groups: G) -> Self {
        MailboxStore {
            factory,
            naming: config.naming.clone(),
            resolver: Box::new(DefaultMailboxNameResolver::new(
                config.naming.clone(),
            )),
            acl: MailboxAclResolver::new(groups),
            uid_validity: config.uid_validity.source.source(),
            locker: MailboxPathLocker::new(),
        }
    }

    /// Replace the source of UID validity values for new mailboxes.
    pub fn with_uid_validity(
        mut self,
        source: Box<dyn UidValiditySource>,
    ) -> Self {
        self.uid_validity = source;
        self
    }

    /// Replace the ACL resolver, e.g. to install a global ACL.
    pub fn with_acl_resolver(mut self, acl: MailboxAclResolver<G>) -> Self {
        self.acl = acl;
        self
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Start a session for `user` on this store's backend.
    pub fn session(&self, user: ActingUser) -> MailboxSession {
        MailboxSession::new(user, self.factory.backend_name())
    }

    /// Resolve a client-supplied path, written with the configured delimiter.
    pub fn resolve(
        &self,
        session: &MailboxSession,
        path: &str,
    ) -> Result<MailboxName, Error> {
        self.resolver.resolve(
            &UnresolvedMailboxName::parse(path, self.naming.delimiter),
            session.user(),
        )
    }

    /// Create the mailbox at `path`, along with any missing parents.
    ///
    /// The caller must own the new mailbox or hold `k` on its nearest
    /// existing ancestor.
    pub fn create(
        &self,
        session: &MailboxSession,
        path: &str,
    ) -> Result<Mailbox<F::Id>, Error> {
        let name = self.resolve(session, path)?;
        let _lock = self.locker.lock(&name);

        let mailboxes = self.factory.create_mailbox_mapper(session)?;
        mailboxes.execute(|m| {
            if self.resolver.exists_trivially(&name) {
                return Err(Error::MailboxExists(name.to_string()));
            }

            let owner = self.check_create(session, m, &name)?;
            self.create_parents(m, &name, &owner)?;

            let mut mailbox = Mailbox::new(
                name.clone(),
                owner,
                self.uid_validity.next_uid_validity(),
            );
            m.save(&mut mailbox)?;
            Ok(mailbox)
        })
    }

    /// Delete the mailbox at `path` and its messages. Children survive.
    pub fn delete(
        &self,
        session: &MailboxSession,
        path: &str,
    ) -> Result<(), Error> {
        let name = self.resolve(session, path)?;
        let _lock = self.locker.lock(&name);

        let mailboxes = self.factory.create_mailbox_mapper(session)?;
        let mailbox = mailboxes.find_mailbox_by_path(&name)?;
        self.require(session, &mailbox, MailboxAclRights::DELETE_MAILBOX)?;
        mailboxes.delete(&mailbox)
    }

    /// Rename the mailbox at `from`, and everything beneath it, to `to`.
    ///
    /// Mailboxes keep their identity, so UIDs, messages and ACLs all move
    /// with them.
    pub fn rename(
        &self,
        session: &MailboxSession,
        from: &str,
        to: &str,
    ) -> Result<(), Error> {
        let src = self.resolve(session, from)?;
        let dst = self.resolve(session, to)?;

        if src == dst {
            return Err(Error::MailboxExists(dst.to_string()));
        }
        if dst.is_descendant_of(&src) {
            return Err(Error::RenameIntoSelf(src.to_string()));
        }

        let (_first, _second) = if src < dst {
            (self.locker.lock(&src), self.locker.lock(&dst))
        } else {
            (self.locker.lock(&dst), self.locker.lock(&src))
        };

        let mailboxes = self.factory.create_mailbox_mapper(session)?;
        mailboxes.execute(|m| {
            let root = m.find_mailbox_by_path(&src)?;
            self.require(session, &root, MailboxAclRights::DELETE_MAILBOX)?;

            if self.resolver.exists_trivially(&dst) {
                return Err(Error::MailboxExists(dst.to_string()));
            }
            match m.find_mailbox_by_path(&dst) {
                Ok(_) => return Err(Error::MailboxExists(dst.to_string())),
                Err(Error::NxMailbox(_)) => (),
                Err(e) => return Err(e),
            }

            let owner = self.check_create(session, m, &dst)?;
            let mut subtree = m.search(&MailboxQuery::all_children(
                src.clone(),
                self.naming.delimiter,
            ))?;
            subtree.insert(0, root);
            // A target held by a shallower member of the subtree is vacated
            // before it is needed.
            subtree.sort_by_key(|mailbox| mailbox.name().len());

            let mut moves = Vec::with_capacity(subtree.len());
            for mailbox in subtree {
                let new_name =
                    mailbox.name().rebase(&src, &dst).ok_or_else(|| {
                        Error::NxMailbox(mailbox.name().to_string())
                    })?;
                self.require_vacant(m, &new_name, &src)?;
                moves.push((mailbox, new_name));
            }

            self.create_parents(m, &dst, &owner)?;
            for (mut mailbox, new_name) in moves {
                mailbox.set_name(new_name);
                m.save(&mut mailbox)?;
            }

            info!(
                "{} Renamed {} to {} with its children",
                session.log_prefix(),
                src,
                dst
            );
            Ok(())
        })
    }

    /// List the mailboxes matching `pattern` under `reference`, as for the
    /// IMAP LIST command.
    ///
    /// Only mailboxes the user can look up are returned, sorted by name.
    pub fn list(
        &self,
        session: &MailboxSession,
        reference: &str,
        pattern: &str,
    ) -> Result<Vec<ListEntry>, Error> {
        let delimiter = self.naming.delimiter;

        let mut full = reference.to_owned();
        if !full.is_empty()
            && !pattern.is_empty()
            && !full.ends_with(delimiter)
        {
            full.push(delimiter);
        }
        full.push_str(pattern);

        let levels = full.split(delimiter).collect::<Vec<_>>();
        let fixed_len = levels
            .iter()
            .take_while(|level| {
                !level.contains(|c: char| {
                    FREE_WILDCARD == c || LOCAL_WILDCARD == c
                })
            })
            .count();
        let fixed =
            UnresolvedMailboxName::new(levels[..fixed_len].iter().copied());
        let expression = levels[fixed_len..].join(&delimiter.to_string());

        let base = self.resolver.resolve(&fixed, session.user())?;
        let mailboxes = self.factory.create_mailbox_mapper(session)?;
        let mut found = mailboxes.search(&MailboxQuery::new(
            base.clone(),
            expression.as_str(),
            delimiter,
        ))?;

        // The user's own root is only reachable through the INBOX token, so a
        // wildcard at the top level has to consider it separately.
        if fixed.is_empty() && !expression.is_empty() {
            let inbox_query = MailboxQuery::new(
                MailboxName::relative(Vec::<String>::new()),
                expression.as_str(),
                delimiter,
            );
            if inbox_query.is_expression_match(&MailboxName::relative(vec![
                self.naming.inbox.as_str(),
            ])) {
                match mailboxes.find_mailbox_by_path(&base) {
                    Ok(inbox) => found.push(inbox),
                    Err(Error::NxMailbox(_)) => (),
                    Err(e) => return Err(e),
                }
            }
        }

        let mut entries = Vec::with_capacity(found.len());
        for mailbox in found {
            let rights = self.rights(session, &mailbox);
            if !rights.contains(MailboxAclRights::LOOKUP) {
                continue;
            }

            let unresolved =
                self.resolver.unresolve(mailbox.name(), session.user());
            let name = match unresolved {
                Ok(name) => name,
                Err(Error::Unauthorized { .. }) => continue,
                Err(e) => return Err(e),
            };

            entries.push(ListEntry {
                name,
                has_children: mailboxes.has_children(&mailbox)?,
            });
        }

        entries.sort_by(|a, b| a.name.segments().cmp(b.name.segments()));
        entries.dedup();
        Ok(entries)
    }

    pub fn subscribe(
        &self,
        session: &MailboxSession,
        path: &str,
    ) -> Result<(), Error> {
        let name = self.resolve(session, path)?;
        let subscriptions = self.factory.create_subscription_mapper(session)?;
        subscriptions.save(&Subscription::new(session.user().name(), name))
    }

    pub fn unsubscribe(
        &self,
        session: &MailboxSession,
        path: &str,
    ) -> Result<(), Error> {
        let name = self.resolve(session, path)?;
        let subscriptions = self.factory.create_subscription_mapper(session)?;
        subscriptions.delete(&Subscription::new(session.user().name(), name))
    }

    /// Return the user's subscriptions as they would name them.
    ///
    /// Subscriptions may refer to mailboxes which no longer exist.
    pub fn list_subscriptions(
        &self,
        session: &MailboxSession,
    ) -> Result<Vec<UnresolvedMailboxName>, Error> {
        let subscriptions = self.factory.create_subscription_mapper(session)?;
        let mut names = Vec::new();
        for subscription in
            subscriptions.find_subscriptions_for_user(session.user().name())?
        {
            match self.resolver.unresolve(&subscription.mailbox, session.user())
            {
                Ok(name) => names.push(name),
                Err(Error::Unauthorized { .. }) => (),
                Err(e) => return Err(e),
            }
        }
        Ok(names)
    }

    /// Add a message to the mailbox at `path`.
    pub fn append(
        &self,
        session: &MailboxSession,
        path: &str,
        message: MailboxMessage,
    ) -> Result<MessageMetaData, Error> {
        let mailbox = self.open(session, path, MailboxAclRights::INSERT)?;
        let messages = self.factory.create_message_mapper(session)?;
        messages.append(&mailbox, message)
    }

    pub fn status(
        &self,
        session: &MailboxSession,
        path: &str,
    ) -> Result<MailboxStatus, Error> {
        let mailbox = self.open(session, path, MailboxAclRights::READ)?;
        let messages = self.factory.create_message_mapper(session)?;
        Ok(MailboxStatus {
            messages: messages.count_messages(&mailbox)?,
            unseen: messages.count_unseen(&mailbox)?,
            uid_next: messages.last_uid(&mailbox)? + 1,
            uid_validity: mailbox.uid_validity(),
            highest_mod_seq: messages.highest_mod_seq(&mailbox)?,
        })
    }

    /// Apply `command` to the ACL of the mailbox at `path`, returning the new
    /// ACL.
    pub fn set_acl(
        &self,
        session: &MailboxSession,
        path: &str,
        command: &MailboxAclCommand,
    ) -> Result<MailboxAcl, Error> {
        let mailbox = self.open(session, path, MailboxAclRights::ADMINISTER)?;
        let mailboxes = self.factory.create_mailbox_mapper(session)?;
        mailboxes.update_acl(&mailbox, command)
    }

    /// The rights the session's user holds on the mailbox at `path`.
    ///
    /// A mailbox the user cannot look up is reported as nonexistent.
    pub fn effective_rights(
        &self,
        session: &MailboxSession,
        path: &str,
    ) -> Result<MailboxAclRights, Error> {
        let mailbox = self.open(session, path, MailboxAclRights::LOOKUP)?;
        Ok(self.rights(session, &mailbox))
    }

    fn open(
        &self,
        session: &MailboxSession,
        path: &str,
        needed: MailboxAclRights,
    ) -> Result<Mailbox<F::Id>, Error> {
        let name = self.resolve(session, path)?;
        let mailboxes = self.factory.create_mailbox_mapper(session)?;
        let mailbox = mailboxes.find_mailbox_by_path(&name)?;
        self.require(session, &mailbox, needed)?;
        Ok(mailbox)
    }

    fn rights(
        &self,
        session: &MailboxSession,
        mailbox: &Mailbox<F::Id>,
    ) -> MailboxAclRights {
        self.acl
            .applicable(mailbox.acl(), mailbox.owner(), session.user().name())
    }

    /// Fail unless the user holds all of `needed` on `mailbox`.
    ///
    /// A user who cannot even look the mailbox up is told it does not exist.
    fn require(
        &self,
        session: &MailboxSession,
        mailbox: &Mailbox<F::Id>,
        needed: MailboxAclRights,
    ) -> Result<(), Error> {
        let rights = self.rights(session, mailbox);
        if rights.contains(needed) {
            Ok(())
        } else if !rights.contains(MailboxAclRights::LOOKUP) {
            Err(Error::NxMailbox(mailbox.name().to_string()))
        } else {
            Err(unauthorized(session.user(), mailbox.name()))
        }
    }

    /// Check that the user may create `name`, returning its owner.
    ///
    /// The nearest stored ancestor governs: the user needs `k` on it. With no
    /// stored ancestor, only the owner may create.
    fn check_create(
        &self,
        session: &MailboxSession,
        mailboxes: &F::MailboxMapper,
        name: &MailboxName,
    ) -> Result<MailboxOwner, Error> {
        let user = session.user();
        let owner = self
            .resolver
            .owner_of(name)
            .ok_or_else(|| unauthorized(user, name))?;

        let mut ancestor = name.parent();
        while let Some(candidate) = ancestor {
            if self.resolver.exists_trivially(&candidate) {
                break;
            }

            match mailboxes.find_mailbox_by_path(&candidate) {
                Ok(parent) => {
                    self.require(
                        session,
                        &parent,
                        MailboxAclRights::CREATE_MAILBOX,
                    )?;
                    return Ok(owner);
                }
                Err(Error::NxMailbox(_)) => ancestor = candidate.parent(),
                Err(e) => return Err(e),
            }
        }

        if self.acl.is_owner(&owner, user.name()) {
            Ok(owner)
        } else {
            Err(unauthorized(user, name))
        }
    }

    /// Create every missing, non-structural ancestor of `name`.
    /// Fail with `MailboxExists` unless `name` is free or held by a mailbox
    /// in the subtree at `moving`.
    fn require_vacant(
        &self,
        mailboxes: &F::MailboxMapper,
        name: &MailboxName,
        moving: &MailboxName,
    ) -> Result<(), Error> {
        if self.resolver.exists_trivially(name) {
            return Err(Error::MailboxExists(name.to_string()));
        }
        match mailboxes.find_mailbox_by_path(name) {
            Ok(_) if name.starts_with(moving) => Ok(()),
            Ok(_) => Err(Error::MailboxExists(name.to_string())),
            Err(Error::NxMailbox(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn create_parents(
        &self,
        mailboxes: &F::MailboxMapper,
        name: &MailboxName,
        owner: &MailboxOwner,
    ) -> Result<(), Error> {
        let mut missing = Vec::new();
        let mut ancestor = name.parent();
        while let Some(candidate) = ancestor {
            if self.resolver.exists_trivially(&candidate) {
                break;
            }

            match mailboxes.find_mailbox_by_path(&candidate) {
                Ok(_) => break,
                Err(Error::NxMailbox(_)) => {
                    ancestor = candidate.parent();
                    missing.push(candidate);
                }
                Err(e) => return Err(e),
            }
        }

        for parent in missing.into_iter().rev() {
            let mut mailbox = Mailbox::new(
                parent,
                owner.clone(),
                self.uid_validity.next_uid_validity(),
            );
            match mailboxes.save(&mut mailbox) {
                Ok(_) => {}
                // Someone else created it first
                Err(Error::MailboxExists(_)) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }
}

fn unauthorized(user: &ActingUser, name: &MailboxName) -> Error {
    Error::Unauthorized {
        user: user.name().to_owned(),
        path: name.to_string(),
    }
}

#[cfg(test)]
mod test {
    use chrono::prelude::*;

    use super::*;
    use crate::acl::MailboxAclEntryKey;
    use crate::backend::memory::MemoryMapperFactory;
    use crate::model::{Flag, FixedUidValidity};

    fn store() -> MailboxStore<MemoryMapperFactory> {
        let mut groups = SimpleGroupMembershipResolver::new();
        groups.add_membership("sales", "carol");
        MailboxStore::new(
            MemoryMapperFactory::new(),
            &StoreConfig::default(),
            groups,
        )
        .with_uid_validity(Box::new(FixedUidValidity(42)))
    }

    fn names(entries: &[ListEntry]) -> Vec<String> {
        entries.iter().map(|e| e.name.segments().join(".")).collect()
    }

    fn bob_rights(rights: &str) -> MailboxAclCommand {
        MailboxAclCommand::parse(MailboxAclEntryKey::user("bob"), rights)
            .unwrap()
    }

    fn message(flags: Vec<Flag>) -> MailboxMessage {
        MailboxMessage::new(
            100,
            Utc.timestamp_opt(1_600_000_000, 0).unwrap(),
            flags,
        )
    }

    #[test]
    fn create_makes_parents() {
        crate::init_test_log();
        let store = store();
        let alice = store.session(ActingUser::new("alice"));

        let created = store.create(&alice, "Archive.2023.Q1").unwrap();
        assert_eq!(
            MailboxName::rooted(["users", "alice", "Archive", "2023", "Q1"]),
            *created.name()
        );
        assert_eq!(&MailboxOwner::new("alice", false), created.owner());
        assert_eq!(42, created.uid_validity());

        let listed = store.list(&alice, "", "*").unwrap();
        assert_eq!(
            vec!["Archive", "Archive.2023", "Archive.2023.Q1", "INBOX"],
            names(&listed)
        );
        assert!(listed[0].has_children);
        assert!(!listed[2].has_children);
        assert!(listed[3].has_children);

        assert_matches!(
            Err(Error::MailboxExists(_)),
            store.create(&alice, "Archive.2023")
        );
        assert_matches!(
            Err(Error::MailboxExists(_)),
            store.create(&alice, "#user")
        );
    }

    #[test]
    fn virtual_hosted_owner_maps_back_to_own_root() {
        crate::init_test_log();
        let store = store();
        let dave =
            store.session(ActingUser::virtual_hosted("dave@example.org"));

        let created = store.create(&dave, "Work").unwrap();
        assert_eq!(
            &MailboxOwner::virtual_user("dave@example.org"),
            created.owner()
        );
        assert_eq!(
            MailboxName::rooted(["virtual-users", "example.org", "dave"]),
            store.resolver.get_inbox(created.owner())
        );
        assert_eq!(
            vec!["INBOX", "Work"],
            names(&store.list(&dave, "", "*").unwrap())
        );
    }

    #[test]
    fn foreign_create_needs_rights() {
        crate::init_test_log();
        let store = store();
        let alice = store.session(ActingUser::new("alice"));
        let bob = store.session(ActingUser::new("bob"));

        assert_matches!(
            Err(Error::Unauthorized { .. }),
            store.create(&bob, "#user.alice.Drop")
        );

        store.create(&alice, "Drop").unwrap();
        // bob can't even see it yet
        assert_matches!(
            Err(Error::NxMailbox(_)),
            store.create(&bob, "#user.alice.Drop.Bob")
        );

        store
            .set_acl(
                &alice,
                "Drop",
                &bob_rights("+l"),
            )
            .unwrap();
        assert_matches!(
            Err(Error::Unauthorized { .. }),
            store.create(&bob, "#user.alice.Drop.Bob")
        );

        store
            .set_acl(
                &alice,
                "Drop",
                &bob_rights("+k"),
            )
            .unwrap();
        let created = store.create(&bob, "#user.alice.Drop.Bob").unwrap();
        assert_eq!(&MailboxOwner::new("alice", false), created.owner());
    }

    #[test]
    fn group_members_own_group_mailboxes() {
        crate::init_test_log();
        let store = store();
        let carol = store.session(ActingUser::new("carol"));
        let dave = store.session(ActingUser::new("dave"));

        store.create(&carol, "#group.sales.Leads").unwrap();
        assert_matches!(
            Err(Error::NxMailbox(_)),
            store.create(&dave, "#group.sales.Other")
        );

        let listed = store.list(&carol, "#group.sales", "*").unwrap();
        assert_eq!(vec!["#group.sales.Leads"], names(&listed));
        assert!(store.list(&dave, "#group.sales", "*").unwrap().is_empty());
    }

    #[test]
    fn delete_keeps_children() {
        crate::init_test_log();
        let store = store();
        let alice = store.session(ActingUser::new("alice"));
        let bob = store.session(ActingUser::new("bob"));

        store.create(&alice, "Work.Projects").unwrap();
        assert_matches!(
            Err(Error::NxMailbox(_)),
            store.delete(&bob, "#user.alice.Work")
        );

        store.delete(&alice, "Work").unwrap();
        assert_eq!(
            vec!["INBOX", "Work.Projects"],
            names(&store.list(&alice, "", "*").unwrap())
        );
        assert_matches!(Err(Error::NxMailbox(_)), store.delete(&alice, "Work"));
    }

    #[test]
    fn rename_moves_subtree() {
        crate::init_test_log();
        let store = store();
        let alice = store.session(ActingUser::new("alice"));

        store.create(&alice, "Work.Projects").unwrap();
        store.append(&alice, "Work.Projects", message(vec![])).unwrap();
        let before = store.status(&alice, "Work.Projects").unwrap();

        store.rename(&alice, "Work", "Old.Work").unwrap();
        assert_eq!(
            vec!["INBOX", "Old", "Old.Work", "Old.Work.Projects"],
            names(&store.list(&alice, "", "*").unwrap())
        );
        assert_eq!(before, store.status(&alice, "Old.Work.Projects").unwrap());

        assert_matches!(
            Err(Error::RenameIntoSelf(_)),
            store.rename(&alice, "Old", "Old.Work.Old")
        );
        assert_matches!(
            Err(Error::MailboxExists(_)),
            store.rename(&alice, "Old", "Old")
        );
        assert_matches!(
            Err(Error::MailboxExists(_)),
            store.rename(&alice, "Old.Work", "Old")
        );
        assert_matches!(
            Err(Error::NxMailbox(_)),
            store.rename(&alice, "Nothing", "Something")
        );
    }

    #[test]
    fn rename_onto_orphaned_children_changes_nothing() {
        crate::init_test_log();
        let store = store();
        let alice = store.session(ActingUser::new("alice"));

        store.create(&alice, "Y.Z").unwrap();
        store.delete(&alice, "Y").unwrap();
        store.create(&alice, "X.Z").unwrap();
        store.append(&alice, "X.Z", message(vec![])).unwrap();

        assert_matches!(
            Err(Error::MailboxExists(_)),
            store.rename(&alice, "X", "Y")
        );
        assert_eq!(
            vec!["INBOX", "X", "X.Z", "Y.Z"],
            names(&store.list(&alice, "", "*").unwrap())
        );
        assert_eq!(1, store.status(&alice, "X.Z").unwrap().messages);
        assert_eq!(0, store.status(&alice, "Y.Z").unwrap().messages);
    }

    #[test]
    fn rename_into_vacated_name_of_own_subtree() {
        crate::init_test_log();
        let store = store();
        let alice = store.session(ActingUser::new("alice"));

        store.create(&alice, "A.B.B").unwrap();
        store.append(&alice, "A.B.B", message(vec![])).unwrap();
        store.delete(&alice, "A").unwrap();

        store.rename(&alice, "A.B", "A").unwrap();
        assert_eq!(
            vec!["A", "A.B", "INBOX"],
            names(&store.list(&alice, "", "*").unwrap())
        );
        assert_eq!(1, store.status(&alice, "A.B").unwrap().messages);
    }

    #[test]
    fn list_patterns() {
        crate::init_test_log();
        let store = store();
        let alice = store.session(ActingUser::new("alice"));

        store.create(&alice, "Work.Projects").unwrap();
        store.create(&alice, "Personal").unwrap();

        assert_eq!(
            vec!["INBOX", "Personal", "Work"],
            names(&store.list(&alice, "", "%").unwrap())
        );
        assert_eq!(
            vec!["Work.Projects"],
            names(&store.list(&alice, "Work", "%").unwrap())
        );
        assert_eq!(
            vec!["Work.Projects"],
            names(&store.list(&alice, "", "W*.P*").unwrap())
        );
        assert_eq!(
            vec!["INBOX"],
            names(&store.list(&alice, "", "inbox").unwrap())
        );
        assert_eq!(
            vec!["Personal"],
            names(&store.list(&alice, "", "Personal").unwrap())
        );
        assert!(store.list(&alice, "", "Nothing").unwrap().is_empty());
    }

    #[test]
    fn subscriptions_round_trip() {
        crate::init_test_log();
        let store = store();
        let alice = store.session(ActingUser::new("alice"));

        store.subscribe(&alice, "Work").unwrap();
        store.subscribe(&alice, "#shared.News").unwrap();
        store.subscribe(&alice, "Work").unwrap();

        let subscribed = store
            .list_subscriptions(&alice)
            .unwrap()
            .into_iter()
            .map(|n| n.segments().join("."))
            .collect::<Vec<_>>();
        assert_eq!(vec!["#shared.News", "Work"], subscribed);

        store.unsubscribe(&alice, "Work").unwrap();
        store.unsubscribe(&alice, "Work").unwrap();
        assert_eq!(1, store.list_subscriptions(&alice).unwrap().len());
    }

    #[test]
    fn append_and_status() {
        crate::init_test_log();
        let store = store();
        let alice = store.session(ActingUser::new("alice"));
        let bob = store.session(ActingUser::new("bob"));

        store.create(&alice, "INBOX").unwrap();
        store.append(&alice, "INBOX", message(vec![Flag::Seen])).unwrap();
        let meta = store.append(&alice, "INBOX", message(vec![])).unwrap();
        assert_eq!(2, meta.uid);

        let status = store.status(&alice, "INBOX").unwrap();
        assert_eq!(2, status.messages);
        assert_eq!(1, status.unseen);
        assert_eq!(3, status.uid_next);
        assert_eq!(42, status.uid_validity);
        assert_eq!(meta.mod_seq, status.highest_mod_seq);

        assert_matches!(
            Err(Error::NxMailbox(_)),
            store.append(&bob, "#user.alice", message(vec![]))
        );
        store
            .set_acl(
                &alice,
                "INBOX",
                &bob_rights("+lp"),
            )
            .unwrap();
        assert_matches!(
            Err(Error::Unauthorized { .. }),
            store.append(&bob, "#user.alice", message(vec![]))
        );
        store
            .set_acl(
                &alice,
                "INBOX",
                &bob_rights("+i"),
            )
            .unwrap();
        store
            .append(&bob, "#user.alice", message(vec![]))
            .unwrap();
        assert_matches!(
            Err(Error::Unauthorized { .. }),
            store.status(&bob, "#user.alice")
        );
    }

    #[test]
    fn effective_rights_follow_acl() {
        crate::init_test_log();
        let store = store();
        let alice = store.session(ActingUser::new("alice"));
        let bob = store.session(ActingUser::new("bob"));

        store.create(&alice, "Shared").unwrap();
        assert_eq!(
            MailboxAclRights::all(),
            store.effective_rights(&alice, "Shared").unwrap()
        );
        assert_matches!(
            Err(Error::NxMailbox(_)),
            store.effective_rights(&bob, "#user.alice.Shared")
        );
        assert_matches!(
            Err(Error::NxMailbox(_)),
            store.effective_rights(&bob, "#user.alice.Nothing")
        );

        store
            .set_acl(&alice, "Shared", &bob_rights("+r"))
            .unwrap();
        assert_matches!(
            Err(Error::NxMailbox(_)),
            store.effective_rights(&bob, "#user.alice.Shared")
        );
        store
            .set_acl(&alice, "Shared", &bob_rights("-r"))
            .unwrap();

        let acl = store
            .set_acl(
                &alice,
                "Shared",
                &MailboxAclCommand::parse(MailboxAclEntryKey::anyone(), "+lr")
                    .unwrap(),
            )
            .unwrap();
        assert_eq!(1, acl.len());
        assert_eq!(
            MailboxAclRights::LOOKUP | MailboxAclRights::READ,
            store.effective_rights(&bob, "#user.alice.Shared").unwrap()
        );
        assert_matches!(
            Err(Error::Unauthorized { .. }),
            store.set_acl(
                &bob,
                "#user.alice.Shared",
                &bob_rights("+a"),
            )
        );
    }
}
