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

//! The contract every storage backend implements.
//!
//! A backend provides a `MailboxSessionMapperFactory`, which hands out mappers
//! bound to one `MailboxSession`. Every mapper operation is atomic on its own:
//! it either takes full effect or fails with no partial state. Backends which
//! support multi-operation transactions additionally honour `Mapper::execute`
//! as one transaction.
//!
//! Names passed to and returned from mappers are always fully-qualified.

mod session;

pub use self::session::MailboxSession;

use std::fmt;
use std::hash::Hash;

use log::{debug, error};

use crate::acl::{MailboxAcl, MailboxAclCommand};
use crate::model::{
    Flag, FlagUpdateMode, Mailbox, MailboxMessage, MessageMetaData,
    MessageRange, Subscription,
};
use crate::name::query::MailboxQuery;
use crate::name::MailboxName;
use crate::support::error::Error;

/// Requirements on a backend's mailbox identifier type.
pub trait MailboxIdType:
    Clone + fmt::Debug + PartialEq + Eq + Hash + Send + Sync + 'static
{
}

impl<T: Clone + fmt::Debug + PartialEq + Eq + Hash + Send + Sync + 'static>
    MailboxIdType for T
{
}

pub trait Mapper {
    /// The session this mapper is bound to.
    fn session(&self) -> &MailboxSession;

    /// Release any resources (connections, locks) held on behalf of the
    /// current request.
    fn end_request(&self) {}

    fn begin(&self) -> Result<(), Error> {
        Ok(())
    }

    fn commit(&self) -> Result<(), Error> {
        Ok(())
    }

    fn rollback(&self) -> Result<(), Error> {
        Ok(())
    }

    /// Run `f` as one transaction, committing if it returns `Ok` and rolling
    /// back if it returns `Err`.
    ///
    /// On backends without multi-operation transactions, `begin`, `commit`
    /// and `rollback` do nothing, so only the individual operations within
    /// `f` are atomic.
    fn execute<R>(
        &self,
        f: impl FnOnce(&Self) -> Result<R, Error>,
    ) -> Result<R, Error>
    where
        Self: Sized,
    {
        self.begin()?;
        match f(self) {
            Ok(r) => {
                self.commit()?;
                Ok(r)
            }
            Err(e) => {
                if let Err(e2) = self.rollback() {
                    error!(
                        "{} Rollback after {} failed: {}",
                        self.session().log_prefix(),
                        e,
                        e2
                    );
                }
                Err(e)
            }
        }
    }
}

pub trait MailboxMapper: Mapper {
    type Id: MailboxIdType;

    /// Persist `mailbox`.
    ///
    /// The first save assigns an id, which is stored into `mailbox` and
    /// returned. Later saves persist changes to the name and ACL.
    ///
    /// Fails with `MailboxExists` if another mailbox already has the same
    /// name, even if that mailbox is being created concurrently.
    fn save(&self, mailbox: &mut Mailbox<Self::Id>) -> Result<Self::Id, Error>;

    /// Fails with `NxMailbox` if there is no such mailbox.
    fn find_mailbox_by_path(
        &self,
        name: &MailboxName,
    ) -> Result<Mailbox<Self::Id>, Error>;

    /// Fails with `NxMailbox` if there is no such mailbox.
    fn find_mailbox_by_id(
        &self,
        id: &Self::Id,
    ) -> Result<Mailbox<Self::Id>, Error>;

    /// Return a superset of the mailboxes matching `query`.
    ///
    /// Backends filter as well as they natively can, which is usually
    /// `query.fixed_prefix()`. Callers should use `search` instead.
    fn find_mailbox_with_path_like(
        &self,
        query: &MailboxQuery,
    ) -> Result<Vec<Mailbox<Self::Id>>, Error>;

    /// Return exactly the mailboxes matching `query`, sorted by name.
    fn search(
        &self,
        query: &MailboxQuery,
    ) -> Result<Vec<Mailbox<Self::Id>>, Error> {
        let candidates = self.find_mailbox_with_path_like(query)?;
        let total = candidates.len();

        let mut matches = candidates
            .into_iter()
            .filter(|mb| query.is_expression_match(mb.name()))
            .collect::<Vec<_>>();
        matches.sort_by(|a, b| a.name().cmp(b.name()));

        if matches.len() != total {
            debug!(
                "{} Query {:?} rejected {} of {} candidates",
                self.session().log_prefix(),
                query,
                total - matches.len(),
                total
            );
        }
        Ok(matches)
    }

    /// Whether any mailbox lies beneath `mailbox`.
    fn has_children(&self, mailbox: &Mailbox<Self::Id>) -> Result<bool, Error>;

    /// Delete `mailbox` along with all its messages.
    ///
    /// Children are not affected.
    fn delete(&self, mailbox: &Mailbox<Self::Id>) -> Result<(), Error>;

    /// Return every mailbox, sorted by name.
    fn list(&self) -> Result<Vec<Mailbox<Self::Id>>, Error>;

    /// Atomically apply `command` to the ACL of `mailbox`, returning the new
    /// ACL.
    fn update_acl(
        &self,
        mailbox: &Mailbox<Self::Id>,
        command: &MailboxAclCommand,
    ) -> Result<MailboxAcl, Error>;
}

/// The per-mailbox UID counter.
pub trait UidProvider {
    type Id: MailboxIdType;

    /// Consume and return the next UID of `mailbox`.
    ///
    /// Concurrent calls on the same mailbox never return the same value, and
    /// values strictly increase.
    fn next_uid(&self, mailbox: &Mailbox<Self::Id>) -> Result<i64, Error>;

    /// Return the most recently consumed UID, or 0 if none has been.
    fn last_uid(&self, mailbox: &Mailbox<Self::Id>) -> Result<i64, Error>;
}

/// The per-mailbox modification sequence counter.
pub trait ModSeqProvider {
    type Id: MailboxIdType;

    /// Consume and return the next modseq of `mailbox`.
    fn next_mod_seq(&self, mailbox: &Mailbox<Self::Id>) -> Result<i64, Error>;

    /// Return the most recently consumed modseq, or 0 if none has been.
    fn highest_mod_seq(
        &self,
        mailbox: &Mailbox<Self::Id>,
    ) -> Result<i64, Error>;
}

pub trait MessageMapper: Mapper {
    type Id: MailboxIdType;

    /// Add `message` to `mailbox`, assigning it the next UID and a new
    /// modseq.
    fn append(
        &self,
        mailbox: &Mailbox<Self::Id>,
        message: MailboxMessage,
    ) -> Result<MessageMetaData, Error>;

    /// Return the messages in `range`, sorted by UID.
    fn find_in_mailbox(
        &self,
        mailbox: &Mailbox<Self::Id>,
        range: MessageRange,
    ) -> Result<Vec<MailboxMessage>, Error>;

    fn count_messages(&self, mailbox: &Mailbox<Self::Id>) -> Result<u64, Error>;

    /// Count the messages without the `\Seen` flag.
    fn count_unseen(&self, mailbox: &Mailbox<Self::Id>) -> Result<u64, Error>;

    /// Change the flags of every message in `range`.
    ///
    /// Each message whose flags actually change is assigned a new modseq.
    /// The changed messages are returned, sorted by UID.
    fn update_flags(
        &self,
        mailbox: &Mailbox<Self::Id>,
        range: MessageRange,
        mode: FlagUpdateMode,
        flags: &[Flag],
    ) -> Result<Vec<MailboxMessage>, Error>;

    /// Remove the messages in `range` that have the `\Deleted` flag,
    /// returning their UIDs in ascending order.
    ///
    /// If anything was removed, the mailbox's modseq is advanced.
    fn expunge(
        &self,
        mailbox: &Mailbox<Self::Id>,
        range: MessageRange,
    ) -> Result<Vec<i64>, Error>;

    /// Copy the message `uid` of `from` into `to`, where it receives a new
    /// UID and modseq.
    fn copy(
        &self,
        from: &Mailbox<Self::Id>,
        uid: i64,
        to: &Mailbox<Self::Id>,
    ) -> Result<MessageMetaData, Error>;

    fn last_uid(&self, mailbox: &Mailbox<Self::Id>) -> Result<i64, Error>;

    fn highest_mod_seq(
        &self,
        mailbox: &Mailbox<Self::Id>,
    ) -> Result<i64, Error>;
}

pub trait SubscriptionMapper: Mapper {
    /// Record `subscription`. Saving an existing subscription does nothing.
    fn save(&self, subscription: &Subscription) -> Result<(), Error>;

    /// Remove `subscription`. Deleting an absent subscription does nothing.
    fn delete(&self, subscription: &Subscription) -> Result<(), Error>;

    /// Return every subscription of `user`, sorted by mailbox name.
    fn find_subscriptions_for_user(
        &self,
        user: &str,
    ) -> Result<Vec<Subscription>, Error>;

    /// Fails with `NxSubscription` if `user` is not subscribed to `mailbox`.
    fn find_mailbox_subscription_for_user(
        &self,
        user: &str,
        mailbox: &MailboxName,
    ) -> Result<Subscription, Error>;
}

/// Binds sessions to the mappers of one backend.
pub trait MailboxSessionMapperFactory: Send + Sync {
    type Id: MailboxIdType;
    type MailboxMapper: MailboxMapper<Id = Self::Id>;
    type MessageMapper: MessageMapper<Id = Self::Id>;
    type SubscriptionMapper: SubscriptionMapper;
    type UidProvider: UidProvider<Id = Self::Id>;
    type ModSeqProvider: ModSeqProvider<Id = Self::Id>;

    /// The name of this backend, as used in log prefixes.
    fn backend_name(&self) -> &'static str;

    fn create_mailbox_mapper(
        &self,
        session: &MailboxSession,
    ) -> Result<Self::MailboxMapper, Error>;

    fn create_message_mapper(
        &self,
        session: &MailboxSession,
    ) -> Result<Self::MessageMapper, Error>;

    fn create_subscription_mapper(
        &self,
        session: &MailboxSession,
    ) -> Result<Self::SubscriptionMapper, Error>;

    fn create_uid_provider(
        &self,
        session: &MailboxSession,
    ) -> Result<Self::UidProvider, Error>;

    fn create_mod_seq_provider(
        &self,
        session: &MailboxSession,
    ) -> Result<Self::ModSeqProvider, Error>;
}
