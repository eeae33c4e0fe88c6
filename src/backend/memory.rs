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

//! A backend which keeps everything in memory.
//!
//! Each table is a map from key to an individually locked entry, so
//! operations on different mailboxes (or different users' subscriptions)
//! never contend beyond a brief lookup in the map itself. Only creation,
//! renaming and deletion of mailboxes serialise on the name index, which is
//! what guarantees name uniqueness.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use log::{debug, info};

use crate::acl::{MailboxAcl, MailboxAclCommand};
use crate::mapper::*;
use crate::model::*;
use crate::name::query::MailboxQuery;
use crate::name::MailboxName;
use crate::support::error::Error;

pub type MemoryMailbox = Mailbox<u64>;

#[derive(Default)]
struct Tables {
    next_id: AtomicU64,
    names: RwLock<BTreeMap<MailboxName, u64>>,
    mailboxes: RwLock<HashMap<u64, Arc<MailboxEntry>>>,
    subscriptions: RwLock<HashMap<String, Arc<Mutex<BTreeSet<MailboxName>>>>>,
}

struct MailboxEntry {
    last_uid: AtomicI64,
    highest_mod_seq: AtomicI64,
    data: Mutex<MailboxData>,
}

struct MailboxData {
    name: MailboxName,
    owner: MailboxOwner,
    uid_validity: i64,
    acl: MailboxAcl,
    messages: BTreeMap<i64, MailboxMessage>,
}

impl MailboxEntry {
    fn snapshot(&self, id: u64) -> MemoryMailbox {
        let data = self.data.lock().unwrap();
        Mailbox::restore(
            id,
            data.name.clone(),
            data.owner.clone(),
            data.uid_validity,
            self.last_uid.load(Ordering::SeqCst),
            self.highest_mod_seq.load(Ordering::SeqCst),
            data.acl.clone(),
        )
    }

    fn next_uid(&self) -> i64 {
        self.last_uid.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn next_mod_seq(&self) -> i64 {
        self.highest_mod_seq.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Tables {
    fn entry(&self, id: &u64) -> Result<Arc<MailboxEntry>, Error> {
        self.mailboxes
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NxMailbox(format!("#{}", id)))
    }

    fn entry_for(
        &self,
        mailbox: &MemoryMailbox,
    ) -> Result<Arc<MailboxEntry>, Error> {
        let id = mailbox.require_id()?;
        self.mailboxes
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NxMailbox(mailbox.name().to_string()))
    }

    fn subscriptions_of(
        &self,
        user: &str,
    ) -> Option<Arc<Mutex<BTreeSet<MailboxName>>>> {
        self.subscriptions.read().unwrap().get(user).cloned()
    }
}

/// Creates mappers over one shared set of in-memory tables.
///
/// Clones share the same tables.
#[derive(Clone, Default)]
pub struct MemoryMapperFactory {
    tables: Arc<Tables>,
}

impl MemoryMapperFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, session: &MailboxSession) -> Handle {
        Handle {
            tables: Arc::clone(&self.tables),
            session: session.clone(),
        }
    }
}

impl MailboxSessionMapperFactory for MemoryMapperFactory {
    type Id = u64;
    type MailboxMapper = MemoryMailboxMapper;
    type MessageMapper = MemoryMessageMapper;
    type SubscriptionMapper = MemorySubscriptionMapper;
    type UidProvider = MemoryUidProvider;
    type ModSeqProvider = MemoryModSeqProvider;

    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn create_mailbox_mapper(
        &self,
        session: &MailboxSession,
    ) -> Result<MemoryMailboxMapper, Error> {
        Ok(MemoryMailboxMapper(self.handle(session)))
    }

    fn create_message_mapper(
        &self,
        session: &MailboxSession,
    ) -> Result<MemoryMessageMapper, Error> {
        Ok(MemoryMessageMapper(self.handle(session)))
    }

    fn create_subscription_mapper(
        &self,
        session: &MailboxSession,
    ) -> Result<MemorySubscriptionMapper, Error> {
        Ok(MemorySubscriptionMapper(self.handle(session)))
    }

    fn create_uid_provider(
        &self,
        session: &MailboxSession,
    ) -> Result<MemoryUidProvider, Error> {
        Ok(MemoryUidProvider(self.handle(session)))
    }

    fn create_mod_seq_provider(
        &self,
        session: &MailboxSession,
    ) -> Result<MemoryModSeqProvider, Error> {
        Ok(MemoryModSeqProvider(self.handle(session)))
    }
}

struct Handle {
    tables: Arc<Tables>,
    session: MailboxSession,
}

pub struct MemoryMailboxMapper(Handle);
pub struct MemoryMessageMapper(Handle);
pub struct MemorySubscriptionMapper(Handle);
pub struct MemoryUidProvider(Handle);
pub struct MemoryModSeqProvider(Handle);

macro_rules! impl_mapper {
    ($($t:ty),*) => {$(
        impl Mapper for $t {
            fn session(&self) -> &MailboxSession {
                &self.0.session
            }
        }
    )*}
}

impl_mapper!(
    MemoryMailboxMapper,
    MemoryMessageMapper,
    MemorySubscriptionMapper
);

impl MailboxMapper for MemoryMailboxMapper {
    type Id = u64;

    fn save(&self, mailbox: &mut MemoryMailbox) -> Result<u64, Error> {
        let tables = &self.0.tables;
        let mut names = tables.names.write().unwrap();

        if let Some(&id) = mailbox.id() {
            let entry = tables.entry(&id)?;
            let mut data = entry.data.lock().unwrap();

            if data.name != *mailbox.name() {
                if names.contains_key(mailbox.name()) {
                    return Err(Error::MailboxExists(
                        mailbox.name().to_string(),
                    ));
                }

                names.remove(&data.name);
                names.insert(mailbox.name().clone(), id);
                info!(
                    "{} Renamed mailbox {} to {}",
                    self.0.session.log_prefix(),
                    data.name,
                    mailbox.name()
                );
                data.name = mailbox.name().clone();
            }

            data.acl = mailbox.acl().clone();
            return Ok(id);
        }

        if names.contains_key(mailbox.name()) {
            return Err(Error::MailboxExists(mailbox.name().to_string()));
        }

        let id = tables.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let entry = Arc::new(MailboxEntry {
            last_uid: AtomicI64::new(mailbox.last_uid()),
            highest_mod_seq: AtomicI64::new(mailbox.highest_mod_seq()),
            data: Mutex::new(MailboxData {
                name: mailbox.name().clone(),
                owner: mailbox.owner().clone(),
                uid_validity: mailbox.uid_validity(),
                acl: mailbox.acl().clone(),
                messages: BTreeMap::new(),
            }),
        });

        names.insert(mailbox.name().clone(), id);
        tables.mailboxes.write().unwrap().insert(id, entry);
        mailbox.set_id(id);

        info!(
            "{} Created mailbox {} (#{})",
            self.0.session.log_prefix(),
            mailbox.name(),
            id
        );
        Ok(id)
    }

    fn find_mailbox_by_path(
        &self,
        name: &MailboxName,
    ) -> Result<MemoryMailbox, Error> {
        let id = self
            .0
            .tables
            .names
            .read()
            .unwrap()
            .get(name)
            .copied()
            .ok_or_else(|| Error::NxMailbox(name.to_string()))?;
        self.find_mailbox_by_id(&id)
    }

    fn find_mailbox_by_id(&self, id: &u64) -> Result<MemoryMailbox, Error> {
        Ok(self.0.tables.entry(id)?.snapshot(*id))
    }

    fn find_mailbox_with_path_like(
        &self,
        query: &MailboxQuery,
    ) -> Result<Vec<MemoryMailbox>, Error> {
        let prefix = query.fixed_prefix();
        let ids = self
            .0
            .tables
            .names
            .read()
            .unwrap()
            .range(prefix.clone()..)
            .take_while(|&(name, _)| name.starts_with(&prefix))
            .map(|(_, &id)| id)
            .collect::<Vec<_>>();

        Ok(ids
            .into_iter()
            .filter_map(|id| self.find_mailbox_by_id(&id).ok())
            .collect())
    }

    fn has_children(&self, mailbox: &MemoryMailbox) -> Result<bool, Error> {
        let names = self.0.tables.names.read().unwrap();
        let parent = mailbox.name();
        Ok(names
            .range(parent.clone()..)
            .take_while(|&(name, _)| name.starts_with(parent))
            .any(|(name, _)| name.is_descendant_of(parent)))
    }

    fn delete(&self, mailbox: &MemoryMailbox) -> Result<(), Error> {
        let id = *mailbox.require_id()?;
        let tables = &self.0.tables;
        let mut names = tables.names.write().unwrap();

        let entry = tables
            .mailboxes
            .write()
            .unwrap()
            .remove(&id)
            .ok_or_else(|| Error::NxMailbox(mailbox.name().to_string()))?;
        let data = entry.data.lock().unwrap();
        names.remove(&data.name);

        info!(
            "{} Deleted mailbox {} (#{}) with {} messages",
            self.0.session.log_prefix(),
            data.name,
            id,
            data.messages.len()
        );
        Ok(())
    }

    fn list(&self) -> Result<Vec<MemoryMailbox>, Error> {
        let ids = self
            .0
            .tables
            .names
            .read()
            .unwrap()
            .values()
            .copied()
            .collect::<Vec<_>>();
        Ok(ids
            .into_iter()
            .filter_map(|id| self.find_mailbox_by_id(&id).ok())
            .collect())
    }

    fn update_acl(
        &self,
        mailbox: &MemoryMailbox,
        command: &MailboxAclCommand,
    ) -> Result<MailboxAcl, Error> {
        let entry = self.0.tables.entry_for(mailbox)?;
        let mut data = entry.data.lock().unwrap();
        data.acl = data.acl.apply(command);
        Ok(data.acl.clone())
    }
}

impl MessageMapper for MemoryMessageMapper {
    type Id = u64;

    fn append(
        &self,
        mailbox: &MemoryMailbox,
        mut message: MailboxMessage,
    ) -> Result<MessageMetaData, Error> {
        let entry = self.0.tables.entry_for(mailbox)?;
        let mut data = entry.data.lock().unwrap();

        message.uid = entry.next_uid();
        message.mod_seq = entry.next_mod_seq();
        let meta = MessageMetaData {
            uid: message.uid,
            mod_seq: message.mod_seq,
            size: message.size,
        };
        data.messages.insert(message.uid, message);

        debug!(
            "{} Appended UID {} to {}",
            self.0.session.log_prefix(),
            meta.uid,
            data.name
        );
        Ok(meta)
    }

    fn find_in_mailbox(
        &self,
        mailbox: &MemoryMailbox,
        range: MessageRange,
    ) -> Result<Vec<MailboxMessage>, Error> {
        let entry = self.0.tables.entry_for(mailbox)?;
        let data = entry.data.lock().unwrap();
        let (lo, hi) = range.bounds();
        Ok(data.messages.range(lo..=hi).map(|(_, m)| m.clone()).collect())
    }

    fn count_messages(&self, mailbox: &MemoryMailbox) -> Result<u64, Error> {
        let entry = self.0.tables.entry_for(mailbox)?;
        let data = entry.data.lock().unwrap();
        Ok(data.messages.len() as u64)
    }

    fn count_unseen(&self, mailbox: &MemoryMailbox) -> Result<u64, Error> {
        let entry = self.0.tables.entry_for(mailbox)?;
        let data = entry.data.lock().unwrap();
        Ok(data.messages.values().filter(|m| !m.is_seen()).count() as u64)
    }

    fn update_flags(
        &self,
        mailbox: &MemoryMailbox,
        range: MessageRange,
        mode: FlagUpdateMode,
        flags: &[Flag],
    ) -> Result<Vec<MailboxMessage>, Error> {
        let entry = self.0.tables.entry_for(mailbox)?;
        let mut data = entry.data.lock().unwrap();
        let (lo, hi) = range.bounds();

        let mut changed = Vec::new();
        for (_, message) in data.messages.range_mut(lo..=hi) {
            if message.update_flags(mode, flags) {
                message.mod_seq = entry.next_mod_seq();
                changed.push(message.clone());
            }
        }
        Ok(changed)
    }

    fn expunge(
        &self,
        mailbox: &MemoryMailbox,
        range: MessageRange,
    ) -> Result<Vec<i64>, Error> {
        let entry = self.0.tables.entry_for(mailbox)?;
        let mut data = entry.data.lock().unwrap();
        let (lo, hi) = range.bounds();

        let doomed = data
            .messages
            .range(lo..=hi)
            .filter(|(_, m)| m.is_deleted())
            .map(|(&uid, _)| uid)
            .collect::<Vec<_>>();
        if !doomed.is_empty() {
            for uid in &doomed {
                data.messages.remove(uid);
            }
            entry.next_mod_seq();
        }
        Ok(doomed)
    }

    fn copy(
        &self,
        from: &MemoryMailbox,
        uid: i64,
        to: &MemoryMailbox,
    ) -> Result<MessageMetaData, Error> {
        let message = {
            let entry = self.0.tables.entry_for(from)?;
            let data = entry.data.lock().unwrap();
            data.messages.get(&uid).cloned().ok_or(Error::NxMessage)?
        };

        self.append(to, message)
    }

    fn last_uid(&self, mailbox: &MemoryMailbox) -> Result<i64, Error> {
        MemoryUidProvider::last_uid_of(&self.0, mailbox)
    }

    fn highest_mod_seq(&self, mailbox: &MemoryMailbox) -> Result<i64, Error> {
        MemoryModSeqProvider::highest_mod_seq_of(&self.0, mailbox)
    }
}

impl MemoryUidProvider {
    fn last_uid_of(
        handle: &Handle,
        mailbox: &MemoryMailbox,
    ) -> Result<i64, Error> {
        Ok(handle
            .tables
            .entry_for(mailbox)?
            .last_uid
            .load(Ordering::SeqCst))
    }
}

impl UidProvider for MemoryUidProvider {
    type Id = u64;

    fn next_uid(&self, mailbox: &MemoryMailbox) -> Result<i64, Error> {
        Ok(self.0.tables.entry_for(mailbox)?.next_uid())
    }

    fn last_uid(&self, mailbox: &MemoryMailbox) -> Result<i64, Error> {
        Self::last_uid_of(&self.0, mailbox)
    }
}

impl MemoryModSeqProvider {
    fn highest_mod_seq_of(
        handle: &Handle,
        mailbox: &MemoryMailbox,
    ) -> Result<i64, Error> {
        Ok(handle
            .tables
            .entry_for(mailbox)?
            .highest_mod_seq
            .load(Ordering::SeqCst))
    }
}

impl ModSeqProvider for MemoryModSeqProvider {
    type Id = u64;

    fn next_mod_seq(&self, mailbox: &MemoryMailbox) -> Result<i64, Error> {
        Ok(self.0.tables.entry_for(mailbox)?.next_mod_seq())
    }

    fn highest_mod_seq(&self, mailbox: &MemoryMailbox) -> Result<i64, Error> {
        Self::highest_mod_seq_of(&self.0, mailbox)
    }
}

impl SubscriptionMapper for MemorySubscriptionMapper {
    fn save(&self, subscription: &Subscription) -> Result<(), Error> {
        let tables = &self.0.tables;
        let set = match tables.subscriptions_of(&subscription.user) {
            Some(set) => set,
            None => Arc::clone(
                tables
                    .subscriptions
                    .write()
                    .unwrap()
                    .entry(subscription.user.clone())
                    .or_default(),
            ),
        };

        set.lock().unwrap().insert(subscription.mailbox.clone());
        Ok(())
    }

    fn delete(&self, subscription: &Subscription) -> Result<(), Error> {
        if let Some(set) = self.0.tables.subscriptions_of(&subscription.user) {
            set.lock().unwrap().remove(&subscription.mailbox);
        }
        Ok(())
    }

    fn find_subscriptions_for_user(
        &self,
        user: &str,
    ) -> Result<Vec<Subscription>, Error> {
        Ok(self
            .0
            .tables
            .subscriptions_of(user)
            .map(|set| {
                set.lock()
                    .unwrap()
                    .iter()
                    .map(|mb| Subscription::new(user, mb.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn find_mailbox_subscription_for_user(
        &self,
        user: &str,
        mailbox: &MailboxName,
    ) -> Result<Subscription, Error> {
        let subscribed = self
            .0
            .tables
            .subscriptions_of(user)
            .map_or(false, |set| set.lock().unwrap().contains(mailbox));
        if subscribed {
            Ok(Subscription::new(user, mailbox.clone()))
        } else {
            Err(Error::NxSubscription)
        }
    }
}
