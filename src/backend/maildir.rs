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

//! A backend storing each mailbox as a directory.
//!
//! The store root looks like this:
//!
//! ```text
//! rooted/             Absolute names, one directory per encoded segment
//!   users/
//!     alice/
//!       %/            Data of the mailbox `.users.alice`
//!         mailbox.toml
//!         last-uid
//!         mod-seq
//!         msgs/<uid>  One TOML file per message
//!       Work/         A child; `users/alice/Work/%` holds its data
//! relative/           Likewise for relative names
//! ids/<id>            The encoded name of the mailbox with that id
//! subscriptions/<u>   The subscriptions of user `u`
//! tmp/                Staging area for atomic writes
//! garbage/            Trees being deleted in the background
//! ```
//!
//! A directory is a mailbox iff it contains `%/mailbox.toml`; directories
//! without one are just intermediate levels of the hierarchy. Since `%` is
//! never a safe encoded segment, data directories cannot collide with
//! children.
//!
//! Check-then-act sequences are serialised with a `MailboxPathLocker`. The
//! name index lock is always taken before any mailbox lock. The locker only
//! covers this process, so a store directory must have at most one factory
//! open at a time.

use std::fs;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, info, warn};
use rand::{rngs::OsRng, Rng};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use crate::acl::codec::{DefaultMailboxAclCodec, MailboxAclCodec};
use crate::acl::{MailboxAcl, MailboxAclCommand};
use crate::mapper::*;
use crate::model::*;
use crate::name::codec::MailboxNameCodec;
use crate::name::query::MailboxQuery;
use crate::name::MailboxName;
use crate::support::error::Error;
use crate::support::file_ops::{self, ErrorTransforms, IgnoreKinds};
use crate::support::path_lock::{MailboxPathLocker, PathLock};
use crate::support::safe_name::is_safe_name;

pub type MaildirMailbox = Mailbox<String>;

const DATA_DIR: &str = "%";
const MAILBOX_FILE: &str = "mailbox.toml";
const LAST_UID_FILE: &str = "last-uid";
const MOD_SEQ_FILE: &str = "mod-seq";
const MESSAGES_DIR: &str = "msgs";
const NAMES_LOCK: &str = "%names";

/// The contents of `mailbox.toml`.
#[derive(Debug, Serialize, Deserialize)]
struct MailboxMeta {
    id: String,
    owner: String,
    #[serde(default)]
    owner_is_group: bool,
    #[serde(default)]
    owner_is_virtual: bool,
    uid_validity: i64,
    #[serde(default)]
    acl: String,
}

struct Store {
    root: PathBuf,
    codec: Arc<dyn MailboxNameCodec>,
    locker: MailboxPathLocker,
}

/// Creates mappers over one directory tree.
#[derive(Clone)]
pub struct MaildirMapperFactory {
    store: Arc<Store>,
}

impl MaildirMapperFactory {
    /// Open the store rooted at `root`, creating its skeleton if needed.
    pub fn open(
        root: impl Into<PathBuf>,
        codec: Arc<dyn MailboxNameCodec>,
    ) -> Result<Self, Error> {
        let root = root.into();
        for sub in &[
            "rooted",
            "relative",
            "ids",
            "subscriptions",
            "tmp",
            "garbage",
        ] {
            fs::create_dir_all(root.join(sub))?;
        }

        Ok(Self {
            store: Arc::new(Store {
                root,
                codec,
                locker: MailboxPathLocker::new(),
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.store.root
    }

    fn handle(&self, session: &MailboxSession) -> Handle {
        Handle {
            store: Arc::clone(&self.store),
            session: session.clone(),
        }
    }
}

impl MailboxSessionMapperFactory for MaildirMapperFactory {
    type Id = String;
    type MailboxMapper = MaildirMailboxMapper;
    type MessageMapper = MaildirMessageMapper;
    type SubscriptionMapper = MaildirSubscriptionMapper;
    type UidProvider = MaildirUidProvider;
    type ModSeqProvider = MaildirModSeqProvider;

    fn backend_name(&self) -> &'static str {
        "maildir"
    }

    fn create_mailbox_mapper(
        &self,
        session: &MailboxSession,
    ) -> Result<MaildirMailboxMapper, Error> {
        Ok(MaildirMailboxMapper(self.handle(session)))
    }

    fn create_message_mapper(
        &self,
        session: &MailboxSession,
    ) -> Result<MaildirMessageMapper, Error> {
        Ok(MaildirMessageMapper(self.handle(session)))
    }

    fn create_subscription_mapper(
        &self,
        session: &MailboxSession,
    ) -> Result<MaildirSubscriptionMapper, Error> {
        Ok(MaildirSubscriptionMapper(self.handle(session)))
    }

    fn create_uid_provider(
        &self,
        session: &MailboxSession,
    ) -> Result<MaildirUidProvider, Error> {
        Ok(MaildirUidProvider(self.handle(session)))
    }

    fn create_mod_seq_provider(
        &self,
        session: &MailboxSession,
    ) -> Result<MaildirModSeqProvider, Error> {
        Ok(MaildirModSeqProvider(self.handle(session)))
    }
}

impl Store {
    fn tmp(&self) -> PathBuf {
        self.root.join("tmp")
    }

    fn garbage(&self) -> PathBuf {
        self.root.join("garbage")
    }

    fn mailbox_dir(&self, name: &MailboxName) -> Result<PathBuf, Error> {
        let mut path = self.root.join(if name.has_root() {
            "rooted"
        } else {
            "relative"
        });
        for segment in name.segments() {
            let encoded = self.codec.encode_segment(segment);
            if !is_safe_name(&encoded) {
                return Err(Error::UnsafeName);
            }
            path.push(&*encoded);
        }
        Ok(path)
    }

    fn id_file(&self, id: &str) -> Result<PathBuf, Error> {
        if is_safe_name(id) {
            Ok(self.root.join("ids").join(id))
        } else {
            Err(Error::NxMailbox(format!("#{}", id)))
        }
    }

    fn subscription_file(&self, user: &str) -> Result<PathBuf, Error> {
        let encoded = self.codec.encode_segment(user);
        if is_safe_name(&encoded) {
            Ok(self.root.join("subscriptions").join(&*encoded))
        } else {
            Err(Error::UnsafeName)
        }
    }

    fn lock_mailbox(&self, id: &str) -> PathLock {
        self.locker.lock_key(&format!("%mailbox:{}", id))
    }

    fn spit(
        &self,
        path: &Path,
        overwrite: bool,
        data: &[u8],
    ) -> Result<(), Error> {
        file_ops::spit(self.tmp(), path, overwrite, 0o600, data)?;
        Ok(())
    }

    fn name_of_id(&self, id: &str) -> Result<MailboxName, Error> {
        let encoded = fs::read_to_string(self.id_file(id)?)
            .on_not_found(Error::NxMailbox(format!("#{}", id)))?;
        self.codec
            .decode(&encoded, encoded.starts_with(self.codec.delimiter()))
    }

    /// The data directory `mailbox` currently lives in, which may differ from
    /// what its name says if it has been renamed since it was loaded.
    fn data_dir_of(&self, mailbox: &MaildirMailbox) -> Result<PathBuf, Error> {
        let id = mailbox.require_id()?;
        let name = self.name_of_id(id).map_err(|e| match e {
            Error::NxMailbox(_) => Error::NxMailbox(mailbox.name().to_string()),
            e => e,
        })?;
        Ok(self.mailbox_dir(&name)?.join(DATA_DIR))
    }

    fn read_meta(
        &self,
        data: &Path,
        name: &MailboxName,
    ) -> Result<MailboxMeta, Error> {
        let text = fs::read_to_string(data.join(MAILBOX_FILE))
            .on_not_found(Error::NxMailbox(name.to_string()))?;
        Ok(toml::from_str(&text)?)
    }

    fn write_meta(&self, data: &Path, meta: &MailboxMeta) -> Result<(), Error> {
        let text = toml::to_string(meta)?;
        self.spit(&data.join(MAILBOX_FILE), true, text.as_bytes())
    }

    fn load(&self, name: &MailboxName) -> Result<MaildirMailbox, Error> {
        let data = match self.mailbox_dir(name) {
            Ok(dir) => dir.join(DATA_DIR),
            // Nothing can have been stored under an unsafe name
            Err(Error::UnsafeName) => {
                return Err(Error::NxMailbox(name.to_string()))
            }
            Err(e) => return Err(e),
        };

        let meta = self.read_meta(&data, name)?;
        let acl = DefaultMailboxAclCodec.decode(&meta.acl)?;
        Ok(Mailbox::restore(
            meta.id,
            name.clone(),
            MailboxOwner::restore(
                meta.owner,
                meta.owner_is_group,
                meta.owner_is_virtual,
            ),
            meta.uid_validity,
            read_counter(&data.join(LAST_UID_FILE))?,
            read_counter(&data.join(MOD_SEQ_FILE))?,
            acl,
        ))
    }

    /// Collect the names of all mailboxes at or below `dir`, which holds
    /// `name`.
    ///
    /// If `stop_at_first` is set, stop as soon as anything strictly below
    /// `dir` is found.
    fn walk(
        &self,
        dir: &Path,
        name: &MailboxName,
        stop_at_first: bool,
        out: &mut Vec<MailboxName>,
    ) -> Result<(), Error> {
        if !stop_at_first && dir.join(DATA_DIR).join(MAILBOX_FILE).is_file() {
            out.push(name.clone());
        }

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if io::ErrorKind::NotFound == e.kind() => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }

            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                warn!("Ignoring non-UTF-8 entry in {}", dir.display());
                continue;
            };
            if file_name == DATA_DIR {
                continue;
            }

            let segment = match self.codec.decode_segment(file_name) {
                Ok(segment) => segment.into_owned(),
                Err(e) => {
                    warn!(
                        "Ignoring undecodable entry {}: {}",
                        entry.path().display(),
                        e
                    );
                    continue;
                }
            };

            let child = name.child(segment);
            if stop_at_first
                && entry.path().join(DATA_DIR).join(MAILBOX_FILE).is_file()
            {
                out.push(child);
                return Ok(());
            }

            self.walk(&entry.path(), &child, stop_at_first, out)?;
            if stop_at_first && !out.is_empty() {
                return Ok(());
            }
        }

        Ok(())
    }

    /// Load every mailbox at or below `name`, sorted by name.
    fn load_tree(
        &self,
        name: &MailboxName,
    ) -> Result<Vec<MaildirMailbox>, Error> {
        let dir = match self.mailbox_dir(name) {
            Ok(dir) => dir,
            Err(Error::UnsafeName) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut names = Vec::new();
        self.walk(&dir, name, false, &mut names)?;

        let mut mailboxes = Vec::with_capacity(names.len());
        for name in names {
            match self.load(&name) {
                Ok(mb) => mailboxes.push(mb),
                // Deleted concurrently
                Err(Error::NxMailbox(_)) => (),
                Err(e) => return Err(e),
            }
        }
        mailboxes.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(mailboxes)
    }

    fn next_counter(&self, data: &Path, file: &str) -> Result<i64, Error> {
        let path = data.join(file);
        let next = read_counter(&path)? + 1;
        let mut buf = Vec::with_capacity(8);
        buf.write_i64::<BigEndian>(next)?;
        self.spit(&path, true, &buf)?;
        Ok(next)
    }

    fn message_uids(&self, data: &Path) -> Result<Vec<i64>, Error> {
        let mut uids = Vec::new();
        for entry in fs::read_dir(data.join(MESSAGES_DIR))? {
            let entry = entry?;
            match entry.file_name().to_str().and_then(|s| s.parse().ok()) {
                Some(uid) => uids.push(uid),
                None => warn!(
                    "Ignoring stray file {} in message store",
                    entry.path().display()
                ),
            }
        }
        uids.sort_unstable();
        Ok(uids)
    }

    fn read_message(
        &self,
        data: &Path,
        uid: i64,
    ) -> Result<MailboxMessage, Error> {
        let path = data.join(MESSAGES_DIR).join(uid.to_string());
        let text =
            fs::read_to_string(path).on_not_found(Error::NxMessage)?;
        Ok(toml::from_str(&text)?)
    }

    fn write_message(
        &self,
        data: &Path,
        message: &MailboxMessage,
        overwrite: bool,
    ) -> Result<(), Error> {
        let text = toml::to_string(message)?;
        self.spit(
            &data.join(MESSAGES_DIR).join(message.uid.to_string()),
            overwrite,
            text.as_bytes(),
        )
    }

    fn messages_in(
        &self,
        data: &Path,
        range: MessageRange,
    ) -> Result<Vec<MailboxMessage>, Error> {
        self.message_uids(data)?
            .into_iter()
            .filter(|&uid| range.contains(uid))
            .map(|uid| self.read_message(data, uid))
            .collect()
    }

    /// Append `message` to the mailbox at `data`, whose lock must be held.
    fn append(
        &self,
        data: &Path,
        mut message: MailboxMessage,
    ) -> Result<MessageMetaData, Error> {
        message.uid = self.next_counter(data, LAST_UID_FILE)?;
        message.mod_seq = self.next_counter(data, MOD_SEQ_FILE)?;
        self.write_message(data, &message, false)?;
        Ok(MessageMetaData {
            uid: message.uid,
            mod_seq: message.mod_seq,
            size: message.size,
        })
    }

    fn read_subscriptions(&self, user: &str) -> Result<Vec<String>, Error> {
        let data = file_ops::slurp(self.subscription_file(user)?)?;
        let text = String::from_utf8(data).map_err(|_| {
            Error::CorruptStorage(format!("subscriptions of {}", user))
        })?;
        Ok(text
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_owned)
            .collect())
    }

    fn write_subscriptions(
        &self,
        user: &str,
        mut subscriptions: Vec<String>,
    ) -> Result<(), Error> {
        let path = self.subscription_file(user)?;
        if subscriptions.is_empty() {
            fs::remove_file(path).ignore_not_found()?;
            return Ok(());
        }

        subscriptions.sort();
        subscriptions.dedup();
        let mut text = subscriptions.join("\n");
        text.push('\n');
        self.spit(&path, true, text.as_bytes())
    }
}

fn read_counter(path: &Path) -> Result<i64, Error> {
    let data = file_ops::slurp(path)?;
    if data.is_empty() {
        return Ok(0);
    }

    Cursor::new(&data)
        .read_i64::<BigEndian>()
        .map_err(|_| Error::CorruptStorage(path.display().to_string()))
}

struct Handle {
    store: Arc<Store>,
    session: MailboxSession,
}

pub struct MaildirMailboxMapper(Handle);
pub struct MaildirMessageMapper(Handle);
pub struct MaildirSubscriptionMapper(Handle);
pub struct MaildirUidProvider(Handle);
pub struct MaildirModSeqProvider(Handle);

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
    MaildirMailboxMapper,
    MaildirMessageMapper,
    MaildirSubscriptionMapper
);

impl MaildirMailboxMapper {
    fn create(&self, mailbox: &mut MaildirMailbox) -> Result<String, Error> {
        let store = &self.0.store;
        let _names = store.locker.lock_key(NAMES_LOCK);

        let dir = store.mailbox_dir(mailbox.name())?;
        if dir.join(DATA_DIR).join(MAILBOX_FILE).is_file() {
            return Err(Error::MailboxExists(mailbox.name().to_string()));
        }

        let id = format!("{:016x}", OsRng.gen::<u64>());
        let meta = MailboxMeta {
            id: id.clone(),
            owner: mailbox.owner().name().to_owned(),
            owner_is_group: mailbox.owner().is_group(),
            owner_is_virtual: mailbox.owner().is_virtual_hosted(),
            uid_validity: mailbox.uid_validity(),
            acl: DefaultMailboxAclCodec.encode(mailbox.acl()),
        };

        // Stage the data directory inside tmp, then move the whole thing in
        // when done.
        let stage = TempDir::new_in(store.tmp())?;
        fs::create_dir(stage.path().join(MESSAGES_DIR))?;
        for &(file, value) in &[
            (LAST_UID_FILE, mailbox.last_uid()),
            (MOD_SEQ_FILE, mailbox.highest_mod_seq()),
        ] {
            let mut buf = Vec::with_capacity(8);
            buf.write_i64::<BigEndian>(value)?;
            store.spit(&stage.path().join(file), false, &buf)?;
        }
        store.write_meta(stage.path(), &meta)?;

        fs::create_dir_all(&dir)?;
        // The id is recorded first so a mailbox directory never exists
        // without one. An id naming no mailbox is just not found.
        let id_file = store.id_file(&id)?;
        store.spit(
            &id_file,
            false,
            store.codec.encode(mailbox.name()).as_bytes(),
        )?;
        if let Err(e) = fs::rename(stage.path(), dir.join(DATA_DIR))
            .on_exists(Error::MailboxExists(mailbox.name().to_string()))
        {
            if let Err(e2) = fs::remove_file(&id_file).ignore_not_found() {
                warn!(
                    "{} Failed to remove id file {}: {}",
                    self.0.session.log_prefix(),
                    id_file.display(),
                    e2
                );
            }
            return Err(e);
        }

        mailbox.set_id(id.clone());
        info!(
            "{} Created mailbox {} (#{})",
            self.0.session.log_prefix(),
            mailbox.name(),
            id
        );
        Ok(id)
    }

    fn update(&self, mailbox: &MaildirMailbox, id: &str) -> Result<(), Error> {
        let store = &self.0.store;
        let _names = store.locker.lock_key(NAMES_LOCK);
        let _mailbox = store.lock_mailbox(id);

        let old_name = store.name_of_id(id)?;
        let mut data = store.mailbox_dir(&old_name)?.join(DATA_DIR);

        if old_name != *mailbox.name() {
            let new_dir = store.mailbox_dir(mailbox.name())?;
            let new_data = new_dir.join(DATA_DIR);
            if new_data.join(MAILBOX_FILE).is_file() {
                return Err(Error::MailboxExists(mailbox.name().to_string()));
            }

            fs::create_dir_all(&new_dir)?;
            fs::rename(&data, &new_data)
                .on_exists(Error::MailboxExists(mailbox.name().to_string()))?;
            store.spit(
                &store.id_file(id)?,
                true,
                store.codec.encode(mailbox.name()).as_bytes(),
            )?;
            data = new_data;

            info!(
                "{} Renamed mailbox {} to {}",
                self.0.session.log_prefix(),
                old_name,
                mailbox.name()
            );
        }

        let mut meta = store.read_meta(&data, mailbox.name())?;
        meta.acl = DefaultMailboxAclCodec.encode(mailbox.acl());
        store.write_meta(&data, &meta)
    }
}

impl MailboxMapper for MaildirMailboxMapper {
    type Id = String;

    fn save(&self, mailbox: &mut MaildirMailbox) -> Result<String, Error> {
        match mailbox.id().cloned() {
            Some(id) => {
                self.update(mailbox, &id)?;
                Ok(id)
            }
            None => self.create(mailbox),
        }
    }

    fn find_mailbox_by_path(
        &self,
        name: &MailboxName,
    ) -> Result<MaildirMailbox, Error> {
        self.0.store.load(name)
    }

    fn find_mailbox_by_id(&self, id: &String) -> Result<MaildirMailbox, Error> {
        let name = self.0.store.name_of_id(id)?;
        self.0.store.load(&name)
    }

    fn find_mailbox_with_path_like(
        &self,
        query: &MailboxQuery,
    ) -> Result<Vec<MaildirMailbox>, Error> {
        self.0.store.load_tree(&query.fixed_prefix())
    }

    fn has_children(&self, mailbox: &MaildirMailbox) -> Result<bool, Error> {
        let store = &self.0.store;
        let dir = match store.mailbox_dir(mailbox.name()) {
            Ok(dir) => dir,
            Err(Error::UnsafeName) => return Ok(false),
            Err(e) => return Err(e),
        };

        let mut found = Vec::new();
        store.walk(&dir, mailbox.name(), true, &mut found)?;
        Ok(!found.is_empty())
    }

    fn delete(&self, mailbox: &MaildirMailbox) -> Result<(), Error> {
        let store = &self.0.store;
        let id = mailbox.require_id()?;
        let _names = store.locker.lock_key(NAMES_LOCK);
        let _mailbox = store.lock_mailbox(id);

        let data = store.data_dir_of(mailbox)?;
        file_ops::delete_async(&data, store.garbage())
            .on_not_found(Error::NxMailbox(mailbox.name().to_string()))?;
        fs::remove_file(store.id_file(id)?).ignore_not_found()?;

        info!(
            "{} Deleted mailbox {} (#{})",
            self.0.session.log_prefix(),
            mailbox.name(),
            id
        );
        Ok(())
    }

    fn list(&self) -> Result<Vec<MaildirMailbox>, Error> {
        let store = &self.0.store;
        let mut mailboxes =
            store.load_tree(&MailboxName::relative(Vec::<String>::new()))?;
        mailboxes.extend(
            store.load_tree(&MailboxName::rooted(Vec::<String>::new()))?,
        );
        mailboxes.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(mailboxes)
    }

    fn update_acl(
        &self,
        mailbox: &MaildirMailbox,
        command: &MailboxAclCommand,
    ) -> Result<MailboxAcl, Error> {
        let store = &self.0.store;
        let _lock = store.lock_mailbox(mailbox.require_id()?);
        let data = store.data_dir_of(mailbox)?;

        let mut meta = store.read_meta(&data, mailbox.name())?;
        let acl = DefaultMailboxAclCodec.decode(&meta.acl)?.apply(command);
        meta.acl = DefaultMailboxAclCodec.encode(&acl);
        store.write_meta(&data, &meta)?;
        Ok(acl)
    }
}

impl MessageMapper for MaildirMessageMapper {
    type Id = String;

    fn append(
        &self,
        mailbox: &MaildirMailbox,
        message: MailboxMessage,
    ) -> Result<MessageMetaData, Error> {
        let store = &self.0.store;
        let _lock = store.lock_mailbox(mailbox.require_id()?);
        let data = store.data_dir_of(mailbox)?;
        let meta = store.append(&data, message)?;

        debug!(
            "{} Appended UID {} to {}",
            self.0.session.log_prefix(),
            meta.uid,
            mailbox.name()
        );
        Ok(meta)
    }

    fn find_in_mailbox(
        &self,
        mailbox: &MaildirMailbox,
        range: MessageRange,
    ) -> Result<Vec<MailboxMessage>, Error> {
        let store = &self.0.store;
        let _lock = store.lock_mailbox(mailbox.require_id()?);
        let data = store.data_dir_of(mailbox)?;
        store.messages_in(&data, range)
    }

    fn count_messages(&self, mailbox: &MaildirMailbox) -> Result<u64, Error> {
        let store = &self.0.store;
        let _lock = store.lock_mailbox(mailbox.require_id()?);
        let data = store.data_dir_of(mailbox)?;
        Ok(store.message_uids(&data)?.len() as u64)
    }

    fn count_unseen(&self, mailbox: &MaildirMailbox) -> Result<u64, Error> {
        let store = &self.0.store;
        let _lock = store.lock_mailbox(mailbox.require_id()?);
        let data = store.data_dir_of(mailbox)?;
        Ok(store
            .messages_in(&data, MessageRange::All)?
            .iter()
            .filter(|m| !m.is_seen())
            .count() as u64)
    }

    fn update_flags(
        &self,
        mailbox: &MaildirMailbox,
        range: MessageRange,
        mode: FlagUpdateMode,
        flags: &[Flag],
    ) -> Result<Vec<MailboxMessage>, Error> {
        let store = &self.0.store;
        let _lock = store.lock_mailbox(mailbox.require_id()?);
        let data = store.data_dir_of(mailbox)?;

        let mut changed = Vec::new();
        for mut message in store.messages_in(&data, range)? {
            if message.update_flags(mode, flags) {
                message.mod_seq = store.next_counter(&data, MOD_SEQ_FILE)?;
                store.write_message(&data, &message, true)?;
                changed.push(message);
            }
        }
        Ok(changed)
    }

    fn expunge(
        &self,
        mailbox: &MaildirMailbox,
        range: MessageRange,
    ) -> Result<Vec<i64>, Error> {
        let store = &self.0.store;
        let _lock = store.lock_mailbox(mailbox.require_id()?);
        let data = store.data_dir_of(mailbox)?;

        let doomed = store
            .messages_in(&data, range)?
            .into_iter()
            .filter(MailboxMessage::is_deleted)
            .map(|m| m.uid)
            .collect::<Vec<_>>();
        if !doomed.is_empty() {
            for &uid in &doomed {
                fs::remove_file(data.join(MESSAGES_DIR).join(uid.to_string()))
                    .ignore_not_found()?;
            }
            store.next_counter(&data, MOD_SEQ_FILE)?;
        }
        Ok(doomed)
    }

    fn copy(
        &self,
        from: &MaildirMailbox,
        uid: i64,
        to: &MaildirMailbox,
    ) -> Result<MessageMetaData, Error> {
        let store = &self.0.store;
        let message = {
            let _lock = store.lock_mailbox(from.require_id()?);
            let data = store.data_dir_of(from)?;
            store.read_message(&data, uid)?
        };

        self.append(to, message)
    }

    fn last_uid(&self, mailbox: &MaildirMailbox) -> Result<i64, Error> {
        let data = self.0.store.data_dir_of(mailbox)?;
        read_counter(&data.join(LAST_UID_FILE))
    }

    fn highest_mod_seq(&self, mailbox: &MaildirMailbox) -> Result<i64, Error> {
        let data = self.0.store.data_dir_of(mailbox)?;
        read_counter(&data.join(MOD_SEQ_FILE))
    }
}

impl UidProvider for MaildirUidProvider {
    type Id = String;

    fn next_uid(&self, mailbox: &MaildirMailbox) -> Result<i64, Error> {
        let store = &self.0.store;
        let _lock = store.lock_mailbox(mailbox.require_id()?);
        let data = store.data_dir_of(mailbox)?;
        store.next_counter(&data, LAST_UID_FILE)
    }

    fn last_uid(&self, mailbox: &MaildirMailbox) -> Result<i64, Error> {
        let data = self.0.store.data_dir_of(mailbox)?;
        read_counter(&data.join(LAST_UID_FILE))
    }
}

impl ModSeqProvider for MaildirModSeqProvider {
    type Id = String;

    fn next_mod_seq(&self, mailbox: &MaildirMailbox) -> Result<i64, Error> {
        let store = &self.0.store;
        let _lock = store.lock_mailbox(mailbox.require_id()?);
        let data = store.data_dir_of(mailbox)?;
        store.next_counter(&data, MOD_SEQ_FILE)
    }

    fn highest_mod_seq(&self, mailbox: &MaildirMailbox) -> Result<i64, Error> {
        let data = self.0.store.data_dir_of(mailbox)?;
        read_counter(&data.join(MOD_SEQ_FILE))
    }
}

impl MaildirSubscriptionMapper {
    fn modify(
        &self,
        subscription: &Subscription,
        f: impl FnOnce(&mut Vec<String>, String),
    ) -> Result<(), Error> {
        let store = &self.0.store;
        let _lock = store
            .locker
            .lock_key(&format!("%subscriptions:{}", subscription.user));

        let mut subscriptions = store.read_subscriptions(&subscription.user)?;
        f(&mut subscriptions, store.codec.encode(&subscription.mailbox));
        store.write_subscriptions(&subscription.user, subscriptions)
    }
}

impl SubscriptionMapper for MaildirSubscriptionMapper {
    fn save(&self, subscription: &Subscription) -> Result<(), Error> {
        self.modify(subscription, |subscriptions, encoded| {
            subscriptions.push(encoded)
        })
    }

    fn delete(&self, subscription: &Subscription) -> Result<(), Error> {
        self.modify(subscription, |subscriptions, encoded| {
            subscriptions.retain(|s| *s != encoded)
        })
    }

    fn find_subscriptions_for_user(
        &self,
        user: &str,
    ) -> Result<Vec<Subscription>, Error> {
        let store = &self.0.store;
        let mut subscriptions = store
            .read_subscriptions(user)?
            .iter()
            .map(|encoded| {
                let name = store.codec.decode(
                    encoded,
                    encoded.starts_with(store.codec.delimiter()),
                )?;
                Ok(Subscription::new(user, name))
            })
            .collect::<Result<Vec<_>, Error>>()?;
        subscriptions.sort_by(|a, b| a.mailbox.cmp(&b.mailbox));
        Ok(subscriptions)
    }

    fn find_mailbox_subscription_for_user(
        &self,
        user: &str,
        mailbox: &MailboxName,
    ) -> Result<Subscription, Error> {
        let store = &self.0.store;
        let encoded = store.codec.encode(mailbox);
        if store.read_subscriptions(user)?.contains(&encoded) {
            Ok(Subscription::new(user, mailbox.clone()))
        } else {
            Err(Error::NxSubscription)
        }
    }
}
