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

//! A backend storing everything in one SQLite database.
//!
//! Each session gets its own connection, shared by all mappers of that
//! session, so that `Mapper::execute` spans every mapper the session uses.
//! Outside of `execute`, each operation runs in its own `IMMEDIATE`
//! transaction; inside, it runs in a savepoint of the outer transaction.
//!
//! Counters are advanced with `UPDATE ... RETURNING`, which SQLite serialises
//! through the database write lock, so concurrent sessions never observe the
//! same UID or modseq.

mod migrations;
mod types;

pub use self::types::MailboxId;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use log::{debug, error, info, warn};
use rusqlite::OptionalExtension as _;

use self::types::*;
use crate::acl::codec::{DefaultMailboxAclCodec, MailboxAclCodec};
use crate::acl::{MailboxAcl, MailboxAclCommand};
use crate::mapper::*;
use crate::model::*;
use crate::name::codec::MailboxNameCodec;
use crate::name::query::MailboxQuery;
use crate::name::MailboxName;
use crate::support::error::Error;

pub type SqliteMailbox = Mailbox<MailboxId>;

/// Creates mappers over one SQLite database file.
pub struct SqliteMapperFactory {
    path: PathBuf,
    codec: Arc<dyn MailboxNameCodec>,
    connections: Mutex<HashMap<u64, Weak<Mutex<SessionConnection>>>>,
}

struct SessionConnection {
    cxn: rusqlite::Connection,
    /// Whether an explicit transaction from `Mapper::begin` is open.
    in_txn: bool,
}

impl SqliteMapperFactory {
    /// Open (creating if needed) the database at `path` and bring its schema
    /// up to date.
    ///
    /// Names are stored in the form produced by `codec`. Reopening an
    /// existing database with a different codec makes its names unreadable.
    pub fn open(
        path: impl Into<PathBuf>,
        codec: Arc<dyn MailboxNameCodec>,
    ) -> Result<Self, Error> {
        let path = path.into();
        let mut cxn = open_connection(&path)?;
        migrations::apply_migrations(
            &mut cxn,
            "store",
            migrations::MIGRATIONS,
        )?;

        Ok(Self {
            path,
            codec,
            connections: Mutex::new(HashMap::new()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn handle(&self, session: &MailboxSession) -> Result<Handle, Error> {
        let mut connections = self.connections.lock().unwrap();
        let existing = connections.get(&session.id()).and_then(Weak::upgrade);

        let db = match existing {
            Some(db) => db,
            None => {
                let db = Arc::new(Mutex::new(SessionConnection {
                    cxn: open_connection(&self.path)?,
                    in_txn: false,
                }));
                connections.retain(|_, weak| weak.strong_count() > 0);
                connections.insert(session.id(), Arc::downgrade(&db));
                debug!("{} Opened database connection", session.log_prefix());
                db
            }
        };

        Ok(Handle {
            db,
            codec: Arc::clone(&self.codec),
            session: session.clone(),
        })
    }
}

fn open_connection(path: &Path) -> Result<rusqlite::Connection, Error> {
    let cxn = rusqlite::Connection::open_with_flags(
        path,
        rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
            | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
            | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    cxn.pragma_update(None, "foreign_keys", true)?;
    cxn.pragma_update(None, "journal_mode", "PERSIST")?;
    cxn.pragma_update(None, "journal_size_limit", 1024 * 1024)?;
    cxn.busy_timeout(Duration::from_secs(10))?;
    Ok(cxn)
}

impl MailboxSessionMapperFactory for SqliteMapperFactory {
    type Id = MailboxId;
    type MailboxMapper = SqliteMailboxMapper;
    type MessageMapper = SqliteMessageMapper;
    type SubscriptionMapper = SqliteSubscriptionMapper;
    type UidProvider = SqliteUidProvider;
    type ModSeqProvider = SqliteModSeqProvider;

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    fn create_mailbox_mapper(
        &self,
        session: &MailboxSession,
    ) -> Result<SqliteMailboxMapper, Error> {
        self.handle(session).map(SqliteMailboxMapper)
    }

    fn create_message_mapper(
        &self,
        session: &MailboxSession,
    ) -> Result<SqliteMessageMapper, Error> {
        self.handle(session).map(SqliteMessageMapper)
    }

    fn create_subscription_mapper(
        &self,
        session: &MailboxSession,
    ) -> Result<SqliteSubscriptionMapper, Error> {
        self.handle(session).map(SqliteSubscriptionMapper)
    }

    fn create_uid_provider(
        &self,
        session: &MailboxSession,
    ) -> Result<SqliteUidProvider, Error> {
        self.handle(session).map(SqliteUidProvider)
    }

    fn create_mod_seq_provider(
        &self,
        session: &MailboxSession,
    ) -> Result<SqliteModSeqProvider, Error> {
        self.handle(session).map(SqliteModSeqProvider)
    }
}

struct Handle {
    db: Arc<Mutex<SessionConnection>>,
    codec: Arc<dyn MailboxNameCodec>,
    session: MailboxSession,
}

impl Handle {
    /// Run `f` as one atomic write.
    fn write<R>(
        &self,
        f: impl FnOnce(&rusqlite::Connection) -> Result<R, Error>,
    ) -> Result<R, Error> {
        let mut db = self.db.lock().unwrap();
        let db = &mut *db;
        if db.in_txn {
            let sp = db.cxn.savepoint()?;
            let ret = f(&sp)?;
            sp.commit()?;
            Ok(ret)
        } else {
            let txn = db.cxn.transaction_with_behavior(
                rusqlite::TransactionBehavior::Immediate,
            )?;
            let ret = f(&txn)?;
            txn.commit()?;
            Ok(ret)
        }
    }

    fn read<R>(
        &self,
        f: impl FnOnce(&rusqlite::Connection) -> Result<R, Error>,
    ) -> Result<R, Error> {
        let db = self.db.lock().unwrap();
        f(&db.cxn)
    }

    fn begin(&self) -> Result<(), Error> {
        let mut db = self.db.lock().unwrap();
        db.cxn.execute_batch("BEGIN IMMEDIATE")?;
        db.in_txn = true;
        Ok(())
    }

    /// End the open transaction with `sql`.
    ///
    /// A failed COMMIT can leave the transaction open, in which case it is
    /// rolled back so the connection never keeps uncommitted writes past the
    /// end of `execute`.
    fn finish(&self, sql: &str) -> Result<(), Error> {
        let mut db = self.db.lock().unwrap();
        let result = db.cxn.execute_batch(sql);
        if let Err(ref e) = result {
            if !db.cxn.is_autocommit() {
                warn!(
                    "{} {} failed: {}; rolling back",
                    self.session.log_prefix(),
                    sql,
                    e
                );
                if let Err(e2) = db.cxn.execute_batch("ROLLBACK") {
                    error!(
                        "{} Rollback failed: {}",
                        self.session.log_prefix(),
                        e2
                    );
                }
            }
        }
        db.in_txn = !db.cxn.is_autocommit();
        Ok(result?)
    }

    fn end_request(&self) {
        let mut db = self.db.lock().unwrap();
        if db.in_txn {
            warn!(
                "{} Request ended inside a transaction; rolling back",
                self.session.log_prefix()
            );
            db.in_txn = false;
            if let Err(e) = db.cxn.execute_batch("ROLLBACK") {
                warn!("{} Rollback failed: {}", self.session.log_prefix(), e);
            }
        }
    }

    fn encode(&self, name: &MailboxName) -> String {
        self.codec.encode(name)
    }

    fn decode(&self, name: &str) -> Result<MailboxName, Error> {
        self.codec
            .decode(name, name.starts_with(self.codec.delimiter()))
    }

    fn decode_mailbox(&self, raw: RawMailbox) -> Result<SqliteMailbox, Error> {
        Ok(Mailbox::restore(
            raw.id,
            self.decode(&raw.name)?,
            MailboxOwner::restore(
                raw.owner,
                raw.owner_is_group,
                raw.owner_is_virtual,
            ),
            raw.uid_validity,
            raw.last_uid,
            raw.highest_mod_seq,
            DefaultMailboxAclCodec.decode(&raw.acl)?,
        ))
    }

    fn decode_mailboxes(
        &self,
        raw: Vec<RawMailbox>,
    ) -> Result<Vec<SqliteMailbox>, Error> {
        let mut mailboxes = raw
            .into_iter()
            .map(|r| self.decode_mailbox(r))
            .collect::<Result<Vec<_>, _>>()?;
        mailboxes.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(mailboxes)
    }
}

pub struct SqliteMailboxMapper(Handle);
pub struct SqliteMessageMapper(Handle);
pub struct SqliteSubscriptionMapper(Handle);
pub struct SqliteUidProvider(Handle);
pub struct SqliteModSeqProvider(Handle);

macro_rules! impl_mapper {
    ($($t:ty),*) => {$(
        impl Mapper for $t {
            fn session(&self) -> &MailboxSession {
                &self.0.session
            }

            fn end_request(&self) {
                self.0.end_request();
            }

            fn begin(&self) -> Result<(), Error> {
                self.0.begin()
            }

            fn commit(&self) -> Result<(), Error> {
                self.0.finish("COMMIT")
            }

            fn rollback(&self) -> Result<(), Error> {
                self.0.finish("ROLLBACK")
            }
        }
    )*}
}

impl_mapper!(
    SqliteMailboxMapper,
    SqliteMessageMapper,
    SqliteSubscriptionMapper
);

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        *e,
        rusqlite::Error::SqliteFailure(ref f, _)
            if rusqlite::ErrorCode::ConstraintViolation == f.code
    )
}

fn name_conflict(e: rusqlite::Error, name: &MailboxName) -> Error {
    if is_constraint_violation(&e) {
        Error::MailboxExists(name.to_string())
    } else {
        Error::Sqlite(e)
    }
}

/// Escape `s` for use in a `LIKE ... ESCAPE '\'` pattern.
fn like_escape(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for ch in s.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Fail with `NxMailbox` if `mailbox` is not in the database.
fn require_mailbox(
    cxn: &rusqlite::Connection,
    mailbox: &SqliteMailbox,
) -> Result<MailboxId, Error> {
    let id = *mailbox.require_id()?;
    cxn.prepare_cached("SELECT 1 FROM `mailbox` WHERE `id` = ?")?
        .query_row((id,), from_single::<i64>)
        .optional()?
        .ok_or_else(|| Error::NxMailbox(mailbox.name().to_string()))?;
    Ok(id)
}

fn next_uid(
    cxn: &rusqlite::Connection,
    mailbox: &SqliteMailbox,
) -> Result<i64, Error> {
    let id = *mailbox.require_id()?;
    cxn.prepare_cached(
        "UPDATE `mailbox` SET `last_uid` = `last_uid` + 1 \
         WHERE `id` = ? RETURNING `last_uid`",
    )?
    .query_row((id,), from_single)
    .optional()?
    .ok_or_else(|| Error::NxMailbox(mailbox.name().to_string()))
}

fn next_mod_seq(
    cxn: &rusqlite::Connection,
    mailbox: &SqliteMailbox,
) -> Result<i64, Error> {
    let id = *mailbox.require_id()?;
    cxn.prepare_cached(
        "UPDATE `mailbox` SET `highest_mod_seq` = `highest_mod_seq` + 1 \
         WHERE `id` = ? RETURNING `highest_mod_seq`",
    )?
    .query_row((id,), from_single)
    .optional()?
    .ok_or_else(|| Error::NxMailbox(mailbox.name().to_string()))
}

fn counter(
    cxn: &rusqlite::Connection,
    mailbox: &SqliteMailbox,
    column: &str,
) -> Result<i64, Error> {
    let id = *mailbox.require_id()?;
    cxn.prepare_cached(&format!(
        "SELECT `{column}` FROM `mailbox` WHERE `id` = ?"
    ))?
    .query_row((id,), from_single)
    .optional()?
    .ok_or_else(|| Error::NxMailbox(mailbox.name().to_string()))
}

fn append(
    cxn: &rusqlite::Connection,
    mailbox: &SqliteMailbox,
    message: &MailboxMessage,
) -> Result<MessageMetaData, Error> {
    let uid = next_uid(cxn, mailbox)?;
    let mod_seq = next_mod_seq(cxn, mailbox)?;
    cxn.prepare_cached(
        "INSERT INTO `message` (\
         `mailbox_id`, `uid`, `mod_seq`, `size`, `internal_date`, `flags`\
         ) VALUES (?, ?, ?, ?, ?, ?)",
    )?
    .execute((
        mailbox.require_id()?,
        uid,
        mod_seq,
        message.size,
        UnixTimestamp(message.internal_date),
        FlagList(message.flags.clone()),
    ))?;

    Ok(MessageMetaData {
        uid,
        mod_seq,
        size: message.size,
    })
}

fn messages_in(
    cxn: &rusqlite::Connection,
    id: MailboxId,
    range: MessageRange,
) -> Result<Vec<MailboxMessage>, Error> {
    let (lo, hi) = range.bounds();
    cxn.prepare_cached(
        "SELECT * FROM `message` \
         WHERE `mailbox_id` = ? AND `uid` BETWEEN ? AND ? \
         ORDER BY `uid`",
    )?
    .query_map((id, lo, hi), from_row)?
    .collect::<Result<Vec<_>, _>>()
    .map_err(Into::into)
}

impl MailboxMapper for SqliteMailboxMapper {
    type Id = MailboxId;

    fn save(&self, mailbox: &mut SqliteMailbox) -> Result<MailboxId, Error> {
        let name = self.0.encode(mailbox.name());
        let acl = DefaultMailboxAclCodec.encode(mailbox.acl());

        if let Some(&id) = mailbox.id() {
            let old_name = self.0.write(|cxn| {
                let old_name = cxn
                    .prepare_cached("SELECT `name` FROM `mailbox` WHERE `id` = ?")?
                    .query_row((id,), from_single::<String>)
                    .optional()?
                    .ok_or_else(|| Error::NxMailbox(mailbox.name().to_string()))?;
                cxn.prepare_cached(
                    "UPDATE `mailbox` SET `name` = ?, `acl` = ? WHERE `id` = ?",
                )?
                .execute((&name, &acl, id))
                .map_err(|e| name_conflict(e, mailbox.name()))?;
                Ok(old_name)
            })?;

            if old_name != name {
                info!(
                    "{} Renamed mailbox {} to {}",
                    self.0.session.log_prefix(),
                    old_name,
                    mailbox.name()
                );
            }
            return Ok(id);
        }

        let id = self.0.write(|cxn| {
            cxn.prepare_cached(
                "INSERT INTO `mailbox` (\
                 `name`, `owner`, `owner_is_group`, `owner_is_virtual`, \
                 `uid_validity`, `last_uid`, `highest_mod_seq`, `acl`\
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING `id`",
            )?
            .query_row(
                (
                    &name,
                    mailbox.owner().name(),
                    mailbox.owner().is_group(),
                    mailbox.owner().is_virtual_hosted(),
                    mailbox.uid_validity(),
                    mailbox.last_uid(),
                    mailbox.highest_mod_seq(),
                    &acl,
                ),
                from_single::<MailboxId>,
            )
            .map_err(|e| name_conflict(e, mailbox.name()))
        })?;
        mailbox.set_id(id);

        info!(
            "{} Created mailbox {} (#{})",
            self.0.session.log_prefix(),
            mailbox.name(),
            id.0
        );
        Ok(id)
    }

    fn find_mailbox_by_path(
        &self,
        name: &MailboxName,
    ) -> Result<SqliteMailbox, Error> {
        let encoded = self.0.encode(name);
        let raw = self.0.read(|cxn| {
            cxn.prepare_cached("SELECT * FROM `mailbox` WHERE `name` = ?")?
                .query_row((&encoded,), from_row::<RawMailbox>)
                .optional()?
                .ok_or_else(|| Error::NxMailbox(name.to_string()))
        })?;
        self.0.decode_mailbox(raw)
    }

    fn find_mailbox_by_id(
        &self,
        id: &MailboxId,
    ) -> Result<SqliteMailbox, Error> {
        let raw = self.0.read(|cxn| {
            cxn.prepare_cached("SELECT * FROM `mailbox` WHERE `id` = ?")?
                .query_row((id,), from_row::<RawMailbox>)
                .optional()?
                .ok_or_else(|| Error::NxMailbox(format!("#{}", id.0)))
        })?;
        self.0.decode_mailbox(raw)
    }

    fn find_mailbox_with_path_like(
        &self,
        query: &MailboxQuery,
    ) -> Result<Vec<SqliteMailbox>, Error> {
        // LIKE is case-insensitive, so this can only over-select.
        let pattern =
            format!("{}%", like_escape(&self.0.encode(&query.fixed_prefix())));
        let raw = self.0.read(|cxn| {
            cxn.prepare_cached(
                "SELECT * FROM `mailbox` WHERE `name` LIKE ? ESCAPE '\\'",
            )?
            .query_map((&pattern,), from_row::<RawMailbox>)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into)
        })?;
        self.0.decode_mailboxes(raw)
    }

    fn has_children(&self, mailbox: &SqliteMailbox) -> Result<bool, Error> {
        let encoded = self.0.encode(mailbox.name());
        let mut prefix = encoded.clone();
        if !mailbox.name().is_empty() {
            prefix.push(self.0.codec.delimiter());
        }

        self.0.read(|cxn| {
            Ok(cxn
                .prepare_cached(
                    "SELECT 1 FROM `mailbox` \
                     WHERE substr(`name`, 1, ?) = ? AND `name` <> ? LIMIT 1",
                )?
                .query_row(
                    (prefix.chars().count() as i64, &prefix, &encoded),
                    from_single::<i64>,
                )
                .optional()?
                .is_some())
        })
    }

    fn delete(&self, mailbox: &SqliteMailbox) -> Result<(), Error> {
        let message_count = self.0.write(|cxn| {
            let id = require_mailbox(cxn, mailbox)?;
            let message_count = cxn
                .prepare_cached(
                    "SELECT COUNT(*) FROM `message` WHERE `mailbox_id` = ?",
                )?
                .query_row((id,), from_single::<i64>)?;
            cxn.prepare_cached("DELETE FROM `mailbox` WHERE `id` = ?")?
                .execute((id,))?;
            Ok(message_count)
        })?;

        info!(
            "{} Deleted mailbox {} with {} messages",
            self.0.session.log_prefix(),
            mailbox.name(),
            message_count
        );
        Ok(())
    }

    fn list(&self) -> Result<Vec<SqliteMailbox>, Error> {
        let raw = self.0.read(|cxn| {
            cxn.prepare_cached("SELECT * FROM `mailbox`")?
                .query_map((), from_row::<RawMailbox>)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(Into::into)
        })?;
        self.0.decode_mailboxes(raw)
    }

    fn update_acl(
        &self,
        mailbox: &SqliteMailbox,
        command: &MailboxAclCommand,
    ) -> Result<MailboxAcl, Error> {
        self.0.write(|cxn| {
            let id = *mailbox.require_id()?;
            let current = cxn
                .prepare_cached("SELECT `acl` FROM `mailbox` WHERE `id` = ?")?
                .query_row((id,), from_single::<String>)
                .optional()?
                .ok_or_else(|| Error::NxMailbox(mailbox.name().to_string()))?;

            let acl = DefaultMailboxAclCodec.decode(&current)?.apply(command);
            cxn.prepare_cached("UPDATE `mailbox` SET `acl` = ? WHERE `id` = ?")?
                .execute((DefaultMailboxAclCodec.encode(&acl), id))?;
            Ok(acl)
        })
    }
}

impl MessageMapper for SqliteMessageMapper {
    type Id = MailboxId;

    fn append(
        &self,
        mailbox: &SqliteMailbox,
        message: MailboxMessage,
    ) -> Result<MessageMetaData, Error> {
        let meta = self.0.write(|cxn| append(cxn, mailbox, &message))?;
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
        mailbox: &SqliteMailbox,
        range: MessageRange,
    ) -> Result<Vec<MailboxMessage>, Error> {
        self.0.read(|cxn| {
            let id = require_mailbox(cxn, mailbox)?;
            messages_in(cxn, id, range)
        })
    }

    fn count_messages(&self, mailbox: &SqliteMailbox) -> Result<u64, Error> {
        self.0.read(|cxn| {
            let id = require_mailbox(cxn, mailbox)?;
            let count = cxn
                .prepare_cached(
                    "SELECT COUNT(*) FROM `message` WHERE `mailbox_id` = ?",
                )?
                .query_row((id,), from_single::<i64>)?;
            Ok(count as u64)
        })
    }

    fn count_unseen(&self, mailbox: &SqliteMailbox) -> Result<u64, Error> {
        self.0.read(|cxn| {
            let id = require_mailbox(cxn, mailbox)?;
            let mut count = 0u64;
            let mut stmt = cxn.prepare_cached(
                "SELECT `flags` FROM `message` WHERE `mailbox_id` = ?",
            )?;
            for flags in stmt.query_map((id,), from_single::<FlagList>)? {
                if !flags?.0.contains(&Flag::Seen) {
                    count += 1;
                }
            }
            Ok(count)
        })
    }

    fn update_flags(
        &self,
        mailbox: &SqliteMailbox,
        range: MessageRange,
        mode: FlagUpdateMode,
        flags: &[Flag],
    ) -> Result<Vec<MailboxMessage>, Error> {
        self.0.write(|cxn| {
            let id = require_mailbox(cxn, mailbox)?;
            let mut changed = Vec::new();
            for mut message in messages_in(cxn, id, range)? {
                if !message.update_flags(mode, flags) {
                    continue;
                }

                message.mod_seq = next_mod_seq(cxn, mailbox)?;
                cxn.prepare_cached(
                    "UPDATE `message` SET `flags` = ?, `mod_seq` = ? \
                     WHERE `mailbox_id` = ? AND `uid` = ?",
                )?
                .execute((
                    FlagList(message.flags.clone()),
                    message.mod_seq,
                    id,
                    message.uid,
                ))?;
                changed.push(message);
            }
            Ok(changed)
        })
    }

    fn expunge(
        &self,
        mailbox: &SqliteMailbox,
        range: MessageRange,
    ) -> Result<Vec<i64>, Error> {
        self.0.write(|cxn| {
            let id = require_mailbox(cxn, mailbox)?;
            let doomed = messages_in(cxn, id, range)?
                .into_iter()
                .filter(MailboxMessage::is_deleted)
                .map(|m| m.uid)
                .collect::<Vec<_>>();

            if !doomed.is_empty() {
                let mut stmt = cxn.prepare_cached(
                    "DELETE FROM `message` WHERE `mailbox_id` = ? AND `uid` = ?",
                )?;
                for &uid in &doomed {
                    stmt.execute((id, uid))?;
                }
                next_mod_seq(cxn, mailbox)?;
            }
            Ok(doomed)
        })
    }

    fn copy(
        &self,
        from: &SqliteMailbox,
        uid: i64,
        to: &SqliteMailbox,
    ) -> Result<MessageMetaData, Error> {
        self.0.write(|cxn| {
            let from_id = require_mailbox(cxn, from)?;
            let message = messages_in(cxn, from_id, MessageRange::One(uid))?
                .into_iter()
                .next()
                .ok_or(Error::NxMessage)?;
            append(cxn, to, &message)
        })
    }

    fn last_uid(&self, mailbox: &SqliteMailbox) -> Result<i64, Error> {
        self.0.read(|cxn| counter(cxn, mailbox, "last_uid"))
    }

    fn highest_mod_seq(&self, mailbox: &SqliteMailbox) -> Result<i64, Error> {
        self.0.read(|cxn| counter(cxn, mailbox, "highest_mod_seq"))
    }
}

impl UidProvider for SqliteUidProvider {
    type Id = MailboxId;

    fn next_uid(&self, mailbox: &SqliteMailbox) -> Result<i64, Error> {
        self.0.write(|cxn| next_uid(cxn, mailbox))
    }

    fn last_uid(&self, mailbox: &SqliteMailbox) -> Result<i64, Error> {
        self.0.read(|cxn| counter(cxn, mailbox, "last_uid"))
    }
}

impl ModSeqProvider for SqliteModSeqProvider {
    type Id = MailboxId;

    fn next_mod_seq(&self, mailbox: &SqliteMailbox) -> Result<i64, Error> {
        self.0.write(|cxn| next_mod_seq(cxn, mailbox))
    }

    fn highest_mod_seq(&self, mailbox: &SqliteMailbox) -> Result<i64, Error> {
        self.0.read(|cxn| counter(cxn, mailbox, "highest_mod_seq"))
    }
}

impl SubscriptionMapper for SqliteSubscriptionMapper {
    fn save(&self, subscription: &Subscription) -> Result<(), Error> {
        let mailbox = self.0.encode(&subscription.mailbox);
        self.0.write(|cxn| {
            cxn.prepare_cached(
                "INSERT OR IGNORE INTO `subscription` (`user`, `mailbox`) \
                 VALUES (?, ?)",
            )?
            .execute((&subscription.user, &mailbox))?;
            Ok(())
        })
    }

    fn delete(&self, subscription: &Subscription) -> Result<(), Error> {
        let mailbox = self.0.encode(&subscription.mailbox);
        self.0.write(|cxn| {
            cxn.prepare_cached(
                "DELETE FROM `subscription` WHERE `user` = ? AND `mailbox` = ?",
            )?
            .execute((&subscription.user, &mailbox))?;
            Ok(())
        })
    }

    fn find_subscriptions_for_user(
        &self,
        user: &str,
    ) -> Result<Vec<Subscription>, Error> {
        let raw = self.0.read(|cxn| {
            cxn.prepare_cached(
                "SELECT `mailbox` FROM `subscription` WHERE `user` = ?",
            )?
            .query_map((user,), from_single::<String>)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into)
        })?;

        let mut subscriptions = raw
            .iter()
            .map(|mb| Ok(Subscription::new(user, self.0.decode(mb)?)))
            .collect::<Result<Vec<_>, Error>>()?;
        subscriptions.sort_by(|a, b| a.mailbox.cmp(&b.mailbox));
        Ok(subscriptions)
    }

    fn find_mailbox_subscription_for_user(
        &self,
        user: &str,
        mailbox: &MailboxName,
    ) -> Result<Subscription, Error> {
        let encoded = self.0.encode(mailbox);
        self.0.read(|cxn| {
            cxn.prepare_cached(
                "SELECT 1 FROM `subscription` WHERE `user` = ? AND `mailbox` = ?",
            )?
            .query_row((user, &encoded), from_single::<i64>)
            .optional()?
            .ok_or(Error::NxSubscription)
        })?;
        Ok(Subscription::new(user, mailbox.clone()))
    }
}
