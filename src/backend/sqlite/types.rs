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

//! Bindings for our model types to `rusqlite`, plus the raw row types of the
//! store database.

use chrono::prelude::*;
use rusqlite::types::{
    FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef,
};

use crate::model::{Flag, MailboxMessage};

macro_rules! transparent_to_sql {
    ($t:ident) => {
        impl ToSql for $t {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                self.0.to_sql()
            }
        }
    };
}

macro_rules! transparent_from_sql {
    ($t:ident) => {
        impl FromSql for $t {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                FromSql::column_result(value).map(Self)
            }
        }
    };
}

/// The row id of a mailbox.
///
/// Ids are never reused, even after the mailbox is deleted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MailboxId(pub i64);
transparent_to_sql!(MailboxId);
transparent_from_sql!(MailboxId);

/// A point in time, stored as milliseconds since the UNIX epoch.
///
/// Anything finer than a millisecond is dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct UnixTimestamp(pub DateTime<Utc>);

impl UnixTimestamp {
    pub fn now() -> Self {
        Self(Utc::now())
    }
}

impl ToSql for UnixTimestamp {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0.timestamp_millis()))
    }
}

impl FromSql for UnixTimestamp {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let inner = i64::column_result(value)?;
        Utc.timestamp_millis_opt(inner)
            .single()
            .ok_or(FromSqlError::OutOfRange(inner))
            .map(Self)
    }
}

/// The flags of a message, stored as one space-separated text value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlagList(pub Vec<Flag>);

impl ToSql for FlagList {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let joined = self
            .0
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        Ok(ToSqlOutput::from(joined))
    }
}

impl FromSql for FlagList {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        text.split(' ')
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<Flag>())
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// A `mailbox` row before the name and ACL are decoded.
#[derive(Debug, Clone)]
pub struct RawMailbox {
    pub id: MailboxId,
    pub name: String,
    pub owner: String,
    pub owner_is_group: bool,
    pub owner_is_virtual: bool,
    pub uid_validity: i64,
    pub last_uid: i64,
    pub highest_mod_seq: i64,
    pub acl: String,
}

impl FromRow for RawMailbox {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            owner: row.get("owner")?,
            owner_is_group: row.get("owner_is_group")?,
            owner_is_virtual: row.get("owner_is_virtual")?,
            uid_validity: row.get("uid_validity")?,
            last_uid: row.get("last_uid")?,
            highest_mod_seq: row.get("highest_mod_seq")?,
            acl: row.get("acl")?,
        })
    }
}

impl FromRow for MailboxMessage {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            uid: row.get("uid")?,
            mod_seq: row.get("mod_seq")?,
            size: row.get("size")?,
            internal_date: row.get::<_, UnixTimestamp>("internal_date")?.0,
            flags: row.get::<_, FlagList>("flags")?.0,
        })
    }
}

pub fn from_row<T: FromRow>(row: &rusqlite::Row<'_>) -> rusqlite::Result<T> {
    T::from_row(row)
}

pub fn from_single<T: FromSql>(row: &rusqlite::Row<'_>) -> rusqlite::Result<T> {
    row.get(0)
}

pub trait FromRow: Sized {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self>;
}
