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

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("No such mailbox: {0}")]
    NxMailbox(String),
    #[error("No such subscription")]
    NxSubscription,
    #[error("No such message")]
    NxMessage,
    #[error("Mailbox already exists: {0}")]
    MailboxExists(String),
    #[error("Unrecognised ACL right: {0:?}")]
    InvalidRight(char),
    #[error("ACL key given more than once: {0}")]
    DuplicateAclKey(String),
    #[error("Malformed ACL entry: {0}")]
    BadAclLine(String),
    #[error("Malformed mailbox name encoding: {0}")]
    BadNameEncoding(String),
    #[error("Unusable hierarchy delimiter: {0:?}")]
    BadDelimiter(char),
    #[error("Cannot rename {0} into its own subtree")]
    RenameIntoSelf(String),
    #[error("{user} may not access {path}")]
    Unauthorized { user: String, path: String },
    #[error("Unsafe mailbox name")]
    UnsafeName,
    #[error("Storage is corrupt: {0}")]
    CorruptStorage(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),
    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),
}

/// The coarse classification of an `Error`.
///
/// Protocol layers generally only need to know which of these a failure is to
/// pick a response code; the specific variant is there for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidRight,
    EncodingError,
    BackendUnavailable,
    Unauthorized,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match *self {
            Error::NxMailbox(_) | Error::NxSubscription | Error::NxMessage => {
                ErrorKind::NotFound
            }
            Error::MailboxExists(_) => ErrorKind::AlreadyExists,
            Error::InvalidRight(_)
            | Error::DuplicateAclKey(_)
            | Error::BadAclLine(_) => ErrorKind::InvalidRight,
            Error::BadNameEncoding(_)
            | Error::BadDelimiter(_)
            | Error::UnsafeName => ErrorKind::EncodingError,
            Error::Unauthorized { .. } | Error::RenameIntoSelf(_) => {
                ErrorKind::Unauthorized
            }
            Error::CorruptStorage(_)
            | Error::Io(_)
            | Error::Sqlite(_)
            | Error::TomlDe(_)
            | Error::TomlSer(_) => ErrorKind::BackendUnavailable,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!(
            ErrorKind::NotFound,
            Error::NxMailbox("users/foo".to_owned()).kind()
        );
        assert_eq!(
            ErrorKind::AlreadyExists,
            Error::MailboxExists("users/foo".to_owned()).kind()
        );
        assert_eq!(ErrorKind::InvalidRight, Error::InvalidRight('z').kind());
        assert_eq!(
            ErrorKind::EncodingError,
            Error::BadNameEncoding("&AAA".to_owned()).kind()
        );
        assert_eq!(
            ErrorKind::BackendUnavailable,
            Error::Io(io::Error::new(io::ErrorKind::Other, "gone")).kind()
        );
        assert_eq!(
            ErrorKind::Unauthorized,
            Error::Unauthorized {
                user: "alice".to_owned(),
                path: "users/bob".to_owned(),
            }
            .kind()
        );
    }

    #[test]
    fn exists_error_keeps_name() {
        assert_eq!(
            "Mailbox already exists: users/foo/Procter & Gamble",
            Error::MailboxExists("users/foo/Procter & Gamble".to_owned())
                .to_string()
        );
    }
}
