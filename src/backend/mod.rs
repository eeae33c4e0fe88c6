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

//! The bundled implementations of the mapper contract.

pub mod maildir;
pub mod memory;
pub mod sqlite;

#[cfg(test)]
pub(crate) mod conformance;

use std::sync::Arc;

use crate::mapper::MailboxSessionMapperFactory;
use crate::name::codec::{MailboxNameCodec, Utf7NameCodec};
use crate::support::error::Error;
use crate::support::system_config::{BackendKind, StoreConfig};

use self::maildir::MaildirMapperFactory;
use self::memory::MemoryMapperFactory;
use self::sqlite::SqliteMapperFactory;

/// One of the bundled backends, as chosen by configuration.
pub enum Backend {
    Memory(MemoryMapperFactory),
    Sqlite(SqliteMapperFactory),
    Maildir(MaildirMapperFactory),
}

#[cfg(test)]
impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Backend::Memory(_) => f.write_str("Backend::Memory(..)"),
            Backend::Sqlite(_) => f.write_str("Backend::Sqlite(..)"),
            Backend::Maildir(_) => f.write_str("Backend::Maildir(..)"),
        }
    }
}

/// Something to do with whichever factory a `Backend` holds.
///
/// The factories have different id types, so code that works with any of
/// them is written generically and dispatched through this.
pub trait BackendVisitor {
    type Output;

    fn visit<F: MailboxSessionMapperFactory>(self, factory: F) -> Self::Output;
}

impl Backend {
    /// Open the backend `config` describes.
    pub fn open(config: &StoreConfig) -> Result<Self, Error> {
        let codec: Arc<dyn MailboxNameCodec> =
            Arc::new(Utf7NameCodec::from_config(&config.naming)?);

        Ok(match config.backend.kind {
            BackendKind::Memory => Backend::Memory(MemoryMapperFactory::new()),
            BackendKind::Sqlite => Backend::Sqlite(SqliteMapperFactory::open(
                &config.backend.path,
                codec,
            )?),
            BackendKind::Maildir => Backend::Maildir(
                MaildirMapperFactory::open(&config.backend.path, codec)?,
            ),
        })
    }

    pub fn name(&self) -> &'static str {
        match *self {
            Backend::Memory(ref f) => f.backend_name(),
            Backend::Sqlite(ref f) => f.backend_name(),
            Backend::Maildir(ref f) => f.backend_name(),
        }
    }

    pub fn visit<V: BackendVisitor>(self, visitor: V) -> V::Output {
        match self {
            Backend::Memory(f) => visitor.visit(f),
            Backend::Sqlite(f) => visitor.visit(f),
            Backend::Maildir(f) => visitor.visit(f),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mapper::{MailboxMapper, MailboxSession};
    use crate::model::{Mailbox, MailboxOwner};
    use crate::name::resolver::ActingUser;
    use crate::name::MailboxName;

    struct CreateAndCount;

    impl BackendVisitor for CreateAndCount {
        type Output = usize;

        fn visit<F: MailboxSessionMapperFactory>(self, factory: F) -> usize {
            let session = MailboxSession::new(
                ActingUser::new("alice"),
                factory.backend_name(),
            );
            let mapper = factory.create_mailbox_mapper(&session).unwrap();
            let mut mailbox = Mailbox::new(
                MailboxName::rooted(["users", "alice"]),
                MailboxOwner::new("alice", false),
                1,
            );
            mapper.save(&mut mailbox).unwrap();
            mapper.list().unwrap().len()
        }
    }

    #[test]
    fn open_each_kind() {
        let root = tempfile::TempDir::new().unwrap();

        for (kind, path, name) in [
            (BackendKind::Memory, root.path().join("unused"), "memory"),
            (BackendKind::Sqlite, root.path().join("store.sqlite"), "sqlite"),
            (BackendKind::Maildir, root.path().join("maildir"), "maildir"),
        ] {
            let mut config = StoreConfig::default();
            config.backend.kind = kind;
            config.backend.path = path;

            let backend = Backend::open(&config).unwrap();
            assert_eq!(name, backend.name());
            assert_eq!(1, backend.visit(CreateAndCount));
        }
    }

    #[test]
    fn bad_delimiter_is_rejected() {
        let mut config = StoreConfig::default();
        config.naming.delimiter = '&';
        assert_matches!(Err(Error::BadDelimiter('&')), Backend::open(&config));
    }
}
