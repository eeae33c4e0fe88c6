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

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::support::error::Error;

/// The configuration for a Pigeonhole store.
///
/// This is normally stored in a file named `pigeonhole.toml` next to the
/// storage itself. Every field has a default, so an empty file yields an
/// in-memory store with `.` as the hierarchy delimiter.
#[derive(Clone, Debug, Deserialize, Serialize, Default)]
pub struct StoreConfig {
    /// How mailbox names are written and how user-relative names map onto
    /// the shared hierarchy.
    #[serde(default)]
    pub naming: NamingConfig,

    /// Which bundled backend to use, and where it keeps its data.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Where UID validity values for new mailboxes come from.
    #[serde(default)]
    pub uid_validity: UidValidityConfig,
}

impl StoreConfig {
    /// Load the configuration from the TOML file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let data = fs::read_to_string(path)?;
        Self::from_toml(&data)
    }

    pub fn from_toml(data: &str) -> Result<Self, Error> {
        Ok(toml::from_str(data)?)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct NamingConfig {
    /// The hierarchy delimiter used in encoded names.
    ///
    /// This must be printable ASCII punctuation other than `&`, `-`, `+` and
    /// `,`.
    pub delimiter: char,

    /// The token naming the acting user's own root. Matched
    /// case-insensitively.
    pub inbox: String,
    /// The token introducing another user's mailboxes, e.g. `#user/bob/Work`.
    pub other_users: String,
    /// The token introducing a group's mailboxes, e.g. `#group/sales/Leads`.
    pub groups: String,
    /// The token introducing the public namespace, e.g. `#shared/News`.
    pub shared: String,

    /// First segment of every domain-less user's mailboxes.
    pub users_root: String,
    /// First segment of every domain-qualified user's mailboxes, which are
    /// then keyed by domain and local part.
    pub virtual_users_root: String,
    /// First segment of every group's mailboxes.
    pub groups_root: String,
    /// First segment of the public namespace.
    pub shared_root: String,

    /// What to do when relativising a path outside the acting user's own
    /// namespace.
    pub foreign_namespace: ForeignNamespacePolicy,

    /// Whether relativising a path inside another principal's root keeps an
    /// `INBOX` token after the owner, e.g. `#user/bob/INBOX/Work` rather than
    /// `#user/bob/Work`.
    ///
    /// The acting user's own paths never keep the token.
    pub shared_inbox_token: InboxTokenPolicy,
}

impl Default for NamingConfig {
    fn default() -> Self {
        NamingConfig {
            delimiter: '.',
            inbox: "INBOX".to_owned(),
            other_users: "#user".to_owned(),
            groups: "#group".to_owned(),
            shared: "#shared".to_owned(),
            users_root: "users".to_owned(),
            virtual_users_root: "virtual-users".to_owned(),
            groups_root: "groups".to_owned(),
            shared_root: "shared".to_owned(),
            foreign_namespace: ForeignNamespacePolicy::Prefixed,
            shared_inbox_token: InboxTokenPolicy::Drop,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ForeignNamespacePolicy {
    /// Return the path under its namespace token, leaving authorisation to
    /// the ACL layer.
    Prefixed,
    /// Fail with `Error::Unauthorized`.
    Deny,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InboxTokenPolicy {
    Drop,
    Keep,
}

#[derive(Clone, Debug, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// For `sqlite`, the database file. For `maildir`, the root directory.
    /// Ignored for `memory`.
    pub path: PathBuf,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Sqlite,
    Maildir,
}

impl Default for BackendKind {
    fn default() -> Self {
        BackendKind::Memory
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct UidValidityConfig {
    pub source: UidValidityKind,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UidValidityKind {
    Random,
    Clock,
}

impl Default for UidValidityKind {
    fn default() -> Self {
        UidValidityKind::Random
    }
}
