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

//! Mailbox access control lists, per RFC 4314.
//!
//! A `MailboxAcl` is an immutable map from entry keys to rights. Keys name a
//! principal (a user, a group, or one of the special principals) and are
//! either positive (granting rights) or negative (revoking them). Which rights
//! a user actually holds depends on every applicable entry; see
//! `resolver::MailboxAclResolver`.

pub mod codec;
pub mod resolver;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;

use crate::support::error::Error;

bitflags! {
    /// A set of RFC 4314 rights.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct MailboxAclRights: u16 {
        /// `l`: the mailbox is visible to LIST.
        const LOOKUP = 1 << 0;
        /// `r`: SELECT, STATUS, FETCH, SEARCH, COPY from.
        const READ = 1 << 1;
        /// `s`: keep the `\Seen` flag across sessions.
        const WRITE_SEEN = 1 << 2;
        /// `w`: write flags other than `\Seen` and `\Deleted`.
        const WRITE = 1 << 3;
        /// `i`: APPEND and COPY into.
        const INSERT = 1 << 4;
        /// `p`: send mail to the submission address of the mailbox.
        const POST = 1 << 5;
        /// `k`: create children.
        const CREATE_MAILBOX = 1 << 6;
        /// `x`: delete or rename the mailbox.
        const DELETE_MAILBOX = 1 << 7;
        /// `t`: set or clear `\Deleted`.
        const DELETE_MESSAGES = 1 << 8;
        /// `e`: EXPUNGE.
        const EXPUNGE = 1 << 9;
        /// `a`: administer, i.e. change the ACL.
        const ADMINISTER = 1 << 10;
    }
}

/// Each right with its character, in canonical order.
const RIGHT_CHARS: [(char, MailboxAclRights); 11] = [
    ('l', MailboxAclRights::LOOKUP),
    ('r', MailboxAclRights::READ),
    ('s', MailboxAclRights::WRITE_SEEN),
    ('w', MailboxAclRights::WRITE),
    ('i', MailboxAclRights::INSERT),
    ('p', MailboxAclRights::POST),
    ('k', MailboxAclRights::CREATE_MAILBOX),
    ('x', MailboxAclRights::DELETE_MAILBOX),
    ('t', MailboxAclRights::DELETE_MESSAGES),
    ('e', MailboxAclRights::EXPUNGE),
    ('a', MailboxAclRights::ADMINISTER),
];

impl MailboxAclRights {
    /// Parse a single right character.
    ///
    /// The obsolete RFC 2086 rights `c` and `d` are accepted and expanded to
    /// their RFC 4314 equivalents.
    pub fn from_char(ch: char) -> Result<Self, Error> {
        match ch {
            'c' => Ok(MailboxAclRights::CREATE_MAILBOX),
            'd' => Ok(MailboxAclRights::DELETE_MAILBOX
                | MailboxAclRights::DELETE_MESSAGES
                | MailboxAclRights::EXPUNGE),
            _ => RIGHT_CHARS
                .iter()
                .find(|&&(c, _)| c == ch)
                .map(|&(_, right)| right)
                .ok_or(Error::InvalidRight(ch)),
        }
    }

    /// Whether these rights allow modifying the mailbox contents in any way.
    pub fn is_read_write(self) -> bool {
        self.intersects(
            MailboxAclRights::WRITE
                | MailboxAclRights::WRITE_SEEN
                | MailboxAclRights::DELETE_MESSAGES
                | MailboxAclRights::EXPUNGE
                | MailboxAclRights::INSERT,
        )
    }
}

impl fmt::Display for MailboxAclRights {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for &(ch, right) in &RIGHT_CHARS {
            if self.contains(right) {
                write!(f, "{}", ch)?;
            }
        }
        Ok(())
    }
}

impl FromStr for MailboxAclRights {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        s.chars().try_fold(MailboxAclRights::empty(), |accum, ch| {
            Ok(accum | MailboxAclRights::from_char(ch)?)
        })
    }
}

/// The principal an ACL entry applies to.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AclPrincipal {
    /// The owner of the mailbox, or any member of the owning group.
    Owner,
    /// Everyone, including anonymous users.
    Anyone,
    /// Every authenticated user.
    Authenticated,
    User(String),
    Group(String),
}

const OWNER_NAME: &str = "owner";
const ANYONE_NAME: &str = "anyone";
const AUTHENTICATED_NAME: &str = "authenticated";
const NEGATIVE_MARK: char = '-';
const GROUP_MARK: char = '$';
const LITERAL_MARK: char = '\\';

/// The key of an ACL entry.
///
/// In text form, this is `[-][$]name`, where `-` marks a negative entry and
/// `$` marks a group. The names `owner`, `anyone` and `authenticated` denote
/// the special principals. A user whose name would otherwise be read as one
/// of these forms, such as `-bob` or `owner`, is written with a leading `\`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MailboxAclEntryKey {
    principal: AclPrincipal,
    negative: bool,
}

impl MailboxAclEntryKey {
    pub fn new(principal: AclPrincipal, negative: bool) -> Self {
        MailboxAclEntryKey {
            principal,
            negative,
        }
    }

    pub fn user(name: impl Into<String>) -> Self {
        Self::new(AclPrincipal::User(name.into()), false)
    }

    pub fn group(name: impl Into<String>) -> Self {
        Self::new(AclPrincipal::Group(name.into()), false)
    }

    pub fn owner() -> Self {
        Self::new(AclPrincipal::Owner, false)
    }

    pub fn anyone() -> Self {
        Self::new(AclPrincipal::Anyone, false)
    }

    pub fn authenticated() -> Self {
        Self::new(AclPrincipal::Authenticated, false)
    }

    /// Return the negative form of this key.
    pub fn negate(self) -> Self {
        MailboxAclEntryKey {
            negative: true,
            ..self
        }
    }

    pub fn principal(&self) -> &AclPrincipal {
        &self.principal
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }
}

impl fmt::Display for MailboxAclEntryKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.negative {
            write!(f, "{}", NEGATIVE_MARK)?;
        }

        match self.principal {
            AclPrincipal::Owner => write!(f, "{}", OWNER_NAME),
            AclPrincipal::Anyone => write!(f, "{}", ANYONE_NAME),
            AclPrincipal::Authenticated => {
                write!(f, "{}", AUTHENTICATED_NAME)
            }
            AclPrincipal::User(ref name) if needs_literal_mark(name) => {
                write!(f, "{}{}", LITERAL_MARK, name)
            }
            AclPrincipal::User(ref name) => write!(f, "{}", name),
            AclPrincipal::Group(ref name) => {
                write!(f, "{}{}", GROUP_MARK, name)
            }
        }
    }
}

impl FromStr for MailboxAclEntryKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let (negative, rest) = match s.strip_prefix(NEGATIVE_MARK) {
            Some(rest) => (true, rest),
            None => (false, s),
        };

        let principal = if let Some(group) = rest.strip_prefix(GROUP_MARK) {
            AclPrincipal::Group(group.to_owned())
        } else if let Some(user) = rest.strip_prefix(LITERAL_MARK) {
            AclPrincipal::User(user.to_owned())
        } else if OWNER_NAME == rest {
            AclPrincipal::Owner
        } else if ANYONE_NAME == rest {
            AclPrincipal::Anyone
        } else if AUTHENTICATED_NAME == rest {
            AclPrincipal::Authenticated
        } else {
            AclPrincipal::User(rest.to_owned())
        };

        match principal {
            AclPrincipal::User(ref name) | AclPrincipal::Group(ref name)
                if name.is_empty() =>
            {
                Err(Error::BadAclLine(s.to_owned()))
            }
            _ => Ok(MailboxAclEntryKey {
                principal,
                negative,
            }),
        }
    }
}

/// Whether the user `name` must be written with `LITERAL_MARK` to not be
/// mistaken for another kind of key.
fn needs_literal_mark(name: &str) -> bool {
    name.starts_with(|c: char| {
        NEGATIVE_MARK == c || GROUP_MARK == c || LITERAL_MARK == c
    }) || [OWNER_NAME, ANYONE_NAME, AUTHENTICATED_NAME].contains(&name)
}

/// How a `MailboxAclCommand` changes the rights of its key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditMode {
    Add,
    Remove,
    Replace,
}

/// An edit to one entry of an ACL, as made by SETACL and DELETEACL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MailboxAclCommand {
    pub key: MailboxAclEntryKey,
    pub mode: EditMode,
    pub rights: MailboxAclRights,
}

impl MailboxAclCommand {
    pub fn new(
        key: MailboxAclEntryKey,
        mode: EditMode,
        rights: MailboxAclRights,
    ) -> Self {
        MailboxAclCommand { key, mode, rights }
    }

    /// Parse the SETACL form of a rights string, where a leading `+` means
    /// `Add`, a leading `-` means `Remove`, and anything else `Replace`.
    pub fn parse(key: MailboxAclEntryKey, rights: &str) -> Result<Self, Error> {
        let (mode, rights) = if let Some(rest) = rights.strip_prefix('+') {
            (EditMode::Add, rest)
        } else if let Some(rest) = rights.strip_prefix('-') {
            (EditMode::Remove, rest)
        } else {
            (EditMode::Replace, rights)
        };

        Ok(MailboxAclCommand {
            key,
            mode,
            rights: rights.parse()?,
        })
    }
}

/// An immutable access control list.
///
/// Entries with no rights are never stored, so an ACL whose every entry was
/// removed equals `EMPTY`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MailboxAcl {
    entries: BTreeMap<MailboxAclEntryKey, MailboxAclRights>,
}

impl MailboxAcl {
    pub const EMPTY: MailboxAcl = MailboxAcl {
        entries: BTreeMap::new(),
    };

    /// Build an ACL from the given entries. Later duplicates of a key replace
    /// earlier ones.
    pub fn from_entries(
        entries: impl IntoIterator<
            Item = (MailboxAclEntryKey, MailboxAclRights),
        >,
    ) -> Self {
        MailboxAcl {
            entries: entries
                .into_iter()
                .filter(|&(_, rights)| !rights.is_empty())
                .collect(),
        }
    }

    /// Return a copy of this ACL with the entry for `key` set to `rights`.
    pub fn with(
        &self,
        key: MailboxAclEntryKey,
        rights: MailboxAclRights,
    ) -> Self {
        let mut entries = self.entries.clone();
        if rights.is_empty() {
            entries.remove(&key);
        } else {
            entries.insert(key, rights);
        }
        MailboxAcl { entries }
    }

    pub fn get(&self, key: &MailboxAclEntryKey) -> MailboxAclRights {
        self.entries.get(key).copied().unwrap_or_default()
    }

    pub fn entries(
        &self,
    ) -> impl Iterator<Item = (&MailboxAclEntryKey, MailboxAclRights)> + '_ {
        self.entries.iter().map(|(k, &v)| (k, v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return the ACL holding, for every key, the rights in either `self` or
    /// `other`.
    pub fn union(&self, other: &MailboxAcl) -> Self {
        let mut entries = self.entries.clone();
        for (key, &rights) in &other.entries {
            *entries.entry(key.clone()).or_default() |= rights;
        }
        MailboxAcl { entries }
    }

    /// Return the ACL holding, for every key, the rights in `self` that are
    /// not in `other`.
    pub fn except(&self, other: &MailboxAcl) -> Self {
        Self::from_entries(
            self.entries
                .iter()
                .map(|(key, &rights)| (key.clone(), rights - other.get(key))),
        )
    }

    /// Return the result of applying `command` to this ACL.
    pub fn apply(&self, command: &MailboxAclCommand) -> Self {
        let current = self.get(&command.key);
        let rights = match command.mode {
            EditMode::Add => current | command.rights,
            EditMode::Remove => current - command.rights,
            EditMode::Replace => command.rights,
        };
        self.with(command.key.clone(), rights)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn rights(s: &str) -> MailboxAclRights {
        s.parse().unwrap()
    }

    #[test]
    fn rights_parse_and_display() {
        assert_eq!(MailboxAclRights::all(), rights("lrswipkxtea"));
        assert_eq!("lrswipkxtea", MailboxAclRights::all().to_string());
        assert_eq!("lr", rights("rl").to_string());
        assert_eq!("kxte", rights("cd").to_string());
        assert_eq!("", MailboxAclRights::empty().to_string());
        assert_matches!(Err(Error::InvalidRight('z')), "lrz".parse::<MailboxAclRights>());
    }

    #[test]
    fn read_write_rights() {
        assert!(!rights("lr").is_read_write());
        assert!(!rights("lrkxa").is_read_write());
        for ch in "wstei".chars() {
            assert!(rights(&ch.to_string()).is_read_write(), "{}", ch);
        }
    }

    #[test]
    fn keys_parse_and_display() {
        for (text, key) in vec![
            ("bob", MailboxAclEntryKey::user("bob")),
            ("-bob", MailboxAclEntryKey::user("bob").negate()),
            ("$sales", MailboxAclEntryKey::group("sales")),
            ("-$sales", MailboxAclEntryKey::group("sales").negate()),
            ("owner", MailboxAclEntryKey::owner()),
            ("anyone", MailboxAclEntryKey::anyone()),
            ("-authenticated", MailboxAclEntryKey::authenticated().negate()),
            ("$owner", MailboxAclEntryKey::group("owner")),
            ("\\owner", MailboxAclEntryKey::user("owner")),
            ("-\\anyone", MailboxAclEntryKey::user("anyone").negate()),
            ("\\-bob", MailboxAclEntryKey::user("-bob")),
            ("-\\$sales", MailboxAclEntryKey::user("$sales").negate()),
            ("\\\\bob", MailboxAclEntryKey::user("\\bob")),
            ("bob\\", MailboxAclEntryKey::user("bob\\")),
            ("$-sales", MailboxAclEntryKey::group("-sales")),
        ] {
            assert_eq!(key, text.parse().unwrap());
            assert_eq!(text, key.to_string());
        }

        assert_matches!(Err(Error::BadAclLine(_)), "-".parse::<MailboxAclEntryKey>());
        assert_matches!(Err(Error::BadAclLine(_)), "$".parse::<MailboxAclEntryKey>());
        assert_matches!(
            Err(Error::BadAclLine(_)),
            "-\\".parse::<MailboxAclEntryKey>()
        );
    }

    #[test]
    fn union_and_except() {
        let a = MailboxAcl::from_entries(vec![
            (MailboxAclEntryKey::user("bob"), rights("lr")),
            (MailboxAclEntryKey::anyone(), rights("l")),
        ]);
        let b = MailboxAcl::from_entries(vec![
            (MailboxAclEntryKey::user("bob"), rights("rsw")),
            (MailboxAclEntryKey::user("alice"), rights("a")),
        ]);

        let union = a.union(&b);
        assert_eq!(rights("lrsw"), union.get(&MailboxAclEntryKey::user("bob")));
        assert_eq!(rights("a"), union.get(&MailboxAclEntryKey::user("alice")));
        assert_eq!(rights("l"), union.get(&MailboxAclEntryKey::anyone()));

        let except = a.except(&b);
        assert_eq!(rights("l"), except.get(&MailboxAclEntryKey::user("bob")));
        assert_eq!(2, except.len());

        assert_eq!(MailboxAcl::EMPTY, a.except(&a));
        assert_eq!(a, a.union(&MailboxAcl::EMPTY));
    }

    #[test]
    fn apply_commands() {
        let bob = MailboxAclEntryKey::user("bob");
        let acl = MailboxAcl::EMPTY.apply(&MailboxAclCommand::new(
            bob.clone(),
            EditMode::Add,
            rights("lr"),
        ));
        assert_eq!(rights("lr"), acl.get(&bob));

        let acl = acl.apply(
            &MailboxAclCommand::parse(bob.clone(), "+sw").unwrap(),
        );
        assert_eq!(rights("lrsw"), acl.get(&bob));

        let acl =
            acl.apply(&MailboxAclCommand::parse(bob.clone(), "-r").unwrap());
        assert_eq!(rights("lsw"), acl.get(&bob));

        let acl =
            acl.apply(&MailboxAclCommand::parse(bob.clone(), "a").unwrap());
        assert_eq!(rights("a"), acl.get(&bob));

        let acl = acl.apply(&MailboxAclCommand::new(
            bob,
            EditMode::Remove,
            MailboxAclRights::all(),
        ));
        assert_eq!(MailboxAcl::EMPTY, acl);
    }
}
