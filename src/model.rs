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

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::prelude::*;
use rand::{rngs::OsRng, Rng};
use serde::{Deserialize, Serialize};

use crate::acl::MailboxAcl;
use crate::name::MailboxName;
use crate::support::error::Error;
use crate::support::system_config::UidValidityKind;

/// The principal a mailbox belongs to.
///
/// A user owner remembers whether it is a virtual-hosted user, since the same
/// domain-qualified name denotes a different root depending on that.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MailboxOwner {
    name: String,
    is_group: bool,
    virtual_hosted: bool,
}

impl MailboxOwner {
    pub fn new(name: impl Into<String>, is_group: bool) -> Self {
        MailboxOwner {
            name: name.into(),
            is_group,
            virtual_hosted: false,
        }
    }

    /// A user of a virtual-hosted session, e.g. `bob@example.org`.
    pub fn virtual_user(name: impl Into<String>) -> Self {
        MailboxOwner {
            name: name.into(),
            is_group: false,
            virtual_hosted: true,
        }
    }

    /// Rebuild an owner from its persisted parts.
    pub fn restore(
        name: impl Into<String>,
        is_group: bool,
        virtual_hosted: bool,
    ) -> Self {
        MailboxOwner {
            name: name.into(),
            is_group,
            virtual_hosted: virtual_hosted && !is_group,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_group(&self) -> bool {
        self.is_group
    }

    pub fn is_virtual_hosted(&self) -> bool {
        self.virtual_hosted
    }
}

impl fmt::Display for MailboxOwner {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_group {
            write!(f, "${}", self.name)
        } else {
            write!(f, "{}", self.name)
        }
    }
}

/// A mailbox as persisted by a `MailboxMapper`.
///
/// `Id` is the backend's own identifier type. It is absent until the mailbox
/// is first saved and never changes after that.
///
/// `last_uid` and `highest_mod_seq` can only be advanced by the backend (via
/// its `UidProvider` and `ModSeqProvider`); values obtained from a mapper are
/// snapshots.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mailbox<Id> {
    id: Option<Id>,
    name: MailboxName,
    owner: MailboxOwner,
    uid_validity: i64,
    last_uid: i64,
    highest_mod_seq: i64,
    acl: MailboxAcl,
}

impl<Id: Clone> Mailbox<Id> {
    /// Create a new, not yet saved, mailbox.
    pub fn new(
        name: MailboxName,
        owner: MailboxOwner,
        uid_validity: i64,
    ) -> Self {
        Mailbox {
            id: None,
            name,
            owner,
            uid_validity,
            last_uid: 0,
            highest_mod_seq: 0,
            acl: MailboxAcl::EMPTY,
        }
    }

    /// Reconstitute a saved mailbox from storage.
    pub(crate) fn restore(
        id: Id,
        name: MailboxName,
        owner: MailboxOwner,
        uid_validity: i64,
        last_uid: i64,
        highest_mod_seq: i64,
        acl: MailboxAcl,
    ) -> Self {
        Mailbox {
            id: Some(id),
            name,
            owner,
            uid_validity,
            last_uid,
            highest_mod_seq,
            acl,
        }
    }

    pub fn id(&self) -> Option<&Id> {
        self.id.as_ref()
    }

    /// Return the id of this mailbox, or `NxMailbox` if it was never saved.
    pub fn require_id(&self) -> Result<&Id, Error> {
        self.id
            .as_ref()
            .ok_or_else(|| Error::NxMailbox(self.name.to_string()))
    }

    pub fn name(&self) -> &MailboxName {
        &self.name
    }

    pub fn owner(&self) -> &MailboxOwner {
        &self.owner
    }

    pub fn uid_validity(&self) -> i64 {
        self.uid_validity
    }

    pub fn last_uid(&self) -> i64 {
        self.last_uid
    }

    pub fn highest_mod_seq(&self) -> i64 {
        self.highest_mod_seq
    }

    pub fn acl(&self) -> &MailboxAcl {
        &self.acl
    }

    /// Change the name. Takes effect on the next save.
    pub fn set_name(&mut self, name: MailboxName) {
        self.name = name;
    }

    /// Replace the ACL. Takes effect on the next save.
    pub fn set_acl(&mut self, acl: MailboxAcl) {
        self.acl = acl;
    }

    pub(crate) fn set_id(&mut self, id: Id) {
        self.id = Some(id);
    }

    pub(crate) fn observe_last_uid(&mut self, uid: i64) {
        self.last_uid = self.last_uid.max(uid);
    }

    pub(crate) fn observe_mod_seq(&mut self, mod_seq: i64) {
        self.highest_mod_seq = self.highest_mod_seq.max(mod_seq);
    }
}

/// The identifiers assigned to a message by an append or copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageMetaData {
    pub uid: i64,
    pub mod_seq: i64,
    pub size: i64,
}

/// A message as seen by a `MessageMapper`. Bodies are not stored here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxMessage {
    pub uid: i64,
    pub mod_seq: i64,
    pub size: i64,
    pub internal_date: DateTime<Utc>,
    #[serde(default)]
    pub flags: Vec<Flag>,
}

impl MailboxMessage {
    /// A message about to be appended. The UID and modseq are assigned by
    /// the mapper.
    pub fn new(
        size: i64,
        internal_date: DateTime<Utc>,
        flags: Vec<Flag>,
    ) -> Self {
        let mut message = MailboxMessage {
            uid: 0,
            mod_seq: 0,
            size,
            internal_date,
            flags: Vec::new(),
        };
        for flag in flags {
            message.add_flag(flag);
        }
        message
    }

    pub fn has_flag(&self, flag: &Flag) -> bool {
        self.flags.contains(flag)
    }

    pub fn is_seen(&self) -> bool {
        self.has_flag(&Flag::Seen)
    }

    pub fn is_deleted(&self) -> bool {
        self.has_flag(&Flag::Deleted)
    }

    /// Returns whether the flag was newly added.
    pub fn add_flag(&mut self, flag: Flag) -> bool {
        if self.has_flag(&flag) {
            false
        } else {
            self.flags.push(flag);
            true
        }
    }

    /// Returns whether the flag was present.
    pub fn remove_flag(&mut self, flag: &Flag) -> bool {
        let before = self.flags.len();
        self.flags.retain(|f| f != flag);
        before != self.flags.len()
    }

    /// Apply a STORE-style flag change, returning whether anything changed.
    pub fn update_flags(
        &mut self,
        mode: FlagUpdateMode,
        flags: &[Flag],
    ) -> bool {
        match mode {
            FlagUpdateMode::Add => flags
                .iter()
                .fold(false, |changed, f| self.add_flag(f.clone()) || changed),
            FlagUpdateMode::Remove => flags
                .iter()
                .fold(false, |changed, f| self.remove_flag(f) || changed),
            FlagUpdateMode::Replace => {
                let mut desired = Vec::<Flag>::with_capacity(flags.len());
                for flag in flags {
                    if !desired.contains(flag) {
                        desired.push(flag.clone());
                    }
                }

                let same = desired.len() == self.flags.len()
                    && desired.iter().all(|f| self.has_flag(f));
                if !same {
                    self.flags = desired;
                }
                !same
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlagUpdateMode {
    Add,
    Remove,
    Replace,
}

/// A message flag.
#[derive(Clone, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Flag {
    Answered,
    Deleted,
    Draft,
    Flagged,
    Seen,
    Keyword(String),
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            &Flag::Answered => write!(f, "\\Answered"),
            &Flag::Deleted => write!(f, "\\Deleted"),
            &Flag::Draft => write!(f, "\\Draft"),
            &Flag::Flagged => write!(f, "\\Flagged"),
            &Flag::Seen => write!(f, "\\Seen"),
            &Flag::Keyword(ref kw) => write!(f, "{}", kw),
        }
    }
}

impl fmt::Debug for Flag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        <Flag as fmt::Display>::fmt(self, f)
    }
}

impl FromStr for Flag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        if s.eq_ignore_ascii_case("\\answered") {
            Ok(Flag::Answered)
        } else if s.eq_ignore_ascii_case("\\deleted") {
            Ok(Flag::Deleted)
        } else if s.eq_ignore_ascii_case("\\draft") {
            Ok(Flag::Draft)
        } else if s.eq_ignore_ascii_case("\\flagged") {
            Ok(Flag::Flagged)
        } else if s.eq_ignore_ascii_case("\\seen") {
            Ok(Flag::Seen)
        } else if !s.is_empty()
            && !s.starts_with('\\')
            && s.as_bytes().iter().copied().all(is_atom_char)
        {
            Ok(Flag::Keyword(s.to_owned()))
        } else {
            Err(Error::UnsafeName)
        }
    }
}

impl From<Flag> for String {
    fn from(flag: Flag) -> String {
        flag.to_string()
    }
}

impl TryFrom<String> for Flag {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Error> {
        s.parse()
    }
}

fn is_atom_char(ch: u8) -> bool {
    match ch {
        0..=b' ' => false,
        127..=255 => false,
        b'(' | b')' | b'{' | b'*' | b'%' | b'\\' | b'"' | b']' => false,
        _ => true,
    }
}

impl PartialEq for Flag {
    fn eq(&self, other: &Flag) -> bool {
        match (self, other) {
            (&Flag::Answered, &Flag::Answered) => true,
            (&Flag::Deleted, &Flag::Deleted) => true,
            (&Flag::Draft, &Flag::Draft) => true,
            (&Flag::Flagged, &Flag::Flagged) => true,
            (&Flag::Seen, &Flag::Seen) => true,
            // Keywords are compared ASCII-case-insensitively, as clients
            // expect.
            (&Flag::Keyword(ref a), &Flag::Keyword(ref b)) => {
                a.eq_ignore_ascii_case(b)
            }
            _ => false,
        }
    }
}

impl Eq for Flag {}

/// A selection of messages by UID.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageRange {
    One(i64),
    /// Every message with a UID greater than or equal to this one.
    From(i64),
    /// Every message with a UID in this inclusive range. The ends may be
    /// given in either order.
    Range(i64, i64),
    All,
}

impl MessageRange {
    pub fn contains(&self, uid: i64) -> bool {
        match *self {
            MessageRange::One(one) => uid == one,
            MessageRange::From(lo) => uid >= lo,
            MessageRange::Range(a, b) => uid >= a.min(b) && uid <= a.max(b),
            MessageRange::All => true,
        }
    }

    /// Return the inclusive bounds of this range, lowest first.
    pub fn bounds(&self) -> (i64, i64) {
        match *self {
            MessageRange::One(one) => (one, one),
            MessageRange::From(lo) => (lo, i64::MAX),
            MessageRange::Range(a, b) => (a.min(b), a.max(b)),
            MessageRange::All => (i64::MIN, i64::MAX),
        }
    }
}

/// A user's subscription to a mailbox name.
///
/// The mailbox need not exist.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Subscription {
    pub user: String,
    pub mailbox: MailboxName,
}

impl Subscription {
    pub fn new(user: impl Into<String>, mailbox: MailboxName) -> Self {
        Subscription {
            user: user.into(),
            mailbox,
        }
    }
}

/// Produces the UID validity of newly-created mailboxes.
///
/// Values are always in `1..=i32::MAX` so they fit IMAP's 32-bit field
/// regardless of how the client treats its sign.
pub trait UidValiditySource: Send + Sync {
    fn next_uid_validity(&self) -> i64;
}

impl UidValidityKind {
    pub fn source(self) -> Box<dyn UidValiditySource> {
        match self {
            UidValidityKind::Random => Box::new(RandomUidValidity),
            UidValidityKind::Clock => Box::new(ClockUidValidity::default()),
        }
    }
}

/// Draws UID validity values from the OS RNG.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomUidValidity;

impl UidValiditySource for RandomUidValidity {
    fn next_uid_validity(&self) -> i64 {
        i64::from((OsRng.gen::<u32>() & 0x7FFF_FFFF).max(1))
    }
}

/// Derives UID validity values from the clock.
///
/// This is the number of seconds since 2020-01-01, modulo 2**31. Within one
/// source, values strictly increase even if several mailboxes are created in
/// the same second.
#[derive(Debug, Default)]
pub struct ClockUidValidity {
    last: AtomicI64,
}

/// 2020-01-01T00:00:00Z
const CLOCK_EPOCH: i64 = 1577836800;

impl UidValiditySource for ClockUidValidity {
    fn next_uid_validity(&self) -> i64 {
        let now = ((Utc::now().timestamp() - CLOCK_EPOCH) & 0x7FFF_FFFF).max(1);

        let mut last = self.last.load(Ordering::SeqCst);
        loop {
            let next = if now > last {
                now
            } else if last >= i64::from(i32::MAX) {
                1
            } else {
                last + 1
            };

            match self.last.compare_exchange(
                last,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }
}

/// Always returns the same value. Intended for tests.
#[derive(Clone, Copy, Debug)]
pub struct FixedUidValidity(pub i64);

impl UidValiditySource for FixedUidValidity {
    fn next_uid_validity(&self) -> i64 {
        self.0
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use rayon::prelude::*;

    use super::*;

    #[test]
    fn flag_parsing() {
        assert_eq!(Flag::Seen, "\\SEEN".parse().unwrap());
        assert_eq!(
            Flag::Keyword("$Forwarded".to_owned()),
            "$forwarded".parse().unwrap()
        );
        assert_matches!(Err(Error::UnsafeName), "\\Recent".parse::<Flag>());
        assert_matches!(Err(Error::UnsafeName), "two words".parse::<Flag>());
        assert_matches!(Err(Error::UnsafeName), "".parse::<Flag>());
    }

    #[test]
    fn flag_updates() {
        let mut message =
            MailboxMessage::new(42, Utc::now(), vec![Flag::Seen, Flag::Seen]);
        assert_eq!(vec![Flag::Seen], message.flags);

        assert!(!message.update_flags(FlagUpdateMode::Add, &[Flag::Seen]));
        assert!(message.update_flags(
            FlagUpdateMode::Add,
            &[Flag::Seen, Flag::Deleted]
        ));
        assert!(message.is_deleted());
        assert!(message.update_flags(FlagUpdateMode::Remove, &[Flag::Seen]));
        assert!(!message.is_seen());
        assert!(!message.update_flags(FlagUpdateMode::Remove, &[Flag::Seen]));
        assert!(!message.update_flags(FlagUpdateMode::Replace, &[Flag::Deleted]));
        assert!(message.update_flags(FlagUpdateMode::Replace, &[Flag::Draft]));
        assert_eq!(vec![Flag::Draft], message.flags);
    }

    #[test]
    fn message_ranges() {
        assert!(MessageRange::One(3).contains(3));
        assert!(!MessageRange::One(3).contains(4));
        assert!(MessageRange::From(3).contains(300));
        assert!(!MessageRange::From(3).contains(2));
        assert!(MessageRange::Range(2, 4).contains(4));
        assert!(!MessageRange::Range(2, 4).contains(5));
        assert!(MessageRange::Range(4, 2).contains(3));
        assert_eq!((2, 4), MessageRange::Range(4, 2).bounds());
        assert!(MessageRange::All.contains(1));
    }

    #[test]
    fn counters_never_move_backwards() {
        let mut mailbox = Mailbox::<u64>::new(
            MailboxName::rooted(vec!["users", "bob"]),
            MailboxOwner::new("bob", false),
            1,
        );
        mailbox.observe_last_uid(5);
        mailbox.observe_last_uid(3);
        mailbox.observe_mod_seq(9);
        mailbox.observe_mod_seq(2);
        assert_eq!(5, mailbox.last_uid());
        assert_eq!(9, mailbox.highest_mod_seq());
        assert_matches!(Err(Error::NxMailbox(_)), mailbox.require_id());
    }

    #[test]
    fn uid_validity_in_range() {
        let random = RandomUidValidity;
        for _ in 0..1000 {
            let v = random.next_uid_validity();
            assert!(v >= 1 && v <= i64::from(i32::MAX));
        }
    }

    #[test]
    fn clock_uid_validity_is_unique() {
        let clock = ClockUidValidity::default();
        let values = (0..1000)
            .into_par_iter()
            .map(|_| clock.next_uid_validity())
            .collect::<Vec<_>>();

        let unique = values.iter().copied().collect::<HashSet<_>>();
        assert_eq!(values.len(), unique.len());
        assert!(values.iter().all(|&v| v >= 1 && v <= i64::from(i32::MAX)));
    }
}
