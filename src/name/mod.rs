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

//! Mailbox names, in both of the forms they take.
//!
//! A `MailboxName` is a path in the single hierarchy shared by every user of a
//! store, e.g. `users/bob/Work`. This is what backends store and what the
//! mappers look things up by.
//!
//! An `UnresolvedMailboxName` is a path as a client sees it, e.g.
//! `INBOX/Work`. It says nothing about whose mailbox it is; the
//! `MailboxNameResolver` supplies that by combining it with the acting user.
//!
//! Neither type knows anything about hierarchy delimiters. Turning either into
//! a string is the job of a `MailboxNameCodec`.

pub mod codec;
pub mod query;
pub mod resolver;
mod utf7;

use std::fmt;

/// A fully-qualified mailbox path.
///
/// Segments are never empty; constructors silently drop empty segments the
/// same way `INBOX//foo` is treated as `INBOX/foo`.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MailboxName {
    has_root: bool,
    segments: Vec<String>,
}

impl MailboxName {
    /// Construct an absolute name, i.e. one that starts at the root of the
    /// store.
    pub fn rooted<S: Into<String>>(
        segments: impl IntoIterator<Item = S>,
    ) -> Self {
        Self::new(true, segments)
    }

    /// Construct a relative name.
    pub fn relative<S: Into<String>>(
        segments: impl IntoIterator<Item = S>,
    ) -> Self {
        Self::new(false, segments)
    }

    pub fn new<S: Into<String>>(
        has_root: bool,
        segments: impl IntoIterator<Item = S>,
    ) -> Self {
        MailboxName {
            has_root,
            segments: segments
                .into_iter()
                .map(Into::into)
                .filter(|s: &String| !s.is_empty())
                .collect(),
        }
    }

    pub fn has_root(&self) -> bool {
        self.has_root
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Return the name of the mailbox containing this one.
    ///
    /// Single-segment and empty names have no parent.
    pub fn parent(&self) -> Option<Self> {
        if self.segments.len() < 2 {
            None
        } else {
            Some(MailboxName {
                has_root: self.has_root,
                segments: self.segments[..self.segments.len() - 1].to_vec(),
            })
        }
    }

    /// Return the name of the child of this mailbox called `segment`.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut child = self.clone();
        let segment = segment.into();
        if !segment.is_empty() {
            child.segments.push(segment);
        }
        child
    }

    /// Whether `self` is `prefix` or lies beneath it.
    pub fn starts_with(&self, prefix: &MailboxName) -> bool {
        self.has_root == prefix.has_root
            && self.segments.len() >= prefix.segments.len()
            && self.segments[..prefix.segments.len()] == prefix.segments[..]
    }

    /// Whether `self` lies strictly beneath `ancestor`.
    pub fn is_descendant_of(&self, ancestor: &MailboxName) -> bool {
        self.segments.len() > ancestor.segments.len()
            && self.starts_with(ancestor)
    }

    /// If `self` starts with `prefix`, return the segments after it.
    pub fn strip_prefix(&self, prefix: &MailboxName) -> Option<&[String]> {
        if self.starts_with(prefix) {
            Some(&self.segments[prefix.segments.len()..])
        } else {
            None
        }
    }

    /// Return the name which results from replacing the `from` prefix of this
    /// name with `to`.
    ///
    /// Returns `None` if this name does not start with `from`.
    pub fn rebase(&self, from: &MailboxName, to: &MailboxName) -> Option<Self> {
        let rest = self.strip_prefix(from)?;
        let mut rebased = to.clone();
        rebased.segments.extend(rest.iter().cloned());
        Some(rebased)
    }
}

/// Names are displayed with `/` separators for diagnostics. This is not the
/// storage format; see `MailboxNameCodec` for that.
impl fmt::Display for MailboxName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.has_root {
            write!(f, "/")?;
        }
        write!(f, "{}", self.segments.join("/"))
    }
}

/// A mailbox path as typed by a client.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnresolvedMailboxName {
    segments: Vec<String>,
}

impl UnresolvedMailboxName {
    /// The distinguished "no path" value.
    pub const EMPTY: Self = UnresolvedMailboxName {
        segments: Vec::new(),
    };

    pub fn new<S: Into<String>>(segments: impl IntoIterator<Item = S>) -> Self {
        UnresolvedMailboxName {
            segments: segments
                .into_iter()
                .map(Into::into)
                .filter(|s: &String| !s.is_empty())
                .collect(),
        }
    }

    /// Split a raw, already-decoded client path on `delimiter`.
    ///
    /// Empty segments (leading, trailing or doubled delimiters) are ignored.
    pub fn parse(path: &str, delimiter: char) -> Self {
        Self::new(path.split(delimiter))
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn first(&self) -> Option<&str> {
        self.segments.first().map(String::as_str)
    }

    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut child = self.clone();
        let segment = segment.into();
        if !segment.is_empty() {
            child.segments.push(segment);
        }
        child
    }

    pub fn parent(&self) -> Option<Self> {
        if self.segments.len() < 2 {
            None
        } else {
            Some(UnresolvedMailboxName {
                segments: self.segments[..self.segments.len() - 1].to_vec(),
            })
        }
    }
}

impl fmt::Display for UnresolvedMailboxName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}
