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

//! Mapping between client-relative and fully-qualified mailbox names.
//!
//! The fully-qualified hierarchy looks like this (with the default root
//! names):
//!
//! ```text
//! users/<user>/...                    domain-less users
//! virtual-users/<domain>/<local>/...  users of a virtual-hosted session
//! groups/<group>/...
//! shared/...                          the public namespace
//! ```
//!
//! A user's root node is their INBOX; there is no separate `INBOX` child.
//!
//! Clients see their own mailboxes relative to their root, with the `INBOX`
//! token naming the root itself. Other namespaces are reached through the
//! `#user`, `#group` and `#shared` tokens.

use std::fmt;

use super::{MailboxName, UnresolvedMailboxName};
use crate::model::MailboxOwner;
use crate::support::error::Error;
use crate::support::system_config::{
    ForeignNamespacePolicy, InboxTokenPolicy, NamingConfig,
};

/// The name of the pseudo-group owning the public namespace.
pub const SHARED_OWNER: &str = "anyone";

/// The user on whose behalf an operation is performed.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ActingUser {
    name: String,
    virtual_hosting: bool,
}

impl ActingUser {
    /// A user in a session without virtual hosting. The name is used
    /// verbatim, even if it contains `@`.
    pub fn new(name: impl Into<String>) -> Self {
        ActingUser {
            name: name.into(),
            virtual_hosting: false,
        }
    }

    /// A user in a virtual-hosted session, e.g. `bob@example.com`.
    pub fn virtual_hosted(name: impl Into<String>) -> Self {
        ActingUser {
            name: name.into(),
            virtual_hosting: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_virtual_hosted(&self) -> bool {
        self.virtual_hosting
    }

    /// Return the `(local, domain)` parts of the name, if this is a
    /// virtual-hosted session and the name is domain-qualified.
    pub fn domain_parts(&self) -> Option<(&str, &str)> {
        if self.virtual_hosting {
            split_domain(&self.name)
        } else {
            None
        }
    }
}

impl fmt::Display for ActingUser {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

fn split_domain(name: &str) -> Option<(&str, &str)> {
    let at = name.rfind('@')?;
    let (local, domain) = (&name[..at], &name[at + 1..]);
    if local.is_empty() || domain.is_empty() {
        None
    } else {
        Some((local, domain))
    }
}

pub trait MailboxNameResolver: Send + Sync {
    /// Turn a client-supplied name into a fully-qualified one.
    fn resolve(
        &self,
        name: &UnresolvedMailboxName,
        user: &ActingUser,
    ) -> Result<MailboxName, Error>;

    /// The inverse of `resolve`, for names `resolve` can produce for `user`.
    ///
    /// Fails with `Unauthorized` for names `user` cannot address.
    fn unresolve(
        &self,
        name: &MailboxName,
        user: &ActingUser,
    ) -> Result<UnresolvedMailboxName, Error>;

    fn get_owner(&self, identifier: &str, is_group: bool) -> MailboxOwner {
        MailboxOwner::new(identifier, is_group)
    }

    /// Return the root (which doubles as the INBOX) of `owner`.
    fn get_inbox(&self, owner: &MailboxOwner) -> MailboxName;

    /// Return the root of the acting user.
    fn user_root(&self, user: &ActingUser) -> Result<MailboxName, Error>;

    /// Whether `name` is a structural node which exists without any backend
    /// storage, such as a namespace root.
    fn exists_trivially(&self, name: &MailboxName) -> bool;

    /// Determine the owner of a fully-qualified name, if it lies under an
    /// owner's root.
    fn owner_of(&self, name: &MailboxName) -> Option<MailboxOwner>;
}

/// The resolver for the hierarchy described in the module docs, driven by
/// `NamingConfig`.
#[derive(Clone, Debug)]
pub struct DefaultMailboxNameResolver {
    config: NamingConfig,
}

impl DefaultMailboxNameResolver {
    pub fn new(config: NamingConfig) -> Self {
        DefaultMailboxNameResolver { config }
    }

    pub fn config(&self) -> &NamingConfig {
        &self.config
    }

    fn is_inbox_token(&self, segment: &str) -> bool {
        segment.eq_ignore_ascii_case(&self.config.inbox)
    }

    fn is_reserved_token(&self, segment: &str) -> bool {
        self.is_inbox_token(segment)
            || segment == self.config.other_users
            || segment == self.config.groups
            || segment == self.config.shared
    }

    /// The root of the named user, treating it as virtual-hosted if it is
    /// domain-qualified and `virtual_hosting` is set.
    fn user_root_for(&self, name: &str, virtual_hosting: bool) -> MailboxName {
        match split_domain(name).filter(|_| virtual_hosting) {
            Some((local, domain)) => MailboxName::rooted(vec![
                self.config.virtual_users_root.as_str(),
                domain,
                local,
            ]),
            None => MailboxName::rooted(vec![
                self.config.users_root.as_str(),
                name,
            ]),
        }
    }

    fn group_root(&self, name: &str) -> MailboxName {
        MailboxName::rooted(vec![self.config.groups_root.as_str(), name])
    }

    fn shared_root(&self) -> MailboxName {
        MailboxName::rooted(vec![self.config.shared_root.as_str()])
    }

    /// Append `rest` to `root`, dropping an optional leading `INBOX`.
    fn under_foreign_root(
        &self,
        root: MailboxName,
        rest: &[String],
    ) -> MailboxName {
        let rest = match rest.first() {
            Some(first) if self.is_inbox_token(first) => &rest[1..],
            _ => rest,
        };

        let mut name = root;
        for segment in rest {
            name = name.child(segment.as_str());
        }
        name
    }

    /// Split a fully-qualified name into the owner it belongs to, the
    /// namespace token that reaches it, and the remaining segments.
    ///
    /// Returns `None` for anything not under an owner's root.
    fn split_owner<'a>(
        &self,
        name: &'a MailboxName,
    ) -> Option<(MailboxOwner, Vec<String>, &'a [String])> {
        if !name.has_root() {
            return None;
        }

        let segments = name.segments();
        let first = segments.first()?;
        let config = &self.config;

        if *first == config.users_root && segments.len() >= 2 {
            Some((
                MailboxOwner::new(segments[1].as_str(), false),
                vec![config.other_users.clone(), segments[1].clone()],
                &segments[2..],
            ))
        } else if *first == config.virtual_users_root && segments.len() >= 3 {
            let qualified = format!("{}@{}", segments[2], segments[1]);
            Some((
                MailboxOwner::virtual_user(qualified.as_str()),
                vec![config.other_users.clone(), qualified],
                &segments[3..],
            ))
        } else if *first == config.groups_root && segments.len() >= 2 {
            Some((
                MailboxOwner::new(segments[1].as_str(), true),
                vec![config.groups.clone(), segments[1].clone()],
                &segments[2..],
            ))
        } else if *first == config.shared_root {
            Some((
                MailboxOwner::new(SHARED_OWNER, true),
                vec![config.shared.clone()],
                &segments[1..],
            ))
        } else {
            None
        }
    }
}

impl MailboxNameResolver for DefaultMailboxNameResolver {
    fn resolve(
        &self,
        name: &UnresolvedMailboxName,
        user: &ActingUser,
    ) -> Result<MailboxName, Error> {
        let segments = name.segments();
        let first = match segments.first() {
            Some(first) => first.as_str(),
            None => return self.user_root(user),
        };
        let rest = &segments[1..];
        let config = &self.config;

        if self.is_inbox_token(first) {
            let mut resolved = self.user_root(user)?;
            for segment in rest {
                resolved = resolved.child(segment.as_str());
            }
            Ok(resolved)
        } else if first == config.other_users {
            match rest.split_first() {
                None => Ok(MailboxName::rooted(vec![config
                    .users_root
                    .as_str()])),
                Some((other, rest)) => Ok(self.under_foreign_root(
                    self.user_root_for(other, user.is_virtual_hosted()),
                    rest,
                )),
            }
        } else if first == config.groups {
            match rest.split_first() {
                None => Ok(MailboxName::rooted(vec![config
                    .groups_root
                    .as_str()])),
                Some((group, rest)) => {
                    Ok(self.under_foreign_root(self.group_root(group), rest))
                }
            }
        } else if first == config.shared {
            let mut resolved = self.shared_root();
            for segment in rest {
                resolved = resolved.child(segment.as_str());
            }
            Ok(resolved)
        } else {
            let mut resolved = self.user_root(user)?;
            for segment in segments {
                resolved = resolved.child(segment.as_str());
            }
            Ok(resolved)
        }
    }

    fn unresolve(
        &self,
        name: &MailboxName,
        user: &ActingUser,
    ) -> Result<UnresolvedMailboxName, Error> {
        let own_root = self.user_root(user)?;
        if let Some(rest) = name.strip_prefix(&own_root) {
            // A child whose name collides with a token needs the explicit
            // INBOX prefix to resolve back to the same place.
            let keep_inbox = rest
                .first()
                .map_or(true, |first| self.is_reserved_token(first));

            let mut unresolved = if keep_inbox {
                UnresolvedMailboxName::new(vec![self.config.inbox.as_str()])
            } else {
                UnresolvedMailboxName::EMPTY
            };
            for segment in rest {
                unresolved = unresolved.child(segment.as_str());
            }
            return Ok(unresolved);
        }

        let unauthorized = || Error::Unauthorized {
            user: user.name().to_owned(),
            path: name.to_string(),
        };

        if ForeignNamespacePolicy::Deny == self.config.foreign_namespace {
            return Err(unauthorized());
        }

        if name.has_root() && 1 == name.len() {
            let only = name.segments()[0].as_str();
            if only == self.config.users_root {
                return Ok(UnresolvedMailboxName::new(vec![self
                    .config
                    .other_users
                    .as_str()]));
            } else if only == self.config.groups_root {
                return Ok(UnresolvedMailboxName::new(vec![self
                    .config
                    .groups
                    .as_str()]));
            }
        }

        let (owner, prefix, rest) =
            self.split_owner(name).ok_or_else(unauthorized)?;

        let mut unresolved = UnresolvedMailboxName::new(prefix);
        if !(owner.is_group() && SHARED_OWNER == owner.name()) {
            let keep_inbox = match rest.first() {
                _ if InboxTokenPolicy::Keep
                    == self.config.shared_inbox_token =>
                {
                    true
                }
                Some(first) => self.is_inbox_token(first),
                None => false,
            };
            if keep_inbox {
                unresolved = unresolved.child(self.config.inbox.as_str());
            }
        }

        for segment in rest {
            unresolved = unresolved.child(segment.as_str());
        }

        // Domain-qualified users live under a different root depending on
        // whether the session is virtual-hosted, so some names cannot be
        // reached at all from this session.
        if self.resolve(&unresolved, user)? != *name {
            return Err(unauthorized());
        }
        Ok(unresolved)
    }

    fn get_inbox(&self, owner: &MailboxOwner) -> MailboxName {
        if owner.is_group() {
            if SHARED_OWNER == owner.name() {
                self.shared_root()
            } else {
                self.group_root(owner.name())
            }
        } else {
            self.user_root_for(owner.name(), owner.is_virtual_hosted())
        }
    }

    fn user_root(&self, user: &ActingUser) -> Result<MailboxName, Error> {
        if user.name().is_empty() {
            return Err(Error::BadNameEncoding("empty user name".to_owned()));
        }

        Ok(self.user_root_for(user.name(), user.is_virtual_hosted()))
    }

    fn exists_trivially(&self, name: &MailboxName) -> bool {
        if !name.has_root() {
            return false;
        }

        let config = &self.config;
        match name.segments() {
            [] => true,
            [only] => {
                *only == config.users_root
                    || *only == config.virtual_users_root
                    || *only == config.groups_root
                    || *only == config.shared_root
            }
            [first, _] => *first == config.virtual_users_root,
            _ => false,
        }
    }

    fn owner_of(&self, name: &MailboxName) -> Option<MailboxOwner> {
        self.split_owner(name).map(|(owner, _, _)| owner)
    }
}
