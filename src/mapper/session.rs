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

use std::sync::atomic::{AtomicU64, Ordering};

use crate::name::resolver::ActingUser;
use crate::support::log_prefix::LogPrefix;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// One client's use of the store.
///
/// Mappers are created per session and never shared between sessions.
#[derive(Clone, Debug)]
pub struct MailboxSession {
    id: u64,
    user: ActingUser,
    log_prefix: LogPrefix,
}

impl MailboxSession {
    /// Start a new session for `user`. `backend` names the storage backend
    /// in log messages.
    pub fn new(user: ActingUser, backend: &str) -> Self {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let log_prefix = LogPrefix::new(backend.to_owned());
        log_prefix.set_user(user.name().to_owned());
        log_prefix.set_session(id);

        MailboxSession {
            id,
            user,
            log_prefix,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn user(&self) -> &ActingUser {
        &self.user
    }

    pub fn log_prefix(&self) -> &LogPrefix {
        &self.log_prefix
    }
}
