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

use regex::Regex;

use super::MailboxName;

/// Matches any sequence of characters, including the hierarchy delimiter.
pub const FREE_WILDCARD: char = '*';
/// Matches any sequence of characters within a single level.
pub const LOCAL_WILDCARD: char = '%';

/// Separator placed between segments when matching.
///
/// Segments are joined with NUL rather than the real delimiter so that a
/// segment which happens to contain the delimiter character is still one
/// level as far as `%` is concerned.
const SEP: char = '\0';
const SEP_RX: &str = "\\x00";

/// A wildcard search for mailboxes beneath a base name.
///
/// The expression is written relative to the base, using `delimiter` to
/// separate levels, `*` to match anything and `%` to match anything within one
/// level, as in the IMAP `LIST` command. The match is anchored at both ends.
///
/// A non-empty expression only ever matches strict descendants of the base,
/// so `*` under `a` matches `a/b` and `a/b/c` but not `a` itself. The empty
/// expression matches exactly the base.
///
/// Backends typically cannot evaluate this natively, or can only approximate
/// it (SQL `LIKE` has its own metacharacters, for example). They instead
/// pre-filter on `fixed_prefix()` and every candidate is then checked with
/// `is_expression_match()`.
#[derive(Clone)]
pub struct MailboxQuery {
    base: MailboxName,
    expression: String,
    delimiter: char,
    matcher: Regex,
}

impl MailboxQuery {
    pub fn new(
        base: MailboxName,
        expression: impl Into<String>,
        delimiter: char,
    ) -> Self {
        let expression = expression.into();

        let mut rx = "^".to_owned();
        for (ix, segment) in base.segments().iter().enumerate() {
            if ix > 0 {
                rx.push_str(SEP_RX);
            }
            rx.push_str(&regex::escape(segment));
        }

        if !expression.is_empty() {
            if !base.is_empty() {
                rx.push_str(SEP_RX);
            }

            let mut literal = String::new();
            for ch in expression.chars() {
                let special = match ch {
                    FREE_WILDCARD => "(?s:.*)",
                    LOCAL_WILDCARD => "[^\\x00]*",
                    c if c == delimiter => SEP_RX,
                    c => {
                        literal.push(c);
                        continue;
                    }
                };

                rx.push_str(&regex::escape(&literal));
                literal.clear();
                rx.push_str(special);
            }
            rx.push_str(&regex::escape(&literal));
        }
        rx.push('$');

        let matcher = Regex::new(&rx).expect("Built invalid regex?");
        MailboxQuery {
            base,
            expression,
            delimiter,
            matcher,
        }
    }

    /// A query matching every descendant of `base`.
    pub fn all_children(base: MailboxName, delimiter: char) -> Self {
        Self::new(base, FREE_WILDCARD.to_string(), delimiter)
    }

    pub fn base(&self) -> &MailboxName {
        &self.base
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    /// Whether the expression contains any wildcards.
    pub fn is_wild(&self) -> bool {
        self.expression
            .contains(|c| FREE_WILDCARD == c || LOCAL_WILDCARD == c)
    }

    /// Return the longest name which every match is guaranteed to start
    /// with: the base plus all leading wildcard-free levels of the
    /// expression.
    pub fn fixed_prefix(&self) -> MailboxName {
        let mut prefix = self.base.clone();
        if self.expression.is_empty() {
            return prefix;
        }

        for level in self.expression.split(self.delimiter) {
            if level.contains(|c| FREE_WILDCARD == c || LOCAL_WILDCARD == c) {
                break;
            }
            prefix = prefix.child(level);
        }
        prefix
    }

    /// Whether `candidate` matches this query.
    pub fn is_expression_match(&self, candidate: &MailboxName) -> bool {
        if candidate.has_root() != self.base.has_root() {
            return false;
        }

        let mut haystack = String::new();
        for (ix, segment) in candidate.segments().iter().enumerate() {
            if ix > 0 {
                haystack.push(SEP);
            }
            haystack.push_str(segment);
        }

        self.matcher.is_match(&haystack)
    }
}

impl fmt::Debug for MailboxQuery {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MailboxQuery")
            .field("base", &self.base)
            .field("expression", &self.expression)
            .field("delimiter", &self.delimiter)
            .finish()
    }
}
