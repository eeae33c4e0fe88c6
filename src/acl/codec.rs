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

//! The persisted text form of an ACL.
//!
//! This is a subset of the usual properties-file format, one `key=rights`
//! entry per line. Reading accepts the things people write by hand in such
//! files: comments starting with `#` or `!`, blank lines, `:` instead of `=`,
//! whitespace around the separator, backslash escapes and continuation lines.
//! Writing always produces one entry per line, sorted by key.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use super::{MailboxAcl, MailboxAclEntryKey, MailboxAclRights};
use crate::support::error::Error;

pub trait MailboxAclCodec: Send + Sync {
    fn encode(&self, acl: &MailboxAcl) -> String;
    fn decode(&self, s: &str) -> Result<MailboxAcl, Error>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultMailboxAclCodec;

impl MailboxAclCodec for DefaultMailboxAclCodec {
    fn encode(&self, acl: &MailboxAcl) -> String {
        let mut sorted = acl
            .entries()
            .map(|(key, rights)| (key.to_string(), rights))
            .collect::<Vec<_>>();
        sorted.sort();

        let mut out = String::new();
        for (key, rights) in sorted {
            escape_key(&mut out, &key);
            let _ = writeln!(out, "={}", rights);
        }
        out
    }

    fn decode(&self, s: &str) -> Result<MailboxAcl, Error> {
        let mut entries =
            BTreeMap::<MailboxAclEntryKey, MailboxAclRights>::new();
        let mut seen = Vec::<MailboxAclEntryKey>::new();

        for line in logical_lines(s) {
            let (raw_key, raw_value) = split_entry(&line);
            let key = unescape(raw_key, &line)?;
            let value = unescape(raw_value, &line)?;

            let key = key.parse::<MailboxAclEntryKey>()?;
            let rights = value.trim().parse::<MailboxAclRights>()?;

            if seen.contains(&key) {
                return Err(Error::DuplicateAclKey(key.to_string()));
            }
            seen.push(key.clone());

            if !rights.is_empty() {
                entries.insert(key, rights);
            }
        }

        Ok(MailboxAcl::from_entries(entries))
    }
}

/// Split `s` into logical lines, joining continuations and dropping blank
/// lines and comments.
fn logical_lines(s: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current: Option<String> = None;

    for physical in s.lines() {
        let trimmed = physical.trim_start();
        let text = match current.take() {
            Some(mut pending) => {
                pending.push_str(trimmed);
                pending
            }
            None => {
                if trimmed.is_empty()
                    || trimmed.starts_with('#')
                    || trimmed.starts_with('!')
                {
                    continue;
                }
                trimmed.to_owned()
            }
        };

        let trailing_backslashes =
            text.chars().rev().take_while(|&c| '\\' == c).count();
        if 1 == trailing_backslashes % 2 {
            let mut text = text;
            text.pop();
            current = Some(text);
        } else {
            lines.push(text);
        }
    }

    if let Some(pending) = current {
        lines.push(pending);
    }

    lines
}

/// Split a logical line into its raw (still escaped) key and value.
fn split_entry(line: &str) -> (&str, &str) {
    let mut escaped = false;
    let mut key_end = line.len();
    for (ix, ch) in line.char_indices() {
        if escaped {
            escaped = false;
        } else if '\\' == ch {
            escaped = true;
        } else if '=' == ch || ':' == ch || ch.is_whitespace() {
            key_end = ix;
            break;
        }
    }

    let key = &line[..key_end];
    let rest = line[key_end..].trim_start();
    let rest = rest
        .strip_prefix('=')
        .or_else(|| rest.strip_prefix(':'))
        .unwrap_or(rest)
        .trim_start();
    (key, rest)
}

fn unescape(s: &str, line: &str) -> Result<String, Error> {
    let bad = || Error::BadAclLine(line.to_owned());

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    let mut pending_high: Option<u16> = None;

    while let Some(ch) = chars.next() {
        if '\\' != ch {
            if pending_high.is_some() {
                return Err(bad());
            }
            out.push(ch);
            continue;
        }

        let escaped = chars.next().ok_or_else(bad)?;
        if 'u' != escaped {
            if pending_high.is_some() {
                return Err(bad());
            }
            out.push(match escaped {
                't' => '\t',
                'n' => '\n',
                'r' => '\r',
                'f' => '\x0C',
                other => other,
            });
            continue;
        }

        let hex = chars.by_ref().take(4).collect::<String>();
        if 4 != hex.len() {
            return Err(bad());
        }
        let unit = u16::from_str_radix(&hex, 16).map_err(|_| bad())?;

        match (pending_high.take(), unit) {
            (None, 0xD800..=0xDBFF) => pending_high = Some(unit),
            (Some(high), 0xDC00..=0xDFFF) => {
                let decoded = String::from_utf16(&[high, unit])
                    .map_err(|_| bad())?;
                out.push_str(&decoded);
            }
            (None, _) => {
                out.push(char::from_u32(unit.into()).ok_or_else(bad)?)
            }
            (Some(_), _) => return Err(bad()),
        }
    }

    if pending_high.is_some() {
        return Err(bad());
    }

    Ok(out)
}

fn escape_key(dst: &mut String, key: &str) {
    for ch in key.chars() {
        match ch {
            '\\' | '=' | ':' | '#' | '!' | ' ' => {
                dst.push('\\');
                dst.push(ch);
            }
            '\t' => dst.push_str("\\t"),
            '\n' => dst.push_str("\\n"),
            '\r' => dst.push_str("\\r"),
            '\x0C' => dst.push_str("\\f"),
            c if c.is_control() || c.is_whitespace() => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    let _ = write!(dst, "\\u{:04X}", unit);
                }
            }
            c => dst.push(c),
        }
    }
}
