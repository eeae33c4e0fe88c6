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

//! Conversion between mailbox names and the strings backends store.
//!
//! The storage format is a delimiter-joined sequence of encoded segments. An
//! absolute name starts with the delimiter. Encoded segments never contain the
//! delimiter, so decoding can simply split on it.
//!
//! This format is persisted as-is, so it must never change in a way that
//! alters how existing strings decode.

use std::borrow::Cow;

use super::utf7::SegmentUtf7;
use super::{MailboxName, UnresolvedMailboxName};
use crate::support::error::Error;
use crate::support::system_config::NamingConfig;

pub trait MailboxNameCodec: Send + Sync {
    /// The hierarchy delimiter between encoded segments.
    fn delimiter(&self) -> char;

    /// Encode a single segment. The result must not contain the delimiter.
    fn encode_segment<'a>(&self, segment: &'a str) -> Cow<'a, str>;

    /// Reverse `encode_segment`.
    fn decode_segment<'a>(&self, segment: &'a str)
        -> Result<Cow<'a, str>, Error>;

    fn encode(&self, name: &MailboxName) -> String {
        let mut encoded = String::new();
        if name.has_root() {
            encoded.push(self.delimiter());
        }
        join_segments(self, &mut encoded, name.segments());
        encoded
    }

    fn encode_unresolved(&self, name: &UnresolvedMailboxName) -> String {
        let mut encoded = String::new();
        join_segments(self, &mut encoded, name.segments());
        encoded
    }

    /// Decode a stored name.
    ///
    /// `expect_root` indicates whether `s` is expected to be an absolute name.
    /// A mismatch between that and the presence of the leading delimiter is an
    /// error, as are empty segments.
    fn decode(&self, s: &str, expect_root: bool) -> Result<MailboxName, Error> {
        if s.is_empty() {
            return Ok(MailboxName::new(expect_root, Vec::<String>::new()));
        }

        let delimiter = self.delimiter();
        let body = match (expect_root, s.strip_prefix(delimiter)) {
            (true, Some(body)) => body,
            (false, None) => s,
            (true, None) => {
                return Err(Error::BadNameEncoding(format!(
                    "expected absolute name, got {:?}",
                    s
                )))
            }
            (false, Some(_)) => {
                return Err(Error::BadNameEncoding(format!(
                    "expected relative name, got {:?}",
                    s
                )))
            }
        };

        if body.is_empty() {
            return Ok(MailboxName::new(expect_root, Vec::<String>::new()));
        }

        let segments = body
            .split(delimiter)
            .map(|segment| {
                if segment.is_empty() {
                    Err(Error::BadNameEncoding(format!(
                        "empty segment in {:?}",
                        s
                    )))
                } else {
                    self.decode_segment(segment).map(Cow::into_owned)
                }
            })
            .collect::<Result<Vec<_>, Error>>()?;
        Ok(MailboxName::new(expect_root, segments))
    }

    /// Decode a stored unresolved name.
    ///
    /// The empty string decodes to `UnresolvedMailboxName::EMPTY`.
    fn decode_unresolved(
        &self,
        s: &str,
    ) -> Result<UnresolvedMailboxName, Error> {
        if s.is_empty() {
            return Ok(UnresolvedMailboxName::EMPTY);
        }

        let name = self.decode(s, false)?;
        Ok(UnresolvedMailboxName::new(name.segments().iter().cloned()))
    }
}

fn join_segments<C: MailboxNameCodec + ?Sized>(
    codec: &C,
    dst: &mut String,
    segments: &[String],
) {
    for (ix, segment) in segments.iter().enumerate() {
        if ix > 0 {
            dst.push(codec.delimiter());
        }
        dst.push_str(&codec.encode_segment(segment));
    }
}

/// The default codec: IMAP modified UTF-7 per segment.
///
/// This is "optimistic" in that decoding accepts raw 8-bit characters and
/// needlessly-shifted ASCII, though encoding never produces either.
#[derive(Clone, Copy, Debug)]
pub struct Utf7NameCodec {
    delimiter: char,
    utf7: SegmentUtf7,
}

impl Utf7NameCodec {
    /// Create a codec using `delimiter` between segments.
    ///
    /// The delimiter must be printable ASCII punctuation which cannot occur
    /// inside a shift sequence, i.e. anything but `& - + ,`.
    pub fn new(delimiter: char) -> Result<Self, Error> {
        if !delimiter.is_ascii_punctuation() || "&-+,".contains(delimiter) {
            return Err(Error::BadDelimiter(delimiter));
        }

        Ok(Utf7NameCodec {
            delimiter,
            utf7: SegmentUtf7::new(delimiter as u8),
        })
    }

    pub fn from_config(config: &NamingConfig) -> Result<Self, Error> {
        Self::new(config.delimiter)
    }
}

impl MailboxNameCodec for Utf7NameCodec {
    fn delimiter(&self) -> char {
        self.delimiter
    }

    fn encode_segment<'a>(&self, segment: &'a str) -> Cow<'a, str> {
        self.utf7.encode(segment)
    }

    fn decode_segment<'a>(
        &self,
        segment: &'a str,
    ) -> Result<Cow<'a, str>, Error> {
        self.utf7.decode(segment)
    }
}
