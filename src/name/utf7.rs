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

use std::borrow::Cow;

use crate::support::error::Error;

const SHIFT_IN: u8 = b'&';
const SHIFT_IN_ESCAPED: &str = "&-";
const SHIFT_OUT: u8 = b'-';

/// IMAP's "modified UTF-7" (RFC 3501), applied to a single name segment.
///
/// The only difference from the IMAP flavour is that the hierarchy delimiter
/// is also an indirect character, so that an encoded segment never contains
/// the delimiter and splitting an encoded name is trivial.
#[derive(Clone, Copy, Debug)]
pub struct SegmentUtf7 {
    delimiter: u8,
}

impl SegmentUtf7 {
    pub fn new(delimiter: u8) -> Self {
        SegmentUtf7 { delimiter }
    }

    /// Decode the given segment from modified UTF-7.
    ///
    /// Unlike decoding for display, this is strict about the parts that
    /// matter for round-tripping stored names: every shift sequence must be
    /// terminated by `-` and must contain valid base-64 encoding whole UTF-16
    /// code units forming valid code points.
    ///
    /// It is permissive ("optimistic") about the rest: 8-bit characters are
    /// passed through, and direct characters which were needlessly encoded
    /// are accepted.
    pub fn decode<'a>(&self, s: &'a str) -> Result<Cow<'a, str>, Error> {
        if !s.as_bytes().contains(&SHIFT_IN) {
            return Ok(Cow::Borrowed(s));
        }

        let bytes = s.as_bytes();
        let mut transformed = String::with_capacity(s.len());
        let mut utf16 = Vec::new();
        let mut ix = 0;

        while let Some(off) = bytes[ix..].iter().position(|&b| SHIFT_IN == b) {
            let start = ix + off;
            transformed.push_str(&s[ix..start]);

            let base64_start = start + 1;
            let base64_end = bytes[base64_start..]
                .iter()
                .position(|&b| SHIFT_OUT == b)
                .map(|len| base64_start + len)
                .ok_or_else(|| {
                    Error::BadNameEncoding(format!(
                        "unterminated shift sequence in {:?}",
                        s
                    ))
                })?;
            let chunk = &bytes[base64_start..base64_end];
            ix = base64_end + 1;

            if chunk.is_empty() {
                transformed.push(SHIFT_IN.into());
                continue;
            }

            if !chunk.iter().copied().all(is_base64_char) {
                return Err(Error::BadNameEncoding(format!(
                    "invalid character in shift sequence in {:?}",
                    s
                )));
            }

            let raw = base64::decode_config(chunk, base64::IMAP_MUTF7)
                .map_err(|e| {
                    Error::BadNameEncoding(format!(
                        "bad base64 in {:?}: {}",
                        s, e
                    ))
                })?;
            if 0 != raw.len() % 2 {
                return Err(Error::BadNameEncoding(format!(
                    "partial UTF-16 code unit in {:?}",
                    s
                )));
            }

            utf16.clear();
            utf16.extend(
                raw.chunks(2).map(|c| u16::from_be_bytes([c[0], c[1]])),
            );
            let decoded = String::from_utf16(&utf16).map_err(|_| {
                Error::BadNameEncoding(format!("unpaired surrogate in {:?}", s))
            })?;
            transformed.push_str(&decoded);
        }

        transformed.push_str(&s[ix..]);
        Ok(Cow::Owned(transformed))
    }

    /// Encode the given segment into modified UTF-7.
    ///
    /// The encoded string is minimal (i.e., contains no unnecessary shift
    /// sequences) and normalised (never encodes a direct character and only
    /// uses the special escape sequence for the shift-in character, all
    /// encoded sequences have an explicit shift-out).
    pub fn encode<'a>(&self, s: &'a str) -> Cow<'a, str> {
        let mut transformed = String::new();

        let mut direct_start = 0;
        let mut direct_end = 0;
        for (ix, byte) in s.as_bytes().iter().copied().enumerate() {
            if self.is_direct(byte) {
                if ix != direct_end {
                    encode_group(
                        &mut transformed,
                        s,
                        direct_start,
                        direct_end,
                        ix,
                    );
                    direct_start = ix;
                }
                direct_end = ix + 1;
            } else if SHIFT_IN == byte {
                encode_group(
                    &mut transformed,
                    s,
                    direct_start,
                    direct_end,
                    ix,
                );
                transformed.push_str(SHIFT_IN_ESCAPED);
                direct_start = ix + 1;
                direct_end = ix + 1;
            }
        }

        if transformed.is_empty() && direct_end == s.len() {
            Cow::Borrowed(s)
        } else {
            encode_group(
                &mut transformed,
                s,
                direct_start,
                direct_end,
                s.len(),
            );
            Cow::Owned(transformed)
        }
    }

    fn is_direct(&self, byte: u8) -> bool {
        (b' '..0x7F).contains(&byte)
            && SHIFT_IN != byte
            && self.delimiter != byte
    }
}

fn encode_group(
    dst: &mut String,
    src: &str,
    direct_start: usize,
    direct_end: usize,
    indirect_end: usize,
) {
    dst.push_str(&src[direct_start..direct_end]);

    if direct_end < indirect_end {
        let mut buf = Vec::<u8>::with_capacity((indirect_end - direct_end) * 2);
        for unit in src[direct_end..indirect_end].encode_utf16() {
            buf.extend_from_slice(&unit.to_be_bytes());
        }

        dst.push(SHIFT_IN.into());
        dst.push_str(&base64::encode_config(&buf, base64::IMAP_MUTF7));
        dst.push(SHIFT_OUT.into());
    }
}

fn is_base64_char(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'+' || ch == b','
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    const DOT: SegmentUtf7 = SegmentUtf7 { delimiter: b'.' };
    const SLASH: SegmentUtf7 = SegmentUtf7 { delimiter: b'/' };

    #[test]
    fn encode() {
        assert_eq!("INBOX", DOT.encode("INBOX"));
        assert_eq!("Lost &- Found", DOT.encode("Lost & Found"));
        assert_eq!("Procter &- Gamble", DOT.encode("Procter & Gamble"));
        // Examples from RFC 3501, where / is not the delimiter
        assert_eq!(
            "~peter/mail/&U,BTFw-/&ZeVnLIqe-",
            DOT.encode("~peter/mail/台北/日本語")
        );
        assert_eq!("&Jjo-!", DOT.encode("☺!"));
        assert_eq!("&U,BTF2XlZyyKng-", DOT.encode("台北日本語"));
        // The delimiter is shifted
        assert_eq!("a&AC4-b", DOT.encode("a.b"));
        assert_eq!("a.b", SLASH.encode("a.b"));
        assert_eq!("a&AC8-b", SLASH.encode("a/b"));
        // Misc
        assert_eq!("&AADYANwA,+AAoQCh-", DOT.encode("\x00𐀀￠¡¡"));
    }

    #[test]
    fn decode() {
        assert_eq!("INBOX", DOT.decode("INBOX").unwrap());
        assert_eq!("Lost & Found", DOT.decode("Lost &- Found").unwrap());
        assert_eq!(
            "~peter/mail/台北/日本語",
            DOT.decode("~peter/mail/&U,BTFw-/&ZeVnLIqe-").unwrap()
        );
        assert_eq!("☺!", DOT.decode("&Jjo-!").unwrap());
        assert_eq!("a.b", DOT.decode("a&AC4-b").unwrap());
        assert_eq!("\x00𐀀￠¡¡", DOT.decode("&AADYANwA,+AAoQCh-").unwrap());
        // Optimistic cases
        assert_eq!("Entwürfe", DOT.decode("Entwürfe").unwrap());
        assert_eq!("a", DOT.decode("&AGE-").unwrap());
    }

    #[test]
    fn decode_malformed() {
        assert_matches!(Err(Error::BadNameEncoding(_)), DOT.decode("hello&"));
        assert_matches!(Err(Error::BadNameEncoding(_)), DOT.decode("&Jjo"));
        assert_matches!(Err(Error::BadNameEncoding(_)), DOT.decode("&Jjo!-"));
        // Three bytes is not a whole number of UTF-16 units
        assert_matches!(Err(Error::BadNameEncoding(_)), DOT.decode("&AAAA-"));
        // Lone high surrogate
        assert_matches!(Err(Error::BadNameEncoding(_)), DOT.decode("&2AA-"));
    }

    proptest! {
        #[test]
        fn encoding_is_reversible(s in ".*") {
            assert_eq!(s, DOT.decode(&DOT.encode(&s)).unwrap());
            assert_eq!(s, SLASH.decode(&SLASH.encode(&s)).unwrap());
        }

        #[test]
        fn encoding_never_contains_delimiter(s in ".*") {
            assert!(!DOT.encode(&s).contains('.'));
            assert!(!SLASH.encode(&s).contains('/'));
        }

        #[test]
        fn decoding_never_panics(s in ".*") {
            let _ = DOT.decode(&s);
        }
    }
}
