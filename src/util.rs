// dkim-testmsg – sign or verify an email message with DKIM
// Copyright © 2022–2023 David Bürgin <dbuergin@gluet.ch>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later
// version.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.

//! Miscellaneous utilities.

use base64ct::{Base64, Encoding};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
};

/// A trait for entities that have a canonical string representation in DKIM.
pub trait CanonicalStr {
    /// Returns the canonical representation as a static string slice.
    fn canonical_str(&self) -> &'static str;
}

/// Encodes binary data as a Base64 string.
pub fn encode_base64(input: impl AsRef<[u8]>) -> String {
    Base64::encode_string(input.as_ref())
}

/// An error that occurs when decoding Base64 data.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Base64Error;

impl Display for Base64Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "invalid Base64 data")
    }
}

impl Error for Base64Error {}

/// Decodes a Base64 string, ignoring any embedded whitespace.
pub fn decode_base64(input: &str) -> Result<Vec<u8>, Base64Error> {
    let compact: String = input
        .chars()
        .filter(|c| !matches!(c, ' ' | '\t' | '\r' | '\n'))
        .collect();
    Base64::decode_vec(&compact).map_err(|_| Base64Error)
}

/// Stateful rewriting of bare LF line endings to CRLF.
///
/// A CR at the end of one chunk followed by LF at the start of the next is
/// recognised as a CRLF pair and left alone.
#[derive(Clone, Debug, Default)]
pub struct CrlfFixer {
    last_cr: bool,
}

impl CrlfFixer {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn fix_chunk(&mut self, chunk: &[u8]) -> Vec<u8> {
        let mut result = Vec::with_capacity(chunk.len() + chunk.len() / 32);

        for &b in chunk {
            if b == b'\n' && !self.last_cr {
                result.push(b'\r');
            }
            result.push(b);
            self.last_cr = b == b'\r';
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_base64_with_fws() {
        assert_eq!(decode_base64("YWJj\r\n\tZGVm").unwrap(), b"abcdef");
        assert_eq!(decode_base64(" YWJjZA== ").unwrap(), b"abcd");
        assert_eq!(decode_base64("YW*j"), Err(Base64Error));
    }

    #[test]
    fn crlf_fixer_ok() {
        let mut fixer = CrlfFixer::new();
        assert_eq!(fixer.fix_chunk(b"a\nb\r\nc\r"), b"a\r\nb\r\nc\r");
        assert_eq!(fixer.fix_chunk(b"\nd\n"), b"\nd\r\n");
        assert_eq!(fixer.fix_chunk(b"\n\r\r\n"), b"\r\n\r\r\n");
        assert_eq!(fixer.fix_chunk(b""), b"");
    }
}
