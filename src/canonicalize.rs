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

//! Canonicalization of header and body, RFC 6376, section 3.4.

use crate::{
    header::{FieldName, HeaderFields},
    signature::CanonicalizationAlgorithm,
};
use std::collections::HashMap;

const SP: u8 = b' ';
const CR: u8 = b'\r';
const LF: u8 = b'\n';
const CRLF: [u8; 2] = [CR, LF];

fn is_wsp(b: u8) -> bool {
    matches!(b, b' ' | b'\t')
}

/// A chunk-wise body canonicalizer.
///
/// Only CRLF is recognised as a line terminator; a stray CR or LF is ordinary
/// line content.
pub struct BodyCanonicalizer {
    algorithm: CanonicalizationAlgorithm,
    pending_cr: bool,
    // relaxed only: whitespace seen but not yet written
    pending_wsp: bool,
    line_has_content: bool,
    // empty lines withheld until more content arrives
    empty_lines: usize,
    any_content: bool,
}

impl BodyCanonicalizer {
    pub fn new(algorithm: CanonicalizationAlgorithm) -> Self {
        Self {
            algorithm,
            pending_cr: false,
            pending_wsp: false,
            line_has_content: false,
            empty_lines: 0,
            any_content: false,
        }
    }

    pub fn canonicalize_chunk(&mut self, chunk: &[u8]) -> Vec<u8> {
        let mut result = Vec::with_capacity(chunk.len());

        for &b in chunk {
            if self.pending_cr {
                self.pending_cr = false;
                if b == LF {
                    self.end_line(&mut result);
                    continue;
                }
                self.push_content(&mut result, CR);
            }

            if b == CR {
                self.pending_cr = true;
            } else if is_wsp(b) && self.algorithm == CanonicalizationAlgorithm::Relaxed {
                self.pending_wsp = true;
            } else {
                self.push_content(&mut result, b);
            }
        }

        result
    }

    /// Returns the final piece of canonicalized output.
    pub fn finish(mut self) -> Vec<u8> {
        let mut result = vec![];

        if self.pending_cr {
            self.pending_cr = false;
            self.push_content(&mut result, CR);
        }

        if self.line_has_content {
            result.extend(CRLF);
        } else if !self.any_content && self.algorithm == CanonicalizationAlgorithm::Simple {
            // the empty body is canonicalized as a single CRLF
            result.extend(CRLF);
        }

        result
    }

    fn end_line(&mut self, result: &mut Vec<u8>) {
        // trailing whitespace is dropped
        self.pending_wsp = false;

        if self.line_has_content {
            result.extend(CRLF);
            self.line_has_content = false;
        } else {
            self.empty_lines += 1;
        }
    }

    fn push_content(&mut self, result: &mut Vec<u8>, b: u8) {
        for _ in 0..self.empty_lines {
            result.extend(CRLF);
        }
        self.empty_lines = 0;

        if self.pending_wsp {
            result.push(SP);
            self.pending_wsp = false;
        }

        result.push(b);
        self.line_has_content = true;
        self.any_content = true;
    }
}

/// Canonicalizes the selected header fields, in the order given.
///
/// Each occurrence of a name in `selected_headers` consumes the next instance
/// of that header field, starting from the bottom of the header. Names for
/// which no instance remains contribute nothing.
pub fn canonicalize_headers(
    algorithm: CanonicalizationAlgorithm,
    headers: &HeaderFields,
    selected_headers: &[FieldName],
) -> Vec<u8> {
    let mut result = vec![];
    let mut consumed: HashMap<&FieldName, usize> = HashMap::new();

    for selected in selected_headers {
        let skip = consumed.entry(selected).or_insert(0);

        let field = headers
            .iter()
            .rev()
            .filter(|(name, _)| name == selected)
            .nth(*skip);

        if let Some((name, body)) = field {
            *skip += 1;
            canonicalize_header(&mut result, algorithm, name, body);
            result.extend(CRLF);
        }
    }

    result
}

/// Canonicalizes a single header field, without the terminating CRLF.
pub fn canonicalize_header(
    result: &mut Vec<u8>,
    algorithm: CanonicalizationAlgorithm,
    name: impl AsRef<str>,
    value: impl AsRef<[u8]>,
) {
    let name = name.as_ref();
    let value = value.as_ref();

    match algorithm {
        CanonicalizationAlgorithm::Simple => {
            result.extend(name.bytes());
            result.push(b':');
            result.extend(value);
        }
        CanonicalizationAlgorithm::Relaxed => {
            result.extend(name.trim_end().to_ascii_lowercase().bytes());
            result.push(b':');
            canonicalize_value_relaxed(result, value);
        }
    }
}

fn canonicalize_value_relaxed(result: &mut Vec<u8>, value: &[u8]) {
    fn is_space(b: u8) -> bool {
        matches!(b, b' ' | b'\t' | b'\r' | b'\n')
    }

    let mut space = false;
    let mut started = false;

    for &b in value {
        if is_space(b) {
            space = true;
        } else {
            if space && started {
                result.push(SP);
            }
            result.push(b);
            space = false;
            started = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::FieldBody;
    use bstr::BStr;

    fn canonicalize_chunks(algorithm: CanonicalizationAlgorithm, chunks: &[&[u8]]) -> Vec<u8> {
        let mut bc = BodyCanonicalizer::new(algorithm);
        let mut result = vec![];
        for c in chunks {
            result.extend(bc.canonicalize_chunk(c));
        }
        result.extend(bc.finish());
        result
    }

    fn make_headers(fields: &[(&str, &[u8])]) -> HeaderFields {
        let fields: Vec<_> = fields
            .iter()
            .map(|&(name, body)| (FieldName::new(name).unwrap(), FieldBody::new(body).unwrap()))
            .collect();
        HeaderFields::new(fields)
    }

    #[test]
    fn canonicalize_headers_relaxed() {
        let headers = make_headers(&[
            ("from", b" Good \t "),
            ("to", b" see   me"),
            ("Date", b" Fri 24\r\n\tfoo"),
            ("To", b" another one"),
        ]);

        let selected = [
            FieldName::new("to").unwrap(),
            FieldName::new("from").unwrap(),
            FieldName::new("date").unwrap(),
            FieldName::new("to").unwrap(),
            FieldName::new("to").unwrap(),
        ];

        assert_eq!(
            BStr::new(&canonicalize_headers(
                CanonicalizationAlgorithm::Relaxed,
                &headers,
                &selected,
            )),
            BStr::new(&b"to:another one\r\nfrom:Good\r\ndate:Fri 24 foo\r\nto:see me\r\n"[..]),
        );
    }

    #[test]
    fn canonicalize_headers_simple() {
        let headers = make_headers(&[("Subject", b" Hello \t\r\n there"), ("From", b"me")]);

        let selected = [FieldName::new("from").unwrap(), FieldName::new("subject").unwrap()];

        assert_eq!(
            BStr::new(&canonicalize_headers(
                CanonicalizationAlgorithm::Simple,
                &headers,
                &selected,
            )),
            BStr::new(&b"From:me\r\nSubject: Hello \t\r\n there\r\n"[..]),
        );
    }

    #[test]
    fn body_simple() {
        let body = canonicalize_chunks(
            CanonicalizationAlgorithm::Simple,
            &[b"well  hello \r\n", b"\r\n what agi \r\n\r\n", b"\r\n"],
        );

        assert_eq!(BStr::new(&body), BStr::new(b"well  hello \r\n\r\n what agi \r\n"));
    }

    #[test]
    fn body_relaxed() {
        let body = canonicalize_chunks(
            CanonicalizationAlgorithm::Relaxed,
            &[b"well  hello \r\n", b"\r\n what agi \r\n\r\n", b"\r\n"],
        );

        assert_eq!(BStr::new(&body), BStr::new(b"well hello\r\n\r\n what agi\r\n"));
    }

    #[test]
    fn body_relaxed_split_everywhere() {
        let body = canonicalize_chunks(
            CanonicalizationAlgorithm::Relaxed,
            &[b"well ", b" hello ", b"\r", b"\n\r", b"\n what agi \r\n\r\n", b"\r\n"],
        );

        assert_eq!(BStr::new(&body), BStr::new(b"well hello\r\n\r\n what agi\r\n"));
    }

    #[test]
    fn body_relaxed_leading_empty_lines_and_stray_cr() {
        let body = canonicalize_chunks(
            CanonicalizationAlgorithm::Relaxed,
            &[b"\r\n\r\n", b"\ra \r", b"\nb  ", b"c"],
        );

        assert_eq!(BStr::new(&body), BStr::new(b"\r\n\r\n\ra\r\nb c\r\n"));
    }

    #[test]
    fn body_empty() {
        assert_eq!(canonicalize_chunks(CanonicalizationAlgorithm::Simple, &[]), b"\r\n");
        assert_eq!(canonicalize_chunks(CanonicalizationAlgorithm::Simple, &[b"\r\n\r\n"]), b"\r\n");
        assert_eq!(canonicalize_chunks(CanonicalizationAlgorithm::Relaxed, &[]), b"");
        assert_eq!(canonicalize_chunks(CanonicalizationAlgorithm::Relaxed, &[b" \r\n\t\r\n"]), b"");
    }

    #[test]
    fn body_missing_final_crlf() {
        assert_eq!(canonicalize_chunks(CanonicalizationAlgorithm::Simple, &[b"abc"]), b"abc\r\n");
        assert_eq!(canonicalize_chunks(CanonicalizationAlgorithm::Simple, &[b"abc\r"]), b"abc\r\r\n");
        assert_eq!(canonicalize_chunks(CanonicalizationAlgorithm::Relaxed, &[b"abc \t"]), b"abc\r\n");
    }
}
