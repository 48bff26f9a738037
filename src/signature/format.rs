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

//! Formatting of the `DKIM-Signature` header value with line folding.
//!
//! Columns are counted in characters; the tab that begins a continuation line
//! counts as one.

use crate::{
    signature::{CanonicalizationAlgorithm, DkimSignature},
    util::{encode_base64, CanonicalStr},
};

const FOLD: &str = "\r\n\t";

struct TagWriter {
    output: String,
    width: usize,
    column: usize,
}

impl TagWriter {
    fn new(width: usize, column: usize) -> Self {
        Self {
            output: String::new(),
            width,
            column,
        }
    }

    // Starts a new tag, separated from the previous one by a space or by a
    // line break; `min_len` is the part that must fit on the current line.
    fn start(&mut self, min_len: usize) {
        if self.output.is_empty() {
            self.column += min_len;
        } else if self.column + 1 + min_len <= self.width {
            self.output.push(' ');
            self.column += 1 + min_len;
        } else {
            self.output.push_str(FOLD);
            self.column = 1 + min_len;
        }
    }

    /// Writes `name=value;` unbroken.
    fn tag(&mut self, name: &str, value: &str) {
        self.start(name.len() + value.chars().count() + 2);
        self.output.push_str(name);
        self.output.push('=');
        self.output.push_str(value);
        self.output.push(';');
    }

    /// Writes `name=value1:value2...;`, folding after a colon where needed.
    fn list_tag(&mut self, name: &str, values: &[&str]) {
        let mut values = values.iter();

        let first = values.next().copied().unwrap_or_default();
        self.start(name.len() + first.chars().count() + 2);
        self.output.push_str(name);
        self.output.push('=');
        self.output.push_str(first);

        for value in values {
            self.output.push(':');
            let len = value.chars().count() + 1;
            if self.column + len <= self.width {
                self.column += len;
            } else {
                self.output.push_str(FOLD);
                self.column = 1 + len;
            }
            self.output.push_str(value);
        }

        self.output.push(';');
    }

    /// Writes `name=` followed by Base64 data broken across lines at any
    /// position.
    fn base64_tag(&mut self, name: &str, value: &str, terminate: bool) {
        self.start(name.len() + 2);
        // the first data character is not written yet
        self.column -= 1;
        self.output.push_str(name);
        self.output.push('=');
        if terminate {
            // leave room for the semicolon
            self.width -= 1;
            self.chunks(value);
            self.width += 1;
            self.output.push(';');
            self.column += 1;
        } else {
            self.chunks(value);
        }
    }

    fn chunks(&mut self, mut s: &str) {
        // s is ASCII only
        let first_len = self.width.saturating_sub(self.column).min(s.len());
        let (first, rest) = s.split_at(first_len);
        self.output.push_str(first);
        self.column += first.len();
        s = rest;

        let chunk_len = self.width.saturating_sub(1).max(1);
        while !s.is_empty() {
            let (chunk, rest) = s.split_at(chunk_len.min(s.len()));
            self.output.push_str(FOLD);
            self.output.push_str(chunk);
            self.column = 1 + chunk.len();
            s = rest;
        }
    }
}

/// Formats the signature with an empty b= tag as the final tag.
///
/// `column` is the position on the first line at which the value begins.
/// Returns the formatted value and the column after the final `b=`.
pub fn format_without_signature_data(
    sig: &DkimSignature,
    width: usize,
    column: usize,
) -> (String, usize) {
    let mut w = TagWriter::new(width, column);

    w.tag("v", "1");
    w.tag("a", sig.algorithm.canonical_str());

    let c = sig.canonicalization;
    if c.header != CanonicalizationAlgorithm::Simple || c.body != CanonicalizationAlgorithm::Simple {
        w.tag("c", &c.to_string());
    }

    w.tag("d", sig.domain.as_ref());
    if let Some(i) = &sig.user_id {
        w.tag("i", &i.to_string());
    }
    w.tag("s", sig.selector.as_ref());

    if let Some(t) = sig.timestamp {
        w.tag("t", &t.to_string());
    }
    if let Some(x) = sig.expiration {
        w.tag("x", &x.to_string());
    }
    if let Some(l) = sig.body_length {
        w.tag("l", &l.to_string());
    }

    for (name, value) in &sig.extra_tags {
        w.tag(name, value);
    }

    w.base64_tag("bh", &encode_base64(&sig.body_hash), true);

    let names: Vec<&str> = sig.signed_headers.iter().map(|n| n.as_ref()).collect();
    w.list_tag("h", &names);

    w.base64_tag("b", "", false);

    (w.output, w.column)
}

/// Appends the Base64-encoded signature data to a value produced by
/// [`format_without_signature_data`].
pub fn append_signature_data(
    value: &mut String,
    width: usize,
    column: usize,
    signature_data: &[u8],
) {
    let mut w = TagWriter {
        output: std::mem::take(value),
        width,
        column,
    };
    w.chunks(&encode_base64(signature_data));
    *value = w.output;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_writer_folds_tags() {
        let mut w = TagWriter::new(20, 0);
        w.tag("v", "1");
        w.tag("d", "example.com");
        w.tag("s", "sel");
        assert_eq!(w.output, "v=1; d=example.com;\r\n\ts=sel;");
        assert_eq!(w.column, 7);
    }

    #[test]
    fn tag_writer_folds_lists() {
        let mut w = TagWriter::new(20, 10);
        w.list_tag("h", &["From", "To", "Subject", "Date"]);
        assert_eq!(w.output, "h=From:To:\r\n\tSubject:Date;");
    }

    #[test]
    fn tag_writer_breaks_base64() {
        let mut w = TagWriter::new(10, 4);
        w.base64_tag("bh", "abcdefghijklmnop", true);
        assert_eq!(w.output, "bh=ab\r\n\tcdefghij\r\n\tklmnop;");
        assert_eq!(w.column, 8);
    }
}
