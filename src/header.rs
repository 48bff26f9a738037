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

//! Representation of email header data.

use bstr::ByteSlice;
use std::{
    error::Error,
    fmt::{self, Debug, Display, Formatter},
    hash::{Hash, Hasher},
    str,
};

/// A header field: name and (unfolded, raw) body.
pub type HeaderField = (FieldName, FieldBody);

/// An error indicating a malformed header field.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct HeaderFieldError;

impl Display for HeaderFieldError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "malformed header field")
    }
}

impl Error for HeaderFieldError {}

/// A header field name.
///
/// Comparison and hashing ignore ASCII case.
#[derive(Clone, Eq)]
pub struct FieldName(Box<str>);

impl FieldName {
    pub fn new(value: impl Into<Box<str>>) -> Result<Self, HeaderFieldError> {
        let value = value.into();
        if value.is_empty() || !value.chars().all(|c| c.is_ascii_graphic() && c != ':') {
            return Err(HeaderFieldError);
        }
        Ok(Self(value))
    }
}

impl AsRef<str> for FieldName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Debug for FieldName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl Display for FieldName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq for FieldName {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl PartialEq<&str> for FieldName {
    fn eq(&self, other: &&str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl Hash for FieldName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_ascii_lowercase().hash(state);
    }
}

/// A header field body: everything after the colon, without the terminating
/// CRLF.
///
/// Continuation lines must begin with whitespace. The bytes need not be UTF-8.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct FieldBody(Box<[u8]>);

impl FieldBody {
    pub fn new(value: impl Into<Box<[u8]>>) -> Result<Self, HeaderFieldError> {
        let value = value.into();

        let mut lines = value.split_str("\r\n");

        if let Some(first) = lines.next() {
            if first.contains(&b'\n') {
                return Err(HeaderFieldError);
            }
        }

        for line in lines {
            if !line.starts_with(b" ") && !line.starts_with(b"\t") {
                return Err(HeaderFieldError);
            }
            if line.contains(&b'\n') {
                return Err(HeaderFieldError);
            }
        }

        Ok(Self(value))
    }
}

impl AsRef<[u8]> for FieldBody {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for FieldBody {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FieldBody").field(&self.0.as_bstr()).finish()
    }
}

/// An ordered collection of header fields, as they appear in the message.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HeaderFields(Vec<HeaderField>);

impl HeaderFields {
    pub fn new(fields: impl Into<Vec<HeaderField>>) -> Self {
        Self(fields.into())
    }

    /// Parses a raw header section.
    ///
    /// The input consists of CRLF-terminated lines, not including the empty
    /// line that separates the header from the body. A final line lacking its
    /// CRLF is accepted.
    pub fn parse_raw(section: &[u8]) -> Result<Self, HeaderFieldError> {
        let section = section.strip_suffix(b"\r\n").unwrap_or(section);

        let mut fields = vec![];

        if section.is_empty() {
            return Ok(Self(fields));
        }

        let mut current: Option<(&[u8], usize)> = None;
        let mut offset = 0;

        for line in section.split_str("\r\n") {
            let line_start = offset;
            offset += line.len() + 2;

            if line.starts_with(b" ") || line.starts_with(b"\t") {
                // a continuation line without a field to continue
                if current.is_none() {
                    return Err(HeaderFieldError);
                }
                continue;
            }

            if let Some((name, value_start)) = current.take() {
                let value_end = line_start - 2;
                fields.push(make_field(name, &section[value_start..value_end])?);
            }

            let colon = line.find_byte(b':').ok_or(HeaderFieldError)?;
            let name = &line[..colon];
            current = Some((name, line_start + colon + 1));
        }

        if let Some((name, value_start)) = current {
            fields.push(make_field(name, &section[value_start..])?);
        }

        Ok(Self(fields))
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &HeaderField> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|(n, _)| *n == name)
    }
}

impl AsRef<[HeaderField]> for HeaderFields {
    fn as_ref(&self) -> &[HeaderField] {
        &self.0
    }
}

impl From<HeaderFields> for Vec<HeaderField> {
    fn from(headers: HeaderFields) -> Self {
        headers.0
    }
}

fn make_field(name: &[u8], value: &[u8]) -> Result<HeaderField, HeaderFieldError> {
    // RFC 5322 forbids whitespace before the colon, but it is common enough
    // (obs-optional) that it is tolerated here
    let name = name.trim_end_with(|c| matches!(c, ' ' | '\t'));
    let name = str::from_utf8(name).map_err(|_| HeaderFieldError)?;
    let name = FieldName::new(name)?;
    let body = FieldBody::new(value)?;
    Ok((name, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_name_ok() {
        assert!(FieldName::new("abc").is_ok());
        assert_eq!(FieldName::new("From").unwrap(), FieldName::new("FROM").unwrap());

        assert!(FieldName::new("").is_err());
        assert!(FieldName::new("abc ").is_err());
        assert!(FieldName::new("a:c").is_err());
    }

    #[test]
    fn field_name_debug() {
        let name = FieldName::new("DKIM-Signature").unwrap();
        assert_eq!(format!("{name:?}"), "\"DKIM-Signature\"");
        assert_eq!(name.to_string(), "DKIM-Signature");
    }

    #[test]
    fn field_body_ok() {
        assert!(FieldBody::new(*b" ab\r\n\tcd ").is_ok());
        assert!(FieldBody::new(*b"\r\n\ta").is_ok());
        assert!(FieldBody::new(*b"  ").is_ok());
        assert!(FieldBody::new(*b"").is_ok());

        assert!(FieldBody::new(*b" \r\na").is_err());
        assert!(FieldBody::new(*b" \na").is_err());
        assert!(FieldBody::new(*b" abc\r\n").is_err());
    }

    #[test]
    fn parse_raw_ok() {
        let headers = HeaderFields::parse_raw(
            b"From: me\r\nSubject: hello\r\n\tworld\r\nX-Empty:\r\nTo : you\r\n",
        )
        .unwrap();

        let fields: Vec<_> = headers
            .iter()
            .map(|(name, body)| (name.as_ref(), body.as_ref()))
            .collect();

        assert_eq!(
            fields,
            [
                ("From", &b" me"[..]),
                ("Subject", b" hello\r\n\tworld"),
                ("X-Empty", b""),
                ("To", b" you"),
            ]
        );
    }

    #[test]
    fn parse_raw_unterminated_last_line() {
        let headers = HeaderFields::parse_raw(b"A: 1\r\nB: 2").unwrap();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers.as_ref()[1].1.as_ref(), b" 2");
    }

    #[test]
    fn parse_raw_empty() {
        assert!(HeaderFields::parse_raw(b"").unwrap().is_empty());
    }

    #[test]
    fn parse_raw_malformed() {
        assert!(HeaderFields::parse_raw(b" leading: continuation\r\n").is_err());
        assert!(HeaderFields::parse_raw(b"From: me\r\nno colon here\r\n").is_err());
        assert!(HeaderFields::parse_raw(b": no name\r\n").is_err());
    }
}
