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

//! Tag-list parsing, RFC 6376, section 3.2.

use std::collections::HashSet;

/// A single `name=value` pair borrowed from the input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TagSpec<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TagListParseError {
    DuplicateTag,
    Syntax,
}

/// A parsed tag-list, in input order.
#[derive(Debug, PartialEq, Eq)]
pub struct TagList<'a>(Vec<TagSpec<'a>>);

impl<'a> TagList<'a> {
    pub fn parse(input: &'a str) -> Result<Self, TagListParseError> {
        let (rest, tags) = parse_tag_list(input).ok_or(TagListParseError::Syntax)?;
        if !rest.is_empty() {
            return Err(TagListParseError::Syntax);
        }

        let mut names_seen = HashSet::new();
        if tags.iter().any(|tag| !names_seen.insert(tag.name)) {
            return Err(TagListParseError::DuplicateTag);
        }

        Ok(Self(tags))
    }

    pub fn get(&self, name: &str) -> Option<&'a str> {
        self.0.iter().find(|t| t.name == name).map(|t| t.value)
    }
}

impl<'a> AsRef<[TagSpec<'a>]> for TagList<'a> {
    fn as_ref(&self) -> &[TagSpec<'a>] {
        &self.0
    }
}

/// Splits a colon-separated tag value into its trimmed elements.
pub fn split_colon_separated(value: &str) -> impl Iterator<Item = &str> {
    value.split(':').map(|s| s.trim_matches(is_fws_char))
}

fn parse_tag_list(input: &str) -> Option<(&str, Vec<TagSpec<'_>>)> {
    let (mut s, tag) = parse_tag_spec(input)?;
    let mut tags = vec![tag];

    while let Some((snext, tag)) = s.strip_prefix(';').and_then(parse_tag_spec) {
        s = snext;
        tags.push(tag);
    }

    // a trailing semicolon is allowed, and so is whitespace after it
    let s = match s.strip_prefix(';') {
        Some(s) => strip_fws(s).unwrap_or(s),
        None => s,
    };

    Some((s, tags))
}

fn parse_tag_spec(input: &str) -> Option<(&str, TagSpec<'_>)> {
    let s = strip_fws(input).unwrap_or(input);

    let rest = s.strip_prefix(|c: char| c.is_ascii_alphabetic())?;
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric() || c == '_');
    let name = &s[..(s.len() - rest.len())];

    let s = strip_fws(rest).unwrap_or(rest);
    let s = s.strip_prefix('=')?;
    let s = strip_fws(s).unwrap_or(s);

    let (s, value) = match parse_tag_value(s) {
        Some((rest, value)) => (strip_fws(rest).unwrap_or(rest), value),
        None => (s, ""),
    };

    Some((s, TagSpec { name, value }))
}

// tag-value = [ tval *( 1*(WSP / FWS) tval ) ], see erratum 5070
fn parse_tag_value(input: &str) -> Option<(&str, &str)> {
    fn strip_tval(s: &str) -> Option<&str> {
        s.strip_prefix(is_tval_char)
            .map(|s| s.trim_start_matches(is_tval_char))
    }

    let mut s = strip_tval(input)?;

    while let Some(snext) = strip_fws(s).and_then(strip_tval) {
        s = snext;
    }

    Some((s, &input[..(input.len() - s.len())]))
}

fn is_tval_char(c: char) -> bool {
    // printable ASCII except ';', or any non-ASCII character
    matches!(c, '!'..=':' | '<'..='~') || !c.is_ascii()
}

fn is_fws_char(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

fn is_wsp(c: char) -> bool {
    matches!(c, ' ' | '\t')
}

/// Strips one occurrence of folding whitespace, `[*WSP CRLF] 1*WSP`.
fn strip_fws(input: &str) -> Option<&str> {
    match strip_wsp(input) {
        Some(s) => s.strip_prefix("\r\n").and_then(strip_wsp).or(Some(s)),
        None => input.strip_prefix("\r\n").and_then(strip_wsp),
    }
}

fn strip_wsp(input: &str) -> Option<&str> {
    input
        .strip_prefix(is_wsp)
        .map(|s| s.trim_start_matches(is_wsp))
}
