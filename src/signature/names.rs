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

use std::{
    error::Error,
    fmt::{self, Debug, Display, Formatter},
    hash::{Hash, Hasher},
};

const MAX_DOMAIN_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;
const MAX_LOCAL_PART_LEN: usize = 64;

/// An error indicating an invalid domain name, selector, or identity.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ParseNameError;

impl Display for ParseNameError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "invalid name")
    }
}

impl Error for ParseNameError {}

/// A domain name, as used in the d= and i= tags.
///
/// The name is stored as given; U-labels are permitted. Equality ignores
/// ASCII case.
#[derive(Clone, Eq)]
pub struct DomainName(Box<str>);

impl DomainName {
    pub fn new(s: &str) -> Result<Self, ParseNameError> {
        if !is_domain_name(s) || idna::domain_to_ascii(s).is_err() {
            return Err(ParseNameError);
        }
        Ok(Self(s.into()))
    }

    /// Returns the A-label form of this name.
    pub fn to_ascii(&self) -> String {
        idna::domain_to_ascii(&self.0).unwrap_or_else(|_| self.0.to_ascii_lowercase())
    }

    /// Whether this domain is the given domain or a subdomain of it.
    pub fn eq_or_subdomain_of(&self, other: &DomainName) -> bool {
        let name = self.to_ascii();
        let other = other.to_ascii();

        if name.eq_ignore_ascii_case(&other) {
            return true;
        }

        name.len() > other.len() + 1 && {
            let (prefix, suffix) = name.split_at(name.len() - other.len());
            prefix.ends_with('.') && suffix.eq_ignore_ascii_case(&other)
        }
    }
}

impl AsRef<str> for DomainName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for DomainName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Debug for DomainName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl PartialEq for DomainName {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Hash for DomainName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_ascii_lowercase().hash(state);
    }
}

/// A selector, as used in the s= tag: one or more labels, underscores
/// allowed.
#[derive(Clone, Eq)]
pub struct Selector(Box<str>);

impl Selector {
    pub fn new(s: &str) -> Result<Self, ParseNameError> {
        if !s.split('.').all(is_label) || idna::domain_to_ascii(s).is_err() {
            return Err(ParseNameError);
        }
        Ok(Self(s.into()))
    }

    pub fn to_ascii(&self) -> String {
        idna::domain_to_ascii(&self.0).unwrap_or_else(|_| self.0.to_ascii_lowercase())
    }
}

impl AsRef<str> for Selector {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for Selector {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Debug for Selector {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl PartialEq for Selector {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Hash for Selector {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_ascii_lowercase().hash(state);
    }
}

/// An agent or user identifier, as used in the i= tag: an optional local-part,
/// `@`, and a domain name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Identity {
    pub local_part: Option<Box<str>>,
    pub domain_part: DomainName,
}

impl Identity {
    pub fn new(s: &str) -> Result<Self, ParseNameError> {
        let (local_part, domain) = s.rsplit_once('@').ok_or(ParseNameError)?;

        let local_part = if local_part.is_empty() {
            None
        } else if is_local_part(local_part) {
            Some(local_part.into())
        } else {
            return Err(ParseNameError);
        };

        Ok(Self {
            local_part,
            domain_part: DomainName::new(domain)?,
        })
    }

    pub fn from_domain(domain_part: DomainName) -> Self {
        Self {
            local_part: None,
            domain_part,
        }
    }
}

impl Display for Identity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(local_part) = &self.local_part {
            f.write_str(local_part)?;
        }
        write!(f, "@{}", self.domain_part)
    }
}

fn is_domain_name(s: &str) -> bool {
    if !matches!(s.len(), 1..=MAX_DOMAIN_LEN) {
        return false;
    }

    let mut labels = s.rsplit('.');

    // the top-level label must not be numeric, and there must be at least two
    // labels
    let tld_ok = matches!(
        labels.next(),
        Some(l) if is_label(l) && !l.chars().all(|c| c.is_ascii_digit())
    );

    tld_ok && {
        let mut rest = labels.peekable();
        rest.peek().is_some() && rest.all(is_label)
    }
}

fn is_label(s: &str) -> bool {
    matches!(s.len(), 1..=MAX_LABEL_LEN)
        && !s.starts_with('-')
        && !s.ends_with('-')
        && s.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_') || !c.is_ascii())
}

// RFC 5321, section 4.1.2, relaxed to admit UTF-8 as in RFC 6531
fn is_local_part(s: &str) -> bool {
    fn is_atext(c: char) -> bool {
        c.is_ascii_alphanumeric() || "!#$%&'*+-/=?^_`{|}~".contains(c) || !c.is_ascii()
    }

    if s.len() > MAX_LOCAL_PART_LEN {
        return false;
    }

    if let Some(quoted) = s.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        return !quoted.contains(|c: char| c.is_ascii_control() || c == '"');
    }

    s.split('.').all(|atom| !atom.is_empty() && atom.chars().all(is_atext))
}
