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

use crate::{
    crypto::SigningKey,
    header::{FieldName, HeaderFields},
    signature::{
        Canonicalization, DomainName, Identity, Selector, SignatureAlgorithm,
        DKIM_SIGNATURE_NAME, LINE_WIDTH,
    },
    signer::SignerError,
    tag_list::TagList,
};
use std::{collections::HashSet, time::Duration};

/// Tags generated by the signer, which cannot be given as extra tags.
const OUTPUT_TAGS: [&str; 14] = [
    "v", "a", "b", "bh", "c", "d", "h", "i", "l", "q", "s", "t", "x", "z",
];

/// Header fields never included in the default selection, RFC 6376, section
/// 5.4.1.
const UNSIGNED_HEADERS: [&str; 5] = [
    "Return-Path",
    "Received",
    "Comments",
    "Keywords",
    DKIM_SIGNATURE_NAME,
];

/// The strategy for the *l=* tag.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum BodyLength {
    /// No *l=* tag.
    #[default]
    All,
    /// Set *l=* to the length of the canonicalized body.
    OnlyMessageLength,
    /// Sign exactly this many bytes of canonicalized body.
    Exact(u64),
}

impl BodyLength {
    pub fn to_limit(self) -> Result<Option<usize>, SignerError> {
        match self {
            Self::All | Self::OnlyMessageLength => Ok(None),
            Self::Exact(n) => n.try_into().map(Some).map_err(|_| SignerError::Overflow),
        }
    }
}

/// The value of the *t=* tag.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Timestamp {
    #[default]
    Now,
    Exact(u64),
}

/// The selection of headers for the *h=* tag.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum HeaderSelection {
    /// Every header field present in the message, once per occurrence, except
    /// the trace and comment fields that are commonly altered in transit.
    #[default]
    Auto,
    /// Exactly these names, in this order.
    Manual(Vec<FieldName>),
}

impl HeaderSelection {
    pub fn select(&self, headers: &HeaderFields) -> Vec<FieldName> {
        match self {
            Self::Auto => headers
                .iter()
                .map(|(name, _)| name)
                .filter(|name| !UNSIGNED_HEADERS.iter().any(|u| *name == u))
                .cloned()
                .collect(),
            Self::Manual(names) => names.clone(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OutputFormat {
    /// The header name, equal to `DKIM-Signature` ignoring case.
    pub header_name: String,
    /// Maximum line width in characters when folding. The default is 78.
    pub line_width: usize,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self {
            header_name: DKIM_SIGNATURE_NAME.into(),
            line_width: LINE_WIDTH,
        }
    }
}

/// A request for creation of a DKIM signature.
#[derive(Debug)]
pub struct SignRequest<T> {
    pub signing_key: T,
    /// The *a=* tag; must match the key type.
    pub algorithm: SignatureAlgorithm,
    pub canonicalization: Canonicalization,
    pub header_selection: HeaderSelection,
    pub domain: DomainName,
    pub identity: Option<Identity>,
    pub selector: Selector,
    pub body_length: BodyLength,
    /// The *t=* tag, or none.
    pub timestamp: Option<Timestamp>,
    /// Validity period, for the *x=* tag.
    pub valid_duration: Option<Duration>,
    /// Additional tags to include, in order.
    pub extra_tags: Vec<(String, String)>,
    pub format: OutputFormat,
}

impl<T> SignRequest<T> {
    pub fn new(
        domain: DomainName,
        selector: Selector,
        algorithm: SignatureAlgorithm,
        signing_key: T,
    ) -> Self {
        Self {
            signing_key,
            algorithm,
            canonicalization: Default::default(),
            header_selection: Default::default(),
            domain,
            identity: None,
            selector,
            body_length: Default::default(),
            timestamp: Some(Timestamp::Now),
            valid_duration: None,
            extra_tags: vec![],
            format: Default::default(),
        }
    }
}

pub fn validate_request<T>(request: &SignRequest<T>) -> Result<(), SignerError>
where
    T: AsRef<SigningKey>,
{
    if request.signing_key.as_ref().key_type() != request.algorithm.key_type() {
        return Err(SignerError::KeyTypeMismatch);
    }

    if !request.format.header_name.eq_ignore_ascii_case(DKIM_SIGNATURE_NAME) {
        return Err(SignerError::InvalidHeaderName);
    }

    if let HeaderSelection::Manual(names) = &request.header_selection {
        if !names.iter().any(|name| *name == "From") {
            return Err(SignerError::FromHeaderNotSigned);
        }
    }

    if let Some(i) = &request.identity {
        if !i.domain_part.eq_or_subdomain_of(&request.domain) {
            return Err(SignerError::DomainMismatch);
        }
    }

    if request.valid_duration == Some(Duration::ZERO) {
        return Err(SignerError::ZeroExpirationDuration);
    }

    let mut names_seen = HashSet::new();
    for (name, value) in &request.extra_tags {
        if !names_seen.insert(name)
            || OUTPUT_TAGS.contains(&name.as_str())
            || !is_tag(name, value)
        {
            return Err(SignerError::InvalidExtraTags);
        }
    }

    Ok(())
}

// name=value must parse as exactly this one tag
fn is_tag(name: &str, value: &str) -> bool {
    let tag = format!("{name}={value}");
    match TagList::parse(&tag) {
        Ok(tags) => tags.as_ref().len() == 1 && tags.get(name) == Some(value),
        Err(_) => false,
    }
}
