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

//! The DKIM signature and its `DKIM-Signature` header representation.

mod format;
mod names;

pub use self::{
    format::{append_signature_data, format_without_signature_data},
    names::{DomainName, Identity, ParseNameError, Selector},
};

use crate::{
    crypto::{HashAlgorithm, KeyType},
    header::FieldName,
    tag_list::{self, TagList, TagSpec},
    util::{self, CanonicalStr},
};
use std::{
    borrow::Cow,
    error::Error,
    fmt::{self, Debug, Display, Formatter},
    str::FromStr,
};

pub const DKIM_SIGNATURE_NAME: &str = "DKIM-Signature";

/// The line width used when folding the header.
pub const LINE_WIDTH: usize = 78;

/// A signature algorithm.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SignatureAlgorithm {
    /// The *rsa-sha1* algorithm, obsoleted by RFC 8301.
    RsaSha1,
    RsaSha256,
    Ed25519Sha256,
}

impl SignatureAlgorithm {
    pub fn key_type(self) -> KeyType {
        match self {
            Self::RsaSha1 | Self::RsaSha256 => KeyType::Rsa,
            Self::Ed25519Sha256 => KeyType::Ed25519,
        }
    }

    pub fn hash_algorithm(self) -> HashAlgorithm {
        match self {
            Self::RsaSha1 => HashAlgorithm::Sha1,
            Self::RsaSha256 | Self::Ed25519Sha256 => HashAlgorithm::Sha256,
        }
    }
}

impl CanonicalStr for SignatureAlgorithm {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::RsaSha1 => "rsa-sha1",
            Self::RsaSha256 => "rsa-sha256",
            Self::Ed25519Sha256 => "ed25519-sha256",
        }
    }
}

impl Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_str())
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::RsaSha1, Self::RsaSha256, Self::Ed25519Sha256]
            .into_iter()
            .find(|alg| s.eq_ignore_ascii_case(alg.canonical_str()))
            .ok_or("unknown signature algorithm")
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum CanonicalizationAlgorithm {
    #[default]
    Simple,
    Relaxed,
}

impl CanonicalStr for CanonicalizationAlgorithm {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Relaxed => "relaxed",
        }
    }
}

impl Display for CanonicalizationAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_str())
    }
}

impl FromStr for CanonicalizationAlgorithm {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("simple") {
            Ok(Self::Simple)
        } else if s.eq_ignore_ascii_case("relaxed") {
            Ok(Self::Relaxed)
        } else {
            Err("unknown canonicalization algorithm")
        }
    }
}

/// Header and body canonicalization.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Canonicalization {
    pub header: CanonicalizationAlgorithm,
    pub body: CanonicalizationAlgorithm,
}

impl Display for Canonicalization {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.header, self.body)
    }
}

impl FromStr for Canonicalization {
    type Err = &'static str;

    // a missing body part defaults to simple
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (header, body) = match s.split_once('/') {
            Some((header, body)) => (header.parse()?, body.parse()?),
            None => (s.parse()?, CanonicalizationAlgorithm::Simple),
        };
        Ok(Self { header, body })
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DkimSignatureErrorKind {
    InvalidTagList,
    MissingVersionTag,
    UnsupportedVersion,
    MissingAlgorithmTag,
    UnsupportedAlgorithm,
    MissingSignatureTag,
    MissingBodyHashTag,
    InvalidBase64,
    UnsupportedCanonicalization,
    MissingDomainTag,
    InvalidDomain,
    MissingSignedHeadersTag,
    InvalidSignedHeaders,
    FromHeaderNotSigned,
    InvalidUserId,
    DomainMismatch,
    InvalidBodyLength,
    UnsupportedQueryMethod,
    MissingSelectorTag,
    InvalidSelector,
    InvalidTimestamp,
    InvalidExpiration,
    ExpirationNotAfterTimestamp,
    Utf8Encoding,
}

impl Display for DkimSignatureErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTagList => write!(f, "invalid tag-list"),
            Self::MissingVersionTag => write!(f, "v= tag missing"),
            Self::UnsupportedVersion => write!(f, "unsupported version"),
            Self::MissingAlgorithmTag => write!(f, "a= tag missing"),
            Self::UnsupportedAlgorithm => write!(f, "unsupported algorithm"),
            Self::MissingSignatureTag => write!(f, "b= tag missing"),
            Self::MissingBodyHashTag => write!(f, "bh= tag missing"),
            Self::InvalidBase64 => write!(f, "invalid Base64 in b= or bh= tag"),
            Self::UnsupportedCanonicalization => write!(f, "unsupported canonicalization"),
            Self::MissingDomainTag => write!(f, "d= tag missing"),
            Self::InvalidDomain => write!(f, "invalid domain"),
            Self::MissingSignedHeadersTag => write!(f, "h= tag missing"),
            Self::InvalidSignedHeaders => write!(f, "invalid signed headers"),
            Self::FromHeaderNotSigned => write!(f, "From header not signed"),
            Self::InvalidUserId => write!(f, "invalid i= tag"),
            Self::DomainMismatch => write!(f, "i= domain not within d= domain"),
            Self::InvalidBodyLength => write!(f, "invalid body length"),
            Self::UnsupportedQueryMethod => write!(f, "unsupported query method"),
            Self::MissingSelectorTag => write!(f, "s= tag missing"),
            Self::InvalidSelector => write!(f, "invalid selector"),
            Self::InvalidTimestamp => write!(f, "invalid timestamp"),
            Self::InvalidExpiration => write!(f, "invalid expiration"),
            Self::ExpirationNotAfterTimestamp => write!(f, "expiration not after timestamp"),
            Self::Utf8Encoding => write!(f, "header value not UTF-8"),
        }
    }
}

/// An error that occurs when parsing a `DKIM-Signature` header value.
///
/// Carries the d= and s= values if they could be read, for diagnostics.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DkimSignatureError {
    pub domain: Option<DomainName>,
    pub selector: Option<Selector>,
    pub kind: DkimSignatureErrorKind,
}

impl Display for DkimSignatureError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl Error for DkimSignatureError {}

/// A DKIM signature.
#[derive(Clone, Eq, PartialEq)]
pub struct DkimSignature {
    pub algorithm: SignatureAlgorithm,
    pub signature_data: Box<[u8]>,
    pub body_hash: Box<[u8]>,
    pub canonicalization: Canonicalization,
    pub domain: DomainName,
    pub signed_headers: Box<[FieldName]>,
    pub user_id: Option<Identity>,
    pub body_length: Option<u64>,
    pub selector: Selector,
    pub timestamp: Option<u64>,
    pub expiration: Option<u64>,
    /// Tags not interpreted by this library, in order of appearance.
    pub extra_tags: Vec<(String, String)>,
}

impl DkimSignature {
    /// Parses the value of a `DKIM-Signature` header field.
    pub fn parse(value: &str) -> Result<Self, DkimSignatureError> {
        let tag_list = TagList::parse(value).map_err(|_| DkimSignatureError {
            domain: None,
            selector: None,
            kind: DkimSignatureErrorKind::InvalidTagList,
        })?;

        Self::from_tag_list(&tag_list).map_err(|kind| DkimSignatureError {
            domain: tag_list.get("d").and_then(|d| DomainName::new(d).ok()),
            selector: tag_list.get("s").and_then(|s| Selector::new(s).ok()),
            kind,
        })
    }

    fn from_tag_list(tag_list: &TagList<'_>) -> Result<Self, DkimSignatureErrorKind> {
        use DkimSignatureErrorKind::*;

        match tag_list.as_ref().first() {
            Some(TagSpec { name: "v", value: "1" }) => {}
            Some(TagSpec { name: "v", .. }) => return Err(UnsupportedVersion),
            _ => {
                // v= should come first, but is only required to be present
                match tag_list.get("v") {
                    Some("1") => {}
                    Some(_) => return Err(UnsupportedVersion),
                    None => return Err(MissingVersionTag),
                }
            }
        }

        let algorithm: SignatureAlgorithm = tag_list
            .get("a")
            .ok_or(MissingAlgorithmTag)?
            .parse()
            .map_err(|_| UnsupportedAlgorithm)?;

        let signature_data = decode_base64_tag(tag_list.get("b").ok_or(MissingSignatureTag)?)?;
        let body_hash = decode_base64_tag(tag_list.get("bh").ok_or(MissingBodyHashTag)?)?;

        let canonicalization: Canonicalization = match tag_list.get("c") {
            Some(c) => c.parse().map_err(|_| UnsupportedCanonicalization)?,
            None => Default::default(),
        };

        let domain = tag_list.get("d").ok_or(MissingDomainTag)?;
        let domain = DomainName::new(domain).map_err(|_| InvalidDomain)?;

        let signed_headers = tag_list.get("h").ok_or(MissingSignedHeadersTag)?;
        let signed_headers = tag_list::split_colon_separated(signed_headers)
            .map(FieldName::new)
            .collect::<Result<Box<[_]>, _>>()
            .map_err(|_| InvalidSignedHeaders)?;
        if !signed_headers.iter().any(|h| *h == "From") {
            return Err(FromHeaderNotSigned);
        }

        let user_id = match tag_list.get("i") {
            Some(i) => {
                let i = Identity::new(i).map_err(|_| InvalidUserId)?;
                if !i.domain_part.eq_or_subdomain_of(&domain) {
                    return Err(DomainMismatch);
                }
                Some(i)
            }
            None => None,
        };

        let body_length = parse_number(tag_list.get("l"), InvalidBodyLength)?;

        if let Some(q) = tag_list.get("q") {
            if !tag_list::split_colon_separated(q).any(|m| m.eq_ignore_ascii_case("dns/txt")) {
                return Err(UnsupportedQueryMethod);
            }
        }

        let selector = tag_list.get("s").ok_or(MissingSelectorTag)?;
        let selector = Selector::new(selector).map_err(|_| InvalidSelector)?;

        let timestamp = parse_number(tag_list.get("t"), InvalidTimestamp)?;
        let expiration = parse_number(tag_list.get("x"), InvalidExpiration)?;
        if let (Some(t), Some(x)) = (timestamp, expiration) {
            if x <= t {
                return Err(ExpirationNotAfterTimestamp);
            }
        }

        const KNOWN_TAGS: [&str; 13] =
            ["v", "a", "b", "bh", "c", "d", "h", "i", "l", "q", "s", "t", "x"];
        let extra_tags = tag_list
            .as_ref()
            .iter()
            .filter(|t| !KNOWN_TAGS.contains(&t.name))
            .map(|t| (t.name.into(), t.value.into()))
            .collect();

        Ok(Self {
            algorithm,
            signature_data,
            body_hash,
            canonicalization,
            domain,
            signed_headers,
            user_id,
            body_length,
            selector,
            timestamp,
            expiration,
            extra_tags,
        })
    }

    /// The identity this signature speaks for: i= if present, else `@` plus
    /// the d= domain.
    pub fn identity(&self) -> Identity {
        self.user_id
            .clone()
            .unwrap_or_else(|| Identity::from_domain(self.domain.clone()))
    }
}

impl Debug for DkimSignature {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("DkimSignature")
            .field("algorithm", &self.algorithm)
            .field("signature_data", &util::encode_base64(&self.signature_data))
            .field("body_hash", &util::encode_base64(&self.body_hash))
            .field("canonicalization", &self.canonicalization)
            .field("domain", &self.domain)
            .field("signed_headers", &self.signed_headers)
            .field("user_id", &self.user_id)
            .field("body_length", &self.body_length)
            .field("selector", &self.selector)
            .field("timestamp", &self.timestamp)
            .field("expiration", &self.expiration)
            .field("extra_tags", &self.extra_tags)
            .finish()
    }
}

fn decode_base64_tag(value: &str) -> Result<Box<[u8]>, DkimSignatureErrorKind> {
    util::decode_base64(value)
        .map(Into::into)
        .map_err(|_| DkimSignatureErrorKind::InvalidBase64)
}

fn parse_number(
    value: Option<&str>,
    error: DkimSignatureErrorKind,
) -> Result<Option<u64>, DkimSignatureErrorKind> {
    // at most 12 digits, RFC 6376, section 3.5
    match value {
        Some(v) if matches!(v.len(), 1..=12) && v.bytes().all(|b| b.is_ascii_digit()) => {
            v.parse().map(Some).map_err(|_| error)
        }
        Some(_) => Err(error),
        None => Ok(None),
    }
}

/// Removes the value of the b= tag from a `DKIM-Signature` header value,
/// leaving everything else (including whitespace around the tag) untouched.
pub fn strip_signature_data(value: &str) -> Cow<'_, str> {
    let mut start = 0;

    for segment in value.split(';') {
        let end = start + segment.len();

        if let Some((name, _)) = segment.split_once('=') {
            if name.trim_matches(|c| matches!(c, ' ' | '\t' | '\r' | '\n')) == "b" {
                let value_start = start + name.len() + 1;
                let mut result = String::with_capacity(value.len());
                result.push_str(&value[..value_start]);
                result.push_str(&value[end..]);
                return result.into();
            }
        }

        start = end + 1;
    }

    value.into()
}
