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

//! DKIM public key records, RFC 6376, section 3.6.1.

use crate::{
    crypto::{HashAlgorithm, KeyType},
    tag_list::{self, TagList},
    util,
};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    str::FromStr,
};

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum ServiceType {
    Any,
    Email,
    Other(Box<str>),
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Flag {
    /// `y`: the domain is testing DKIM.
    Testing,
    /// `s`: i= must not be a subdomain of d=.
    NoSubdomains,
    Other(Box<str>),
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DkimKeyRecordError {
    TagListSyntax,
    MisplacedVersionTag,
    UnsupportedVersion,
    NoSupportedHashAlgorithms,
    UnsupportedKeyType,
    MissingKeyTag,
    RevokedKey,
    InvalidBase64,
    ServiceTypesEmpty,
}

impl Display for DkimKeyRecordError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::TagListSyntax => write!(f, "invalid tag-list"),
            Self::MisplacedVersionTag => write!(f, "v= tag not initial"),
            Self::UnsupportedVersion => write!(f, "unsupported version"),
            Self::NoSupportedHashAlgorithms => write!(f, "no supported hash algorithms"),
            Self::UnsupportedKeyType => write!(f, "unsupported key type"),
            Self::MissingKeyTag => write!(f, "p= tag missing"),
            Self::RevokedKey => write!(f, "key revoked"),
            Self::InvalidBase64 => write!(f, "invalid Base64 in p= tag"),
            Self::ServiceTypesEmpty => write!(f, "service types empty"),
        }
    }
}

impl Error for DkimKeyRecordError {}

/// A DKIM public key record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DkimKeyRecord {
    pub hash_algorithms: Vec<HashAlgorithm>,
    pub key_type: KeyType,
    pub notes: Option<String>,
    pub key_data: Box<[u8]>,
    pub service_types: Vec<ServiceType>,
    pub flags: Vec<Flag>,
}

impl DkimKeyRecord {
    pub fn is_testing(&self) -> bool {
        self.flags.contains(&Flag::Testing)
    }

    pub fn allows_subdomains(&self) -> bool {
        !self.flags.contains(&Flag::NoSubdomains)
    }

    pub fn allows_email(&self) -> bool {
        self.service_types
            .iter()
            .any(|s| matches!(s, ServiceType::Any | ServiceType::Email))
    }

    fn from_tag_list(tag_list: &TagList<'_>) -> Result<Self, DkimKeyRecordError> {
        use DkimKeyRecordError::*;

        let mut record = Self {
            hash_algorithms: vec![HashAlgorithm::Sha1, HashAlgorithm::Sha256],
            key_type: KeyType::Rsa,
            notes: None,
            key_data: Box::default(),
            service_types: vec![ServiceType::Any],
            flags: vec![],
        };
        let mut key_seen = false;

        for (i, tag) in tag_list.as_ref().iter().enumerate() {
            let value = tag.value;

            match tag.name {
                "v" if i != 0 => return Err(MisplacedVersionTag),
                "v" if value != "DKIM1" => return Err(UnsupportedVersion),
                "h" => {
                    record.hash_algorithms = tag_list::split_colon_separated(value)
                        .filter_map(|s| {
                            if s.eq_ignore_ascii_case("sha1") {
                                Some(HashAlgorithm::Sha1)
                            } else if s.eq_ignore_ascii_case("sha256") {
                                Some(HashAlgorithm::Sha256)
                            } else {
                                None
                            }
                        })
                        .collect();
                    if record.hash_algorithms.is_empty() {
                        return Err(NoSupportedHashAlgorithms);
                    }
                }
                "k" => {
                    record.key_type = if value.eq_ignore_ascii_case("rsa") {
                        KeyType::Rsa
                    } else if value.eq_ignore_ascii_case("ed25519") {
                        KeyType::Ed25519
                    } else {
                        return Err(UnsupportedKeyType);
                    };
                }
                "n" => {
                    record.notes = Some(value.into());
                }
                "p" => {
                    if value.is_empty() {
                        return Err(RevokedKey);
                    }
                    let key_data = util::decode_base64(value).map_err(|_| InvalidBase64)?;
                    record.key_data = key_data.into();
                    key_seen = true;
                }
                "s" => {
                    record.service_types = tag_list::split_colon_separated(value)
                        .filter(|s| !s.is_empty())
                        .map(|s| match s {
                            "*" => ServiceType::Any,
                            s if s.eq_ignore_ascii_case("email") => ServiceType::Email,
                            s => ServiceType::Other(s.into()),
                        })
                        .collect();
                    if record.service_types.is_empty() {
                        return Err(ServiceTypesEmpty);
                    }
                }
                "t" => {
                    record.flags = tag_list::split_colon_separated(value)
                        .filter(|s| !s.is_empty())
                        .map(|s| match s {
                            s if s.eq_ignore_ascii_case("y") => Flag::Testing,
                            s if s.eq_ignore_ascii_case("s") => Flag::NoSubdomains,
                            s => Flag::Other(s.into()),
                        })
                        .collect();
                }
                _ => {}
            }
        }

        if !key_seen {
            return Err(MissingKeyTag);
        }

        Ok(record)
    }
}

impl FromStr for DkimKeyRecord {
    type Err = DkimKeyRecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag_list = TagList::parse(s).map_err(|_| DkimKeyRecordError::TagListSyntax)?;

        Self::from_tag_list(&tag_list)
    }
}
