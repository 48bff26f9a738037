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

//! Keys, hashing, and the RSA and Ed25519 signature primitives.
//!
//! Public keys found in DNS come in more than one format in practice. For RSA
//! the de facto standard is SubjectPublicKeyInfo (as in the example in
//! RFC 6376, appendix C), while section 3.6.1 specifies RSAPublicKey; both are
//! accepted. For Ed25519, RFC 8463 specifies the raw 32 key bytes, but OpenSSL
//! hands out SubjectPublicKeyInfo; again both are accepted.

mod ed25519;
mod hash;
mod rsa;

pub use self::{
    ed25519::{read_ed25519_verifying_key, sign_ed25519, verify_ed25519},
    hash::{digest_slices, CountingHasher, HashStatus, InsufficientInput},
    rsa::{read_rsa_public_key, rsa_key_bits, sign_rsa, verify_rsa},
};

use crate::util::{decode_base64, CanonicalStr};
use ::rsa::{
    pkcs1::DecodeRsaPrivateKey, pkcs8::DecodePrivateKey, RsaPrivateKey, RsaPublicKey,
};
use ed25519_dalek::{SigningKey as Ed25519SigningKey, VerifyingKey as Ed25519VerifyingKey};
use pkcs8::der::Document;
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    str,
};

const PKCS8_LABEL: &str = "PRIVATE KEY";
const PKCS1_LABEL: &str = "RSA PRIVATE KEY";

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum KeyType {
    Rsa,
    Ed25519,
}

impl CanonicalStr for KeyType {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::Rsa => "rsa",
            Self::Ed25519 => "ed25519",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
}

impl CanonicalStr for HashAlgorithm {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }
}

/// An error that occurs when reading private key material.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum KeyError {
    Malformed,
    UnsupportedFormat,
    UnsupportedKeyType,
}

impl Display for KeyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed private key data"),
            Self::UnsupportedFormat => write!(f, "unsupported private key format"),
            Self::UnsupportedKeyType => write!(f, "unsupported private key type"),
        }
    }
}

impl Error for KeyError {}

/// A private key used for signing.
#[derive(Debug)]
pub enum SigningKey {
    Rsa(RsaPrivateKey),
    Ed25519(Ed25519SigningKey),
}

impl SigningKey {
    /// Reads a private key from the contents of a key file.
    ///
    /// Accepted are PEM documents in PKCS#8 (`PRIVATE KEY`) or PKCS#1 (`RSA
    /// PRIVATE KEY`) format, Base64-encoded DER without PEM armour, and plain
    /// DER.
    pub fn from_key_data(data: &[u8]) -> Result<Self, KeyError> {
        match str::from_utf8(data).map(str::trim_start) {
            Ok(s) if s.starts_with("-----BEGIN ") => Self::from_pem(s),
            Ok(s) => {
                let der = decode_base64(s).map_err(|_| KeyError::Malformed)?;
                Self::from_der(&der)
            }
            Err(_) => Self::from_der(data),
        }
    }

    fn from_pem(s: &str) -> Result<Self, KeyError> {
        let (label, doc) = Document::from_pem(s).map_err(|_| KeyError::Malformed)?;

        match label {
            PKCS8_LABEL => Self::from_pkcs8_der(doc.as_bytes()),
            PKCS1_LABEL => RsaPrivateKey::from_pkcs1_der(doc.as_bytes())
                .map(Self::Rsa)
                .map_err(|_| KeyError::Malformed),
            _ => Err(KeyError::UnsupportedFormat),
        }
    }

    fn from_der(der: &[u8]) -> Result<Self, KeyError> {
        if let Ok(k) = RsaPrivateKey::from_pkcs1_der(der) {
            return Ok(Self::Rsa(k));
        }
        Self::from_pkcs8_der(der)
    }

    fn from_pkcs8_der(der: &[u8]) -> Result<Self, KeyError> {
        if let Ok(k) = RsaPrivateKey::from_pkcs8_der(der) {
            Ok(Self::Rsa(k))
        } else if let Ok(k) = Ed25519SigningKey::from_pkcs8_der(der) {
            Ok(Self::Ed25519(k))
        } else if pkcs8::PrivateKeyInfo::try_from(der).is_ok() {
            Err(KeyError::UnsupportedKeyType)
        } else {
            Err(KeyError::Malformed)
        }
    }

    pub fn key_type(&self) -> KeyType {
        match self {
            Self::Rsa(_) => KeyType::Rsa,
            Self::Ed25519(_) => KeyType::Ed25519,
        }
    }

    pub fn key_bits(&self) -> usize {
        match self {
            Self::Rsa(k) => rsa_key_bits(&RsaPublicKey::from(k)),
            Self::Ed25519(_) => 256,
        }
    }

    /// Signs a precomputed data hash.
    pub fn sign(&self, hash_alg: HashAlgorithm, data_hash: &[u8]) -> Result<Vec<u8>, SigningError> {
        match self {
            Self::Rsa(k) => sign_rsa(hash_alg, k, data_hash),
            Self::Ed25519(k) => Ok(sign_ed25519(k, data_hash)),
        }
    }
}

impl AsRef<SigningKey> for SigningKey {
    fn as_ref(&self) -> &Self {
        self
    }
}

/// A public key used for verification.
#[derive(Debug)]
pub enum VerifyingKey {
    Rsa(RsaPublicKey),
    Ed25519(Ed25519VerifyingKey),
}

impl VerifyingKey {
    pub fn from_key_data(key_type: KeyType, key_data: &[u8]) -> Result<Self, VerificationError> {
        match key_type {
            KeyType::Rsa => read_rsa_public_key(key_data).map(Self::Rsa),
            KeyType::Ed25519 => read_ed25519_verifying_key(key_data).map(Self::Ed25519),
        }
    }

    /// The key size in bits, for RSA keys only.
    pub fn key_size(&self) -> Option<usize> {
        match self {
            Self::Rsa(k) => Some(rsa_key_bits(k)),
            Self::Ed25519(_) => None,
        }
    }

    pub fn verify(
        &self,
        hash_alg: HashAlgorithm,
        data_hash: &[u8],
        signature_data: &[u8],
    ) -> Result<(), VerificationError> {
        match self {
            Self::Rsa(k) => verify_rsa(hash_alg, k, data_hash, signature_data),
            Self::Ed25519(k) => verify_ed25519(k, data_hash, signature_data),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum VerificationError {
    InvalidKey,
    InsufficientKeySize,
    InvalidSignature,
    VerificationFailure,
}

impl Display for VerificationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKey => write!(f, "invalid key data"),
            Self::InsufficientKeySize => write!(f, "key too small"),
            Self::InvalidSignature => write!(f, "invalid signature data"),
            Self::VerificationFailure => write!(f, "signature verification failed"),
        }
    }
}

impl Error for VerificationError {}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SigningError {
    SigningFailure,
}

impl Display for SigningError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::SigningFailure => write!(f, "signing failed"),
        }
    }
}

impl Error for SigningError {}
