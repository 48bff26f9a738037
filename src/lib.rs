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

//! Sign or verify a single email message with *DomainKeys Identified Mail*
//! (DKIM, [RFC 6376]).
//!
//! The binary `dkim-testmsg` reads a message from standard input. Given a
//! domain, a selector, and a private key file, it prints a `DKIM-Signature`
//! header followed by the original message; given no options, it verifies
//! the signatures the message carries, looking up public keys in DNS.
//!
//! The library behind it is organised in layers:
//!
//! * [`driver`]: command-line options and the read, spool, and emit loop
//! * [`session`]: chunked intake of one message, ending in a signature or in
//!   verification results
//! * [`signer`] and [`verifier`]: the DKIM signing and verification
//!   procedures
//! * building blocks for header and body canonicalization, hashing,
//!   cryptography, signature and key record formats
//!
//! # Cargo features
//!
//! The feature **`hickory-resolver`** (enabled by default, and required by
//! the binary) makes an implementation of
//! [`LookupTxt`][crate::verifier::LookupTxt] available for the Hickory DNS
//! resolver.
//!
//! [RFC 6376]: https://www.rfc-editor.org/rfc/rfc6376

pub mod canonicalize;
pub mod crypto;
pub mod driver;
pub mod header;
pub mod message_hash;
pub mod record;
pub mod session;
pub mod signature;
pub mod signer;
mod tag_list;
mod util;
pub mod verifier;

pub use crate::{
    crypto::SigningKey,
    driver::{DriverError, ExitStatus, Mode, Options},
    header::{FieldBody, FieldName, HeaderField, HeaderFields},
    session::{Engine, EngineError, Session, SessionError},
    signature::{DomainName, Selector, SignatureAlgorithm},
    signer::{SignRequest, Signer, SignerError, SigningOutput},
    util::{decode_base64, encode_base64, Base64Error, CanonicalStr},
    verifier::{Config, VerificationResult, VerificationStatus, Verifier, VerifierError},
};
