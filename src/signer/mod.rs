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

//! Signer and supporting types.

mod request;

pub use request::{
    validate_request, BodyLength, HeaderSelection, OutputFormat, SignRequest, Timestamp,
};

use crate::{
    crypto::SigningKey,
    header::HeaderFields,
    message_hash::{
        self, BodyHashError, BodyHasher, BodyHasherBuilder, BodyHasherKey, BodyHasherStance,
    },
    signature::{self, DkimSignature},
};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    time::SystemTime,
};
use tracing::trace;

/// An error that occurs when signing.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SignerError {
    KeyTypeMismatch,
    InvalidHeaderName,
    FromHeaderNotSigned,
    DomainMismatch,
    ZeroExpirationDuration,
    InvalidExtraTags,
    Overflow,
    MissingFromHeader,
    InsufficientBodyLength,
    SigningFailure,
}

impl Display for SignerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyTypeMismatch => write!(f, "signing key not usable with signature algorithm"),
            Self::InvalidHeaderName => write!(f, "invalid signature header name"),
            Self::FromHeaderNotSigned => write!(f, "From header not in signed headers"),
            Self::DomainMismatch => write!(f, "identity not within signing domain"),
            Self::ZeroExpirationDuration => write!(f, "zero validity duration"),
            Self::InvalidExtraTags => write!(f, "invalid additional tags"),
            Self::Overflow => write!(f, "integer too large"),
            Self::MissingFromHeader => write!(f, "no From header in message"),
            Self::InsufficientBodyLength => write!(f, "body shorter than requested length"),
            Self::SigningFailure => write!(f, "signing failed"),
        }
    }
}

impl Error for SignerError {}

/// A signature produced by a [`Signer`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SigningOutput {
    pub signature: DkimSignature,
    pub header_name: String,
    /// The folded header value, to be written after `header_name` and `": "`.
    pub header_value: String,
}

impl SigningOutput {
    /// Formats the complete header field, without the final CRLF.
    pub fn format_header(&self) -> String {
        format!("{}: {}", self.header_name, self.header_value)
    }
}

/// A signer for one message.
///
/// The body is hashed as it arrives; the header is supplied at the end.
pub struct Signer<T> {
    request: SignRequest<T>,
    body_hasher_key: BodyHasherKey,
    body_hasher: BodyHasher,
}

impl<T> Signer<T>
where
    T: AsRef<SigningKey>,
{
    pub fn prepare_signing(request: SignRequest<T>) -> Result<Self, SignerError> {
        validate_request(&request)?;

        let body_hasher_key = (
            request.body_length.to_limit()?,
            request.algorithm.hash_algorithm(),
            request.canonicalization.body,
        );

        let mut body_hasher = BodyHasherBuilder::new();
        body_hasher.register(body_hasher_key);

        Ok(Self {
            request,
            body_hasher_key,
            body_hasher: body_hasher.build(),
        })
    }

    pub fn body_chunk(&mut self, chunk: &[u8]) -> BodyHasherStance {
        self.body_hasher.hash_chunk(chunk)
    }

    pub fn finish(self, headers: &HeaderFields) -> Result<SigningOutput, SignerError> {
        let request = self.request;

        if !headers.contains("From") {
            return Err(SignerError::MissingFromHeader);
        }

        let results = self.body_hasher.finish();
        let (body_hash, hashed_len) = match results.get(&self.body_hasher_key) {
            Some(Ok((hash, len))) => (hash.clone(), *len),
            Some(Err(BodyHashError::InsufficientInput)) | None => {
                return Err(SignerError::InsufficientBodyLength);
            }
        };

        let body_length = match request.body_length {
            BodyLength::All => None,
            BodyLength::OnlyMessageLength | BodyLength::Exact(_) => {
                Some(u64::try_from(hashed_len).map_err(|_| SignerError::Overflow)?)
            }
        };

        let timestamp = request.timestamp.map(|t| match t {
            Timestamp::Now => now_unix_secs(),
            Timestamp::Exact(t) => t,
        });
        let expiration = request
            .valid_duration
            .map(|d| timestamp.unwrap_or_else(now_unix_secs).saturating_add(d.as_secs()));

        let mut sig = DkimSignature {
            algorithm: request.algorithm,
            signature_data: Box::default(),
            body_hash,
            canonicalization: request.canonicalization,
            domain: request.domain,
            signed_headers: request.header_selection.select(headers).into(),
            user_id: request.identity,
            body_length,
            selector: request.selector,
            timestamp,
            expiration,
            extra_tags: request.extra_tags,
        };

        let format = &request.format;
        let (mut header_value, column) = signature::format_without_signature_data(
            &sig,
            format.line_width,
            format.header_name.chars().count() + 2,
        );

        let hash_alg = sig.algorithm.hash_algorithm();

        let data_hash = message_hash::compute_data_hash(
            hash_alg,
            sig.canonicalization.header,
            headers,
            &sig.signed_headers,
            &format.header_name,
            &format!(" {header_value}"),
        );

        let signing_key = request.signing_key.as_ref();
        let signature_data = signing_key.sign(hash_alg, &data_hash).map_err(|e| {
            trace!("signing with {:?} key failed: {e}", signing_key.key_type());
            SignerError::SigningFailure
        })?;

        signature::append_signature_data(
            &mut header_value,
            format.line_width,
            column,
            &signature_data,
        );
        sig.signature_data = signature_data.into();

        Ok(SigningOutput {
            signature: sig,
            header_name: request.format.header_name,
            header_value,
        })
    }
}

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |t| t.as_secs())
}
