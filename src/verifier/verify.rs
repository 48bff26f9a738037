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
    crypto::VerifyingKey,
    header::HeaderFields,
    message_hash::{self, BodyHashError, BodyHashResults},
    record::DkimKeyRecord,
    signature::{self, DkimSignature},
    util,
    verifier::{Config, PolicyError, VerifierError},
};
use tracing::trace;

/// Checks the signature itself against the public key.
///
/// `name` and `value` are the `DKIM-Signature` header field as it appeared in
/// the message.
pub fn verify_header_signature(
    headers: &HeaderFields,
    public_key: &VerifyingKey,
    sig: &DkimSignature,
    name: &str,
    value: &str,
) -> Result<(), VerifierError> {
    let hash_alg = sig.algorithm.hash_algorithm();

    let data_hash = message_hash::compute_data_hash(
        hash_alg,
        sig.canonicalization.header,
        headers,
        &sig.signed_headers,
        name,
        &signature::strip_signature_data(value),
    );

    match public_key.verify(hash_alg, &data_hash, &sig.signature_data) {
        Ok(()) => {
            trace!("signature verified");
            Ok(())
        }
        Err(e) => {
            trace!("signature verification failed: {e}");
            Err(VerifierError::VerificationFailure(e))
        }
    }
}

/// Checks that a key record may be used with the given signature.
pub fn validate_key_record(
    record: &DkimKeyRecord,
    sig: &DkimSignature,
) -> Result<(), VerifierError> {
    if record.key_type != sig.algorithm.key_type() {
        trace!("wrong public key type");
        return Err(VerifierError::WrongKeyType);
    }
    if !record.hash_algorithms.contains(&sig.algorithm.hash_algorithm()) {
        trace!("hash algorithm not listed in key record");
        return Err(VerifierError::DisallowedHashAlgorithm);
    }
    if !record.allows_email() {
        trace!("key record not for email");
        return Err(VerifierError::DisallowedServiceType);
    }
    if !record.allows_subdomains() {
        if let Some(user_id) = &sig.user_id {
            if user_id.domain_part.to_ascii() != sig.domain.to_ascii() {
                trace!("i= domain is a subdomain, not permitted by key record");
                return Err(VerifierError::DomainMismatch);
            }
        }
    }

    Ok(())
}

/// Reads the public key from a key record and checks its size.
pub fn read_public_key(
    record: &DkimKeyRecord,
    config: &Config,
) -> Result<VerifyingKey, VerifierError> {
    let public_key = VerifyingKey::from_key_data(record.key_type, &record.key_data)
        .map_err(VerifierError::VerificationFailure)?;

    if let Some(bits) = public_key.key_size() {
        if bits < config.min_key_bits {
            trace!(bits, "public key too small");
            return Err(VerifierError::Policy(PolicyError::KeyTooSmall));
        }
    }

    Ok(public_key)
}

/// Compares the body hash in the signature with the computed one.
pub fn verify_body_hash(
    sig: &DkimSignature,
    results: &BodyHashResults,
) -> Result<(), VerifierError> {
    let key = message_hash::body_hasher_key(sig);

    match results.get(&key) {
        Some(Ok((hash, _))) if *hash == sig.body_hash => {
            trace!("body hash matched");
            Ok(())
        }
        Some(Ok((hash, _))) => {
            trace!("body hash mismatch: {}", util::encode_base64(hash));
            Err(VerifierError::BodyHashMismatch)
        }
        Some(Err(BodyHashError::InsufficientInput)) => {
            trace!("body shorter than l= value");
            Err(VerifierError::InsufficientBodyLength)
        }
        None => {
            trace!("no body hash computed for signature");
            Err(VerifierError::BodyHashMismatch)
        }
    }
}

/// Checks t= and x= against the current time.
pub fn check_timestamps(sig: &DkimSignature, config: &Config) -> Result<(), VerifierError> {
    let now = config.current_timestamp();
    let delta = config.time_tolerance.as_secs();

    if config.fail_if_expired {
        if let Some(x) = sig.expiration {
            if now >= x.saturating_add(delta) {
                return Err(VerifierError::Policy(PolicyError::SignatureExpired));
            }
        }
    }
    if config.fail_if_in_future {
        if let Some(t) = sig.timestamp {
            if t.saturating_sub(delta) > now {
                return Err(VerifierError::Policy(PolicyError::TimestampInFuture));
            }
        }
    }

    Ok(())
}
