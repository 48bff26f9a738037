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

//! Verifier and supporting types.

mod lookup;
mod verify;

pub use lookup::LookupTxt;

use crate::{
    crypto::{HashAlgorithm, VerificationError},
    header::HeaderFields,
    message_hash::{self, BodyHasher, BodyHasherBuilder, BodyHasherStance},
    record::{DkimKeyRecord, DkimKeyRecordError},
    signature::{DkimSignature, DkimSignatureError, DkimSignatureErrorKind, DKIM_SIGNATURE_NAME},
    util::CanonicalStr,
};
use std::{
    collections::{hash_map::Entry, HashMap},
    error::Error,
    fmt::{self, Display, Formatter},
    io::{self, ErrorKind},
    str,
    sync::Arc,
    time::{Duration, SystemTime},
};
use tracing::{debug, trace};

/// Configuration for a verifier process.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// The maximum duration of one public key record lookup. When this
    /// duration is exceeded evaluation fails (temporary error).
    pub lookup_timeout: Duration,

    /// Only validate at most this number of signatures, any extra signatures
    /// are ignored.
    pub max_signatures: usize,

    /// Minimum acceptable key size in bits. When the key size of an RSA public
    /// key is below this limit, the signature will not validate.
    pub min_key_bits: usize,

    /// When this flag is set, signatures using the SHA-1 hash algorithm are
    /// acceptable.
    pub allow_sha1: bool,

    /// When this flag is set, an expired DKIM signature (x=) will not validate.
    pub fail_if_expired: bool,

    /// When this flag is set, a DKIM signature with a timestamp in the future
    /// (t=) will not validate.
    pub fail_if_in_future: bool,

    /// Tolerance applied to time values when checking signature expiration or
    /// timestamp validity, to allow for clock drift. Resolution is in seconds.
    pub time_tolerance: Duration,

    /// The `SystemTime` value to use as the instant ‘now’.
    pub fixed_system_time: Option<SystemTime>,
}

impl Config {
    fn current_timestamp(&self) -> u64 {
        self.fixed_system_time
            .unwrap_or_else(SystemTime::now)
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lookup_timeout: Duration::from_secs(10),
            max_signatures: 10,
            min_key_bits: 1024,
            allow_sha1: false,
            fail_if_expired: true,
            fail_if_in_future: true,
            time_tolerance: Duration::from_secs(30),
            fixed_system_time: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PolicyError {
    SignatureExpired,
    TimestampInFuture,
    DisallowedSha1Hash,
    KeyTooSmall,
}

impl Display for PolicyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::SignatureExpired => write!(f, "signature expired"),
            Self::TimestampInFuture => write!(f, "timestamp in future"),
            Self::DisallowedSha1Hash => write!(f, "hash algorithm SHA-1 not acceptable"),
            Self::KeyTooSmall => write!(f, "public key size too small"),
        }
    }
}

impl Error for PolicyError {}

/// A verification result arrived at for some DKIM signature header.
#[derive(Debug, PartialEq)]
pub struct VerificationResult {
    /// The verification status.
    pub status: VerificationStatus,
    /// The index of the evaluated *DKIM-Signature* header in the message
    /// header.
    pub index: usize,
    /// The parsed DKIM signature, if available.
    pub signature: Option<DkimSignature>,
    /// The key record used in the last verification attempt, if any.
    ///
    /// The record is behind an `Arc` so that it may be shared among the
    /// results for signatures with the same domain and selector.
    pub key_record: Option<Arc<DkimKeyRecord>>,
    /// The public key size in bits, for RSA keys.
    pub key_size: Option<usize>,
}

impl VerificationResult {
    /// Whether the key record marks the signing domain as testing DKIM.
    pub fn is_testing(&self) -> bool {
        self.key_record.as_ref().map_or(false, |r| r.is_testing())
    }
}

/// The verification status of an evaluated DKIM signature.
///
/// `Success` corresponds to the RFC 6376 *SUCCESS* state, `Failure` to both
/// *PERMFAIL* and *TEMPFAIL*.
#[derive(Clone, Debug, PartialEq)]
pub enum VerificationStatus {
    Success,
    Failure(VerifierError),
}

impl VerificationStatus {
    /// Converts this verification status to an RFC 8601 DKIM result.
    pub fn to_dkim_auth_result(&self) -> DkimAuthResult {
        use VerifierError::*;

        match self {
            Self::Success => DkimAuthResult::Pass,
            Self::Failure(error) => match error {
                DkimSignatureFormat(_) | Overflow => DkimAuthResult::Neutral,
                WrongKeyType
                | KeyRecordFormat(_)
                | KeyRevoked
                | DisallowedHashAlgorithm
                | DisallowedServiceType
                | DomainMismatch
                | InsufficientBodyLength
                | InvalidKeyDomain
                | NoKeyFound => DkimAuthResult::Permerror,
                VerificationFailure(VerificationError::VerificationFailure) | BodyHashMismatch => {
                    DkimAuthResult::Fail
                }
                VerificationFailure(_) => DkimAuthResult::Permerror,
                KeyLookupTimeout | KeyLookup => DkimAuthResult::Temperror,
                Policy(_) => DkimAuthResult::Policy,
            },
        }
    }
}

/// An error that causes a signature to fail verification.
#[derive(Clone, Debug, PartialEq)]
pub enum VerifierError {
    DkimSignatureFormat(DkimSignatureError),
    WrongKeyType,
    KeyRecordFormat(DkimKeyRecordError),
    KeyRevoked,
    DisallowedHashAlgorithm,
    DisallowedServiceType,
    DomainMismatch,
    VerificationFailure(VerificationError),
    BodyHashMismatch,
    InsufficientBodyLength,
    NoKeyFound,
    InvalidKeyDomain,
    KeyLookupTimeout,
    KeyLookup,
    Policy(PolicyError),
    Overflow,
}

impl Display for VerifierError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::DkimSignatureFormat(error) => error.fmt(f),
            Self::WrongKeyType => write!(f, "wrong key type"),
            Self::KeyRecordFormat(error) => write!(f, "invalid key record: {error}"),
            Self::KeyRevoked => write!(f, "key in key record revoked"),
            Self::DisallowedHashAlgorithm => write!(f, "hash algorithm not allowed"),
            Self::DisallowedServiceType => write!(f, "service type not allowed"),
            Self::DomainMismatch => write!(f, "domain mismatch"),
            Self::VerificationFailure(error) => error.fmt(f),
            Self::BodyHashMismatch => write!(f, "body hash mismatch"),
            Self::InsufficientBodyLength => write!(f, "truncated body"),
            Self::NoKeyFound => write!(f, "no key record found"),
            Self::InvalidKeyDomain => write!(f, "invalid key record domain name"),
            Self::KeyLookupTimeout => write!(f, "key record lookup timed out"),
            Self::KeyLookup => write!(f, "key record lookup failed"),
            Self::Policy(error) => error.fmt(f),
            Self::Overflow => write!(f, "integer size too large"),
        }
    }
}

impl Error for VerifierError {}

/// An RFC 8601 DKIM result.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DkimAuthResult {
    /// The message was not signed.
    None,
    Pass,
    /// The signature was understood, and cryptographic or body hash
    /// verification failed.
    Fail,
    /// The signature was not accepted for a configurable policy reason.
    Policy,
    /// The signature could not be understood, for example because of a syntax
    /// error or an unsupported algorithm.
    Neutral,
    /// Evaluation could not be performed for a temporary reason, such as a
    /// DNS timeout.
    Temperror,
    /// The signature is definitely broken or not verifiable.
    Permerror,
}

impl CanonicalStr for DkimAuthResult {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Policy => "policy",
            Self::Neutral => "neutral",
            Self::Temperror => "temperror",
            Self::Permerror => "permerror",
        }
    }
}

impl Display for DkimAuthResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_str())
    }
}

enum VerifierTask {
    Failed {
        index: usize,
        signature: Option<DkimSignature>,
        error: VerifierError,
    },
    Pending {
        index: usize,
        signature: DkimSignature,
        name: Box<str>,
        value: Box<str>,
    },
}

type KeyRecords = Result<Vec<Result<Arc<DkimKeyRecord>, VerifierError>>, VerifierError>;

/// A verifier of the DKIM signatures in one message.
///
/// The verifier is created from the message header; the body is then fed in
/// chunks with [`body_chunk`][Verifier::body_chunk], and finally
/// [`finish`][Verifier::finish] looks up the public keys and returns one
/// result per evaluated signature.
pub struct Verifier {
    config: Config,
    headers: HeaderFields,
    tasks: Vec<VerifierTask>,
    body_hasher: BodyHasher,
}

impl Verifier {
    /// Finds the `DKIM-Signature` headers in the message header and prepares
    /// body hashing for each well-formed signature.
    pub fn new(headers: HeaderFields, config: &Config) -> Self {
        let mut tasks = vec![];
        let mut body_hasher = BodyHasherBuilder::new();

        let dkim_headers = headers
            .iter()
            .enumerate()
            .filter(|(_, (name, _))| *name == DKIM_SIGNATURE_NAME)
            .take(config.max_signatures);

        for (index, (name, value)) in dkim_headers {
            let value = match str::from_utf8(value.as_ref()) {
                Ok(value) => value,
                Err(_) => {
                    let error = DkimSignatureError {
                        domain: None,
                        selector: None,
                        kind: DkimSignatureErrorKind::Utf8Encoding,
                    };
                    tasks.push(VerifierTask::Failed {
                        index,
                        signature: None,
                        error: VerifierError::DkimSignatureFormat(error),
                    });
                    continue;
                }
            };

            let sig = match DkimSignature::parse(value) {
                Ok(sig) => sig,
                Err(e) => {
                    trace!("unusable DKIM-Signature header: {e}");
                    tasks.push(VerifierTask::Failed {
                        index,
                        signature: None,
                        error: VerifierError::DkimSignatureFormat(e),
                    });
                    continue;
                }
            };

            if let Err(error) = check_signature(&sig, config) {
                trace!(
                    domain = %sig.domain,
                    selector = %sig.selector,
                    "signature not acceptable: {error}"
                );
                tasks.push(VerifierTask::Failed {
                    index,
                    signature: Some(sig),
                    error,
                });
                continue;
            }

            body_hasher.register(message_hash::body_hasher_key(&sig));

            tasks.push(VerifierTask::Pending {
                index,
                signature: sig,
                name: name.as_ref().into(),
                value: value.into(),
            });
        }

        Self {
            config: config.clone(),
            headers,
            tasks,
            body_hasher: body_hasher.build(),
        }
    }

    /// Whether the message carries any `DKIM-Signature` header.
    pub fn has_signatures(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Processes a chunk of the (CRLF-normalized) message body.
    pub fn body_chunk(&mut self, chunk: &[u8]) -> BodyHasherStance {
        self.body_hasher.hash_chunk(chunk)
    }

    /// Looks up the public keys, completes verification, and returns the
    /// results in header order.
    pub async fn finish<T>(self, resolver: &T) -> Vec<VerificationResult>
    where
        T: LookupTxt + ?Sized,
    {
        let Self {
            config,
            headers,
            tasks,
            body_hasher,
        } = self;

        let body_hashes = body_hasher.finish();

        // records are looked up once per domain and selector
        let mut key_records: HashMap<(String, String), KeyRecords> = HashMap::new();

        let mut results = Vec::with_capacity(tasks.len());

        for task in tasks {
            let result = match task {
                VerifierTask::Failed {
                    index,
                    signature,
                    error,
                } => VerificationResult {
                    status: VerificationStatus::Failure(error),
                    index,
                    signature,
                    key_record: None,
                    key_size: None,
                },
                VerifierTask::Pending {
                    index,
                    signature,
                    name,
                    value,
                } => {
                    let lookup_key = (signature.domain.to_ascii(), signature.selector.to_ascii());

                    let records = match key_records.entry(lookup_key) {
                        Entry::Occupied(entry) => entry.into_mut(),
                        Entry::Vacant(entry) => {
                            let (domain, selector) = entry.key();
                            let records =
                                fetch_key_records(resolver, domain, selector, &config).await;
                            entry.insert(records)
                        }
                    };

                    let mut result = VerificationResult {
                        status: VerificationStatus::Failure(VerifierError::NoKeyFound),
                        index,
                        signature: None,
                        key_record: None,
                        key_size: None,
                    };

                    match records {
                        Ok(records) => verify_with_records(
                            &mut result,
                            &signature,
                            &name,
                            &value,
                            records,
                            &headers,
                            &config,
                        ),
                        Err(e) => result.status = VerificationStatus::Failure(e.clone()),
                    }

                    if result.status == VerificationStatus::Success {
                        if let Err(e) = verify::verify_body_hash(&signature, &body_hashes) {
                            result.status = VerificationStatus::Failure(e);
                        }
                    }

                    result.signature = Some(signature);
                    result
                }
            };

            debug!(
                index = result.index,
                result = %result.status.to_dkim_auth_result(),
                "signature evaluated"
            );

            results.push(result);
        }

        results
    }
}

fn check_signature(sig: &DkimSignature, config: &Config) -> Result<(), VerifierError> {
    if let Some(len) = sig.body_length {
        // signed body length too large to process on this platform
        usize::try_from(len).map_err(|_| VerifierError::Overflow)?;
    }

    if sig.algorithm.hash_algorithm() == HashAlgorithm::Sha1 && !config.allow_sha1 {
        return Err(VerifierError::Policy(PolicyError::DisallowedSha1Hash));
    }

    verify::check_timestamps(sig, config)
}

async fn fetch_key_records<T>(
    resolver: &T,
    domain: &str,
    selector: &str,
    config: &Config,
) -> KeyRecords
where
    T: LookupTxt + ?Sized,
{
    let txts = lookup::look_up_records(resolver, domain, selector, config.lookup_timeout)
        .await
        .map_err(map_lookup_error)?;

    if txts.is_empty() {
        trace!("no key record");
        return Err(VerifierError::NoKeyFound);
    }

    let records = txts
        .into_iter()
        .map(|txt| match txt {
            Ok(s) => s.parse().map(Arc::new).map_err(|e| match e {
                DkimKeyRecordError::RevokedKey => VerifierError::KeyRevoked,
                e => VerifierError::KeyRecordFormat(e),
            }),
            Err(e) => {
                trace!("unusable TXT record: {e}");
                Err(VerifierError::KeyRecordFormat(DkimKeyRecordError::TagListSyntax))
            }
        })
        .collect();

    Ok(records)
}

fn map_lookup_error(e: io::Error) -> VerifierError {
    match e.kind() {
        ErrorKind::NotFound => {
            trace!("no key record");
            VerifierError::NoKeyFound
        }
        ErrorKind::InvalidInput => {
            trace!("invalid key record domain name");
            VerifierError::InvalidKeyDomain
        }
        ErrorKind::TimedOut => {
            trace!("key record lookup timed out");
            VerifierError::KeyLookupTimeout
        }
        _ => {
            trace!("could not look up key record: {e}");
            VerifierError::KeyLookup
        }
    }
}

// Tries each record in turn; the first success wins, otherwise the last
// error is the result.
fn verify_with_records(
    result: &mut VerificationResult,
    sig: &DkimSignature,
    name: &str,
    value: &str,
    records: &[Result<Arc<DkimKeyRecord>, VerifierError>],
    headers: &HeaderFields,
    config: &Config,
) {
    for (i, record) in records.iter().enumerate() {
        trace!("trying verification using key record {}", i + 1);

        result.key_record = None;
        result.key_size = None;

        let record = match record {
            Ok(record) => record,
            Err(e) => {
                result.status = VerificationStatus::Failure(e.clone());
                continue;
            }
        };

        result.key_record = Some(record.clone());

        let public_key = match verify::validate_key_record(record, sig)
            .and_then(|()| verify::read_public_key(record, config))
        {
            Ok(public_key) => public_key,
            Err(e) => {
                result.status = VerificationStatus::Failure(e);
                continue;
            }
        };

        result.key_size = public_key.key_size();

        match verify::verify_header_signature(headers, &public_key, sig, name, value) {
            Ok(()) => {
                result.status = VerificationStatus::Success;
                return;
            }
            Err(e) => result.status = VerificationStatus::Failure(e),
        }
    }
}
