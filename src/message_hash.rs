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

//! Computation of the body hash and the data hash.

use crate::{
    canonicalize::{self, BodyCanonicalizer},
    crypto::{self, CountingHasher, HashAlgorithm, HashStatus, InsufficientInput},
    header::{FieldName, HeaderFields},
    signature::{CanonicalizationAlgorithm, DkimSignature},
};
use std::{
    collections::HashMap,
    error::Error,
    fmt::{self, Display, Formatter},
};

/// Computes the hash over the selected headers and the `DKIM-Signature`
/// header itself.
///
/// The signature header is given in the form it is to be hashed in, ie with
/// the value of the b= tag removed, and it is not followed by CRLF.
pub fn compute_data_hash(
    hash_alg: HashAlgorithm,
    canon_alg: CanonicalizationAlgorithm,
    headers: &HeaderFields,
    selected_headers: &[FieldName],
    dkim_sig_name: &str,
    dkim_sig_value: &str,
) -> Box<[u8]> {
    let mut data = canonicalize::canonicalize_headers(canon_alg, headers, selected_headers);

    canonicalize::canonicalize_header(&mut data, canon_alg, dkim_sig_name, dkim_sig_value);

    crypto::digest_slices(hash_alg, [data])
}

/// Whether a body hasher wants to see more of the body.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[must_use]
pub enum BodyHasherStance {
    Interested,
    /// Every registered hasher has reached its length limit; the rest of the
    /// body need not be fed.
    Done,
}

/// Body length limit, hash algorithm, and body canonicalization.
pub type BodyHasherKey = (Option<usize>, HashAlgorithm, CanonicalizationAlgorithm);

pub fn body_hasher_key(sig: &DkimSignature) -> BodyHasherKey {
    let len = sig
        .body_length
        .map(|len| usize::try_from(len).unwrap_or(usize::MAX));
    (len, sig.algorithm.hash_algorithm(), sig.canonicalization.body)
}

#[derive(Clone, Default)]
pub struct BodyHasherBuilder {
    registrations: Vec<BodyHasherKey>,
}

impl BodyHasherBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn register(&mut self, key: BodyHasherKey) {
        if !self.registrations.contains(&key) {
            self.registrations.push(key);
        }
    }

    pub fn build(self) -> BodyHasher {
        let uses = |canon| self.registrations.iter().any(|(_, _, c)| *c == canon);

        let simple = uses(CanonicalizationAlgorithm::Simple)
            .then(|| BodyCanonicalizer::new(CanonicalizationAlgorithm::Simple));
        let relaxed = uses(CanonicalizationAlgorithm::Relaxed)
            .then(|| BodyCanonicalizer::new(CanonicalizationAlgorithm::Relaxed));

        let hashers = self
            .registrations
            .into_iter()
            .map(|key @ (len, alg, _)| (key, CountingHasher::new(alg, len)))
            .collect();

        BodyHasher {
            hashers,
            simple,
            relaxed,
        }
    }
}

/// Canonicalizes and hashes the message body chunk by chunk, once for every
/// distinct registration.
pub struct BodyHasher {
    hashers: HashMap<BodyHasherKey, CountingHasher>,
    simple: Option<BodyCanonicalizer>,
    relaxed: Option<BodyCanonicalizer>,
}

impl BodyHasher {
    pub fn hash_chunk(&mut self, chunk: &[u8]) -> BodyHasherStance {
        let simple = self.simple.as_mut().map(|c| c.canonicalize_chunk(chunk));
        let relaxed = self.relaxed.as_mut().map(|c| c.canonicalize_chunk(chunk));

        self.update_all(simple, relaxed)
    }

    pub fn finish(mut self) -> BodyHashResults {
        let simple = self.simple.take().map(BodyCanonicalizer::finish);
        let relaxed = self.relaxed.take().map(BodyCanonicalizer::finish);

        let _ = self.update_all(simple, relaxed);

        let results = self
            .hashers
            .into_iter()
            .map(|(key, hasher)| {
                let result = hasher
                    .finish()
                    .map_err(|InsufficientInput| BodyHashError::InsufficientInput);
                (key, result)
            })
            .collect();

        BodyHashResults { results }
    }

    fn update_all(&mut self, simple: Option<Vec<u8>>, relaxed: Option<Vec<u8>>) -> BodyHasherStance {
        let mut all_done = true;

        for ((_, _, canon), hasher) in &mut self.hashers {
            let canonicalized = match canon {
                CanonicalizationAlgorithm::Simple => simple.as_deref(),
                CanonicalizationAlgorithm::Relaxed => relaxed.as_deref(),
            };

            if let Some(bytes) = canonicalized {
                if hasher.update(bytes) == HashStatus::AllConsumed && !hasher.is_done() {
                    all_done = false;
                }
            }
        }

        if all_done {
            BodyHasherStance::Done
        } else {
            BodyHasherStance::Interested
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BodyHashError {
    /// The body was shorter than the l= tag claims.
    InsufficientInput,
}

impl Display for BodyHashError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientInput => write!(f, "body shorter than signed length"),
        }
    }
}

impl Error for BodyHashError {}

/// The body hash and the number of canonicalized bytes it covers.
pub type BodyHashResult = Result<(Box<[u8]>, usize), BodyHashError>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BodyHashResults {
    results: HashMap<BodyHasherKey, BodyHashResult>,
}

impl BodyHashResults {
    pub fn get(&self, key: &BodyHasherKey) -> Option<&BodyHashResult> {
        self.results.get(key)
    }
}
