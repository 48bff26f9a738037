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

use crate::crypto::HashAlgorithm;
use digest::{Digest, DynDigest};
use sha1::Sha1;
use sha2::Sha256;

/// Digests the given byte slices in order.
pub fn digest_slices<I, T>(hash_alg: HashAlgorithm, slices: I) -> Box<[u8]>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    fn digest_all<D: Digest, I: IntoIterator<Item = T>, T: AsRef<[u8]>>(slices: I) -> Box<[u8]> {
        let mut hasher = D::new();
        for bytes in slices {
            hasher.update(bytes.as_ref());
        }
        hasher.finalize().to_vec().into()
    }

    match hash_alg {
        HashAlgorithm::Sha1 => digest_all::<Sha1, _, _>(slices),
        HashAlgorithm::Sha256 => digest_all::<Sha256, _, _>(slices),
    }
}

/// The body length limit was not reached.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct InsufficientInput;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HashStatus {
    AllConsumed,
    // some of the input lay beyond the length limit
    Truncated,
}

/// A hasher that stops digesting after an optional length limit.
pub struct CountingHasher {
    digest: Box<dyn DynDigest + Send>,
    limit: Option<usize>,
    bytes_written: usize,
}

impl CountingHasher {
    pub fn new(hash_alg: HashAlgorithm, limit: Option<usize>) -> Self {
        let digest: Box<dyn DynDigest + Send> = match hash_alg {
            HashAlgorithm::Sha1 => Box::<Sha1>::default(),
            HashAlgorithm::Sha256 => Box::<Sha256>::default(),
        };

        Self {
            digest,
            limit,
            bytes_written: 0,
        }
    }

    pub fn update(&mut self, bytes: &[u8]) -> HashStatus {
        let (bytes, status) = match self.limit {
            Some(limit) => {
                let remaining = limit - self.bytes_written;
                if bytes.len() > remaining {
                    (&bytes[..remaining], HashStatus::Truncated)
                } else {
                    (bytes, HashStatus::AllConsumed)
                }
            }
            None => (bytes, HashStatus::AllConsumed),
        };

        self.digest.update(bytes);
        self.bytes_written += bytes.len();

        status
    }

    pub fn is_done(&self) -> bool {
        self.limit == Some(self.bytes_written)
    }

    /// Returns the digest and the number of bytes digested.
    pub fn finish(self) -> Result<(Box<[u8]>, usize), InsufficientInput> {
        if self.limit.is_some() && !self.is_done() {
            return Err(InsufficientInput);
        }
        Ok((self.digest.finalize(), self.bytes_written))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::encode_base64;

    fn hash_all(alg: HashAlgorithm, bytes: &[u8]) -> (String, usize) {
        let mut hasher = CountingHasher::new(alg, None);
        hasher.update(bytes);
        let (hash, len) = hasher.finish().unwrap();
        (encode_base64(hash), len)
    }

    #[test]
    fn counting_hasher_limit() {
        let mut hasher = CountingHasher::new(HashAlgorithm::Sha256, Some(3));
        assert_eq!(hasher.update(b"ab"), HashStatus::AllConsumed);
        assert!(!hasher.is_done());
        assert_eq!(hasher.update(b"cde"), HashStatus::Truncated);
        assert!(hasher.is_done());
        assert_eq!(hasher.update(b"f"), HashStatus::Truncated);
        assert_eq!(hasher.finish().unwrap().1, 3);

        let mut hasher = CountingHasher::new(HashAlgorithm::Sha256, Some(3));
        hasher.update(b"ab");
        assert_eq!(hasher.finish(), Err(InsufficientInput));
    }

    #[test]
    fn empty_body_hashes() {
        assert_eq!(
            hash_all(HashAlgorithm::Sha256, b"\r\n"),
            ("frcCV1k9oG9oKj3dpUqdJg1PxRT2RSN/XKdLCPjaYaY=".into(), 2)
        );
        assert_eq!(
            hash_all(HashAlgorithm::Sha256, b""),
            ("47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU=".into(), 0)
        );
        assert_eq!(
            hash_all(HashAlgorithm::Sha1, b"\r\n"),
            ("uoq1oCgLlTqpdDX/iUbLy7J1Wic=".into(), 2)
        );
        assert_eq!(
            hash_all(HashAlgorithm::Sha1, b""),
            ("2jmj7l5rSw0yVb/vlWAYkK/YBwk=".into(), 0)
        );
    }

    #[test]
    fn digest_slices_concatenates() {
        assert_eq!(
            digest_slices(HashAlgorithm::Sha256, [&b"\r"[..], b"\n"]),
            digest_slices(HashAlgorithm::Sha256, [b"\r\n"]),
        );
    }
}
