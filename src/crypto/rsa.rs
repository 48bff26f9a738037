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

use crate::crypto::{HashAlgorithm, SigningError, VerificationError};
use rsa::{
    pkcs1::DecodeRsaPublicKey, pkcs8::DecodePublicKey, traits::PublicKeyParts, Pkcs1v15Sign,
    RsaPrivateKey, RsaPublicKey,
};
use sha1::Sha1;
use sha2::Sha256;

pub fn rsa_key_bits(public_key: &RsaPublicKey) -> usize {
    public_key.size() * 8
}

/// Reads an RSA public key from DNS key data.
///
/// SubjectPublicKeyInfo is tried first, as it is what is published in
/// practice; RSAPublicKey is the fallback.
pub fn read_rsa_public_key(key_data: &[u8]) -> Result<RsaPublicKey, VerificationError> {
    RsaPublicKey::from_public_key_der(key_data)
        .or_else(|_| RsaPublicKey::from_pkcs1_der(key_data))
        .map_err(|_| VerificationError::InvalidKey)
}

fn padding_scheme(hash_alg: HashAlgorithm) -> Pkcs1v15Sign {
    match hash_alg {
        HashAlgorithm::Sha1 => Pkcs1v15Sign::new::<Sha1>(),
        HashAlgorithm::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
    }
}

pub fn verify_rsa(
    hash_alg: HashAlgorithm,
    public_key: &RsaPublicKey,
    data_hash: &[u8],
    signature_data: &[u8],
) -> Result<(), VerificationError> {
    public_key
        .verify(padding_scheme(hash_alg), data_hash, signature_data)
        .map_err(|_| VerificationError::VerificationFailure)
}

pub fn sign_rsa(
    hash_alg: HashAlgorithm,
    private_key: &RsaPrivateKey,
    data_hash: &[u8],
) -> Result<Vec<u8>, SigningError> {
    private_key
        .sign(padding_scheme(hash_alg), data_hash)
        .map_err(|_| SigningError::SigningFailure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::digest_slices;
    use rsa::pkcs8::DecodePrivateKey;

    const PRIVATE_KEY_PEM: &str = include_str!("../../tests/keys/rsa2048.pem");
    const PUBLIC_KEY_PEM: &str = include_str!("../../tests/keys/rsa2048pub.pem");

    #[test]
    fn sign_and_verify_rsa() {
        let private_key = RsaPrivateKey::from_pkcs8_pem(PRIVATE_KEY_PEM).unwrap();
        let public_key = RsaPublicKey::from_public_key_pem(PUBLIC_KEY_PEM).unwrap();

        assert_eq!(rsa_key_bits(&public_key), 2048);

        for alg in [HashAlgorithm::Sha1, HashAlgorithm::Sha256] {
            let hash = digest_slices(alg, [b"data to sign"]);
            let signature = sign_rsa(alg, &private_key, &hash).unwrap();

            assert_eq!(signature.len(), 256);
            assert_eq!(verify_rsa(alg, &public_key, &hash, &signature), Ok(()));

            let other = digest_slices(alg, [b"other data"]);
            assert_eq!(
                verify_rsa(alg, &public_key, &other, &signature),
                Err(VerificationError::VerificationFailure)
            );
        }
    }

    #[test]
    fn read_rsa_public_key_formats() {
        use rsa::pkcs1::EncodeRsaPublicKey;
        use rsa::pkcs8::EncodePublicKey;

        let public_key = RsaPublicKey::from_public_key_pem(PUBLIC_KEY_PEM).unwrap();

        let spki = public_key.to_public_key_der().unwrap();
        assert_eq!(read_rsa_public_key(spki.as_bytes()).unwrap(), public_key);

        let pkcs1 = public_key.to_pkcs1_der().unwrap();
        assert_eq!(read_rsa_public_key(pkcs1.as_bytes()).unwrap(), public_key);

        assert_eq!(
            read_rsa_public_key(b"garbage"),
            Err(VerificationError::InvalidKey)
        );
    }
}
