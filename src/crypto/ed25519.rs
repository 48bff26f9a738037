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

use crate::crypto::VerificationError;
use ed25519_dalek::{
    pkcs8::DecodePublicKey, Signature, Signer, SigningKey, Verifier, VerifyingKey,
};

/// Reads an Ed25519 public key from DNS key data.
///
/// The raw 32 key bytes of RFC 8463 are tried first, then
/// SubjectPublicKeyInfo as produced by OpenSSL.
pub fn read_ed25519_verifying_key(key_data: &[u8]) -> Result<VerifyingKey, VerificationError> {
    VerifyingKey::try_from(key_data)
        .or_else(|_| VerifyingKey::from_public_key_der(key_data))
        .map_err(|_| VerificationError::InvalidKey)
}

pub fn verify_ed25519(
    verifying_key: &VerifyingKey,
    data_hash: &[u8],
    signature_data: &[u8],
) -> Result<(), VerificationError> {
    let signature =
        Signature::from_slice(signature_data).map_err(|_| VerificationError::InvalidSignature)?;

    verifying_key
        .verify(data_hash, &signature)
        .map_err(|_| VerificationError::VerificationFailure)
}

pub fn sign_ed25519(signing_key: &SigningKey, data_hash: &[u8]) -> Vec<u8> {
    signing_key.sign(data_hash).to_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::decode_base64;
    use ed25519_dalek::pkcs8::DecodePrivateKey;

    const PUBLIC_KEY_RAW: &str = "wf6CpOd/GZ979qkC1JrLxxgd7JeQBT9c8KAdFOkiP8M=";
    const PUBLIC_KEY_SPKI: &str = "MCowBQYDK2VwAyEAwf6CpOd/GZ979qkC1JrLxxgd7JeQBT9c8KAdFOkiP8M=";

    #[test]
    fn read_ed25519_key_formats() {
        let raw = read_ed25519_verifying_key(&decode_base64(PUBLIC_KEY_RAW).unwrap()).unwrap();
        let spki = read_ed25519_verifying_key(&decode_base64(PUBLIC_KEY_SPKI).unwrap()).unwrap();

        assert_eq!(raw, spki);
        assert_eq!(
            read_ed25519_verifying_key(&[1, 2, 3]),
            Err(VerificationError::InvalidKey)
        );
    }

    #[test]
    fn sign_and_verify_ed25519() {
        let signing_key =
            SigningKey::from_pkcs8_pem(include_str!("../../tests/keys/ed25519.pem")).unwrap();
        let verifying_key =
            read_ed25519_verifying_key(&decode_base64(PUBLIC_KEY_RAW).unwrap()).unwrap();

        assert_eq!(signing_key.verifying_key(), verifying_key);

        let signature = sign_ed25519(&signing_key, b"hash");

        assert_eq!(signature.len(), 64);
        assert_eq!(verify_ed25519(&verifying_key, b"hash", &signature), Ok(()));
        assert_eq!(
            verify_ed25519(&verifying_key, b"hasH", &signature),
            Err(VerificationError::VerificationFailure)
        );
        assert_eq!(
            verify_ed25519(&verifying_key, b"hash", &signature[1..]),
            Err(VerificationError::InvalidSignature)
        );
    }
}
