// Copyright 2023 Gravitational, Inc
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Cryptographic back-end capability.
//!
//! The application core never touches raw cryptography directly: everything
//! goes through [`CryptoBackend`], so a hardware build can route to its
//! accelerator and tests can inject a deterministic RNG.

use crate::errors::{crypto_error, PivResult};
use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use des::TdesEde3;
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use rsa::hazmat::rsa_decrypt_and_check;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey};

pub trait CryptoBackend {
    /// Raw RSA private-key operation (modular exponentiation with the private
    /// exponent, no padding). `key_der` is a PKCS#1 private key; `input` must
    /// be exactly the modulus size and the result is returned at that size.
    ///
    /// The host does all hashing and padding before handing us the blob, so
    /// this is deliberately the textbook primitive and not a signing scheme.
    fn rsa_private(&mut self, key_der: &[u8], input: &[u8]) -> PivResult<Vec<u8>>;

    /// Single-block 3DES (EDE3) with a 24-byte key.
    fn tdes_enc(&mut self, key: &[u8], block: &[u8; 8]) -> PivResult<[u8; 8]>;
    fn tdes_dec(&mut self, key: &[u8], block: &[u8; 8]) -> PivResult<[u8; 8]>;

    /// Single-block AES-128 with a 16-byte key.
    fn aes_enc(&mut self, key: &[u8], block: &[u8; 16]) -> PivResult<[u8; 16]>;
    fn aes_dec(&mut self, key: &[u8], block: &[u8; 16]) -> PivResult<[u8; 16]>;

    fn rand_fill(&mut self, out: &mut [u8]) -> PivResult<()>;
}

/// Software back-end over the RustCrypto primitives. The RNG defaults to the
/// operating system's; tests seed a ChaCha RNG for reproducible challenges.
pub struct SoftwareCrypto<R = OsRng> {
    rng: R,
}

impl SoftwareCrypto {
    pub fn new() -> Self {
        Self { rng: OsRng }
    }
}

impl Default for SoftwareCrypto {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RngCore + CryptoRng> SoftwareCrypto<R> {
    pub fn with_rng(rng: R) -> Self {
        Self { rng }
    }
}

impl<R: RngCore + CryptoRng> CryptoBackend for SoftwareCrypto<R> {
    fn rsa_private(&mut self, key_der: &[u8], input: &[u8]) -> PivResult<Vec<u8>> {
        let key = RsaPrivateKey::from_pkcs1_der(key_der)
            .map_err(|e| crypto_error(&format!("failed to parse private key from DER: {:?}", e)))?;
        let modulus_size = key.size();
        if input.len() != modulus_size {
            return Err(crypto_error(&format!(
                "RSA input is {} bytes, modulus is {}",
                input.len(),
                modulus_size
            )));
        }
        let c = BigUint::from_bytes_be(input);
        let m = rsa_decrypt_and_check(&key, None::<&mut OsRng>, &c)
            .map_err(|e| crypto_error(&format!("RSA private operation failed: {:?}", e)))?;

        // Left-pad back to the modulus size; to_bytes_be drops leading zeros.
        let bytes = m.to_bytes_be();
        let mut out = vec![0u8; modulus_size - bytes.len()];
        out.extend_from_slice(&bytes);
        Ok(out)
    }

    fn tdes_enc(&mut self, key: &[u8], block: &[u8; 8]) -> PivResult<[u8; 8]> {
        let cipher = TdesEde3::new_from_slice(key)
            .map_err(|_| crypto_error("3DES key must be 24 bytes"))?;
        let mut b = GenericArray::from(*block);
        cipher.encrypt_block(&mut b);
        Ok(b.into())
    }

    fn tdes_dec(&mut self, key: &[u8], block: &[u8; 8]) -> PivResult<[u8; 8]> {
        let cipher = TdesEde3::new_from_slice(key)
            .map_err(|_| crypto_error("3DES key must be 24 bytes"))?;
        let mut b = GenericArray::from(*block);
        cipher.decrypt_block(&mut b);
        Ok(b.into())
    }

    fn aes_enc(&mut self, key: &[u8], block: &[u8; 16]) -> PivResult<[u8; 16]> {
        let cipher = Aes128::new_from_slice(key)
            .map_err(|_| crypto_error("AES-128 key must be 16 bytes"))?;
        let mut b = GenericArray::from(*block);
        cipher.encrypt_block(&mut b);
        Ok(b.into())
    }

    fn aes_dec(&mut self, key: &[u8], block: &[u8; 16]) -> PivResult<[u8; 16]> {
        let cipher = Aes128::new_from_slice(key)
            .map_err(|_| crypto_error("AES-128 key must be 16 bytes"))?;
        let mut b = GenericArray::from(*block);
        cipher.decrypt_block(&mut b);
        Ok(b.into())
    }

    fn rand_fill(&mut self, out: &mut [u8]) -> PivResult<()> {
        self.rng.fill_bytes(out);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn crypto() -> SoftwareCrypto<ChaCha20Rng> {
        SoftwareCrypto::with_rng(ChaCha20Rng::seed_from_u64(0))
    }

    #[test]
    fn tdes_block_inverts() {
        let mut c = crypto();
        let key = [0x42u8; 24];
        let plain = *b"\x01\x02\x03\x04\x05\x06\x07\x08";
        let enc = c.tdes_enc(&key, &plain).unwrap();
        assert_ne!(enc, plain);
        assert_eq!(c.tdes_dec(&key, &enc).unwrap(), plain);

        // Same block, different key: different ciphertext.
        let enc2 = c.tdes_enc(&[0x43u8; 24], &plain).unwrap();
        assert_ne!(enc2, enc);
    }

    #[test]
    fn aes_block_inverts() {
        let mut c = crypto();
        let key = [0x11u8; 16];
        let plain = [0xA5u8; 16];
        let enc = c.aes_enc(&key, &plain).unwrap();
        assert_ne!(enc, plain);
        assert_eq!(c.aes_dec(&key, &enc).unwrap(), plain);
    }

    #[test]
    fn bad_key_sizes_are_rejected() {
        let mut c = crypto();
        assert!(c.tdes_enc(&[0u8; 16], &[0u8; 8]).is_err());
        assert!(c.aes_enc(&[0u8; 24], &[0u8; 16]).is_err());
        assert!(c.rsa_private(&[0x30, 0x00], &[0u8; 256]).is_err());
    }

    #[test]
    fn seeded_rng_is_reproducible() {
        let mut a = crypto();
        let mut b = crypto();
        let mut ra = [0u8; 16];
        let mut rb = [0u8; 16];
        a.rand_fill(&mut ra).unwrap();
        b.rand_fill(&mut rb).unwrap();
        assert_eq!(ra, rb);

        // Consecutive fills from one backend differ.
        a.rand_fill(&mut rb).unwrap();
        assert_ne!(ra, rb);
    }
}
