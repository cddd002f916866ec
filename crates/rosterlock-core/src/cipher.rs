//! Field-level RSA-OAEP encryption.
//!
//! Writers only need the public half, readers need the private half; the
//! asymmetry is a trust split, not a performance choice. OAEP is randomized,
//! so equal plaintexts produce different ciphertexts and any equality or
//! substring search over stored fields must decrypt first
//! (see [`crate::store::MemberStore::find_by_decrypted_predicate`]).

use crate::error::{Error, Result};
use crate::keystore::KeyStore;
use rsa::Oaep;
use sha2::Sha256;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Encrypts and decrypts individual string fields under a shared [`KeyStore`].
///
/// Cheap to clone; all clones resolve to the same key pair.
#[derive(Clone)]
pub struct FieldCipher {
    keys: Arc<KeyStore>,
}

impl FieldCipher {
    pub fn new(keys: Arc<KeyStore>) -> Self {
        Self { keys }
    }

    /// Encrypts one plaintext field to lowercase hex.
    ///
    /// Empty plaintext is valid and round-trips. Plaintext longer than the
    /// OAEP capacity (190 bytes for RSA-2048 with SHA-256) is rejected.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let ciphertext = self
            .keys
            .public()
            .encrypt(
                &mut rand::thread_rng(),
                Oaep::new::<Sha256>(),
                plaintext.as_bytes(),
            )
            .map_err(|e| Error::Encryption(e.to_string()))?;
        Ok(hex::encode(ciphertext))
    }

    /// Decrypts a hex ciphertext produced by [`FieldCipher::encrypt`].
    ///
    /// Any mismatch (foreign key pair, truncation, corruption, padding
    /// failure, non-UTF-8 plaintext) is a typed [`Error::Decryption`].
    pub fn decrypt(&self, ciphertext_hex: &str) -> Result<String> {
        let ciphertext = hex::decode(ciphertext_hex)
            .map_err(|_| Error::Decryption("ciphertext is not valid hex".to_string()))?;
        let plaintext = Zeroizing::new(
            self.keys
                .private()
                .decrypt(Oaep::new::<Sha256>(), &ciphertext)
                .map_err(|_| {
                    Error::Decryption("wrong key or corrupted ciphertext".to_string())
                })?,
        );
        let text = std::str::from_utf8(&plaintext)
            .map_err(|_| Error::Decryption("plaintext is not valid UTF-8".to_string()))?;
        Ok(text.to_string())
    }
}
