//! Persistent RSA key pair storage.
//!
//! The private half is written as unencrypted PKCS#8 PEM, the public half as
//! SubjectPublicKeyInfo PEM, so the files stay interchangeable with other
//! tooling. On Unix the private key file is restricted to the owner; keeping
//! the private half inside the trust boundary beyond that (disk encryption,
//! volume access control) is a deployment responsibility.

use crate::error::{Error, Result};
use crate::paths::DataPaths;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::fs;
use std::path::Path;
use tracing::info;

pub const KEY_BITS: usize = 2048;

/// Process-wide key pair, read-only after construction.
///
/// Exactly one `KeyStore` should back all [`crate::cipher::FieldCipher`]
/// instances that touch the same data: ciphertext carries no reference to the
/// pair that produced it, so mixing pairs is a hard decryption failure.
pub struct KeyStore {
    public: RsaPublicKey,
    private: RsaPrivateKey,
}

impl KeyStore {
    /// Loads the persisted pair, or generates and persists a fresh one if
    /// neither half exists yet. Idempotent: repeated calls after generation
    /// return the same pair.
    ///
    /// A half-present pair is refused rather than regenerated: a fresh pair
    /// would orphan every ciphertext produced under the old one.
    pub fn ensure(paths: &DataPaths) -> Result<Self> {
        match (paths.public_key().exists(), paths.private_key().exists()) {
            (true, true) => Self::load(paths),
            (false, false) => Self::generate(paths),
            (true, false) => Err(Error::InvalidKey(format!(
                "private half missing for existing public key {}",
                paths.public_key().display()
            ))),
            (false, true) => Err(Error::InvalidKey(format!(
                "public half missing for existing private key {}",
                paths.private_key().display()
            ))),
        }
    }

    /// Loads both halves and cross-checks that they form one pair.
    pub fn load(paths: &DataPaths) -> Result<Self> {
        let private = Self::load_private(&paths.private_key())?;
        let public = Self::load_public(&paths.public_key())?;
        if RsaPublicKey::from(&private) != public {
            return Err(Error::InvalidKey(
                "public key file does not match the private key".to_string(),
            ));
        }
        Ok(Self { public, private })
    }

    /// Generates a fresh pair and persists both halves.
    pub fn generate(paths: &DataPaths) -> Result<Self> {
        paths.ensure_root()?;
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), KEY_BITS)
            .map_err(|e| Error::InvalidKey(format!("key generation: {e}")))?;
        let public = RsaPublicKey::from(&private);

        let private_pem = private
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| Error::InvalidKey(format!("encode private key: {e}")))?;
        fs::write(paths.private_key(), private_pem.as_bytes())?;
        restrict_permissions(&paths.private_key())?;

        let public_pem = public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| Error::InvalidKey(format!("encode public key: {e}")))?;
        fs::write(paths.public_key(), public_pem)?;

        info!(dir = %paths.root().display(), "generated new key pair");
        Ok(Self { public, private })
    }

    /// Loads the public half, failing with [`Error::KeyNotFound`] if absent.
    pub fn load_public(path: &Path) -> Result<RsaPublicKey> {
        let pem = read_key_file(path)?;
        RsaPublicKey::from_public_key_pem(&pem)
            .map_err(|e| Error::InvalidKey(format!("parse {}: {e}", path.display())))
    }

    /// Loads the private half, failing with [`Error::KeyNotFound`] if absent.
    pub fn load_private(path: &Path) -> Result<RsaPrivateKey> {
        let pem = read_key_file(path)?;
        RsaPrivateKey::from_pkcs8_pem(&pem)
            .map_err(|e| Error::InvalidKey(format!("parse {}: {e}", path.display())))
    }

    /// In-memory pair that never touches disk, for tests.
    pub fn ephemeral() -> Result<Self> {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), KEY_BITS)
            .map_err(|e| Error::InvalidKey(format!("key generation: {e}")))?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { public, private })
    }

    pub fn public(&self) -> &RsaPublicKey {
        &self.public
    }

    pub fn private(&self) -> &RsaPrivateKey {
        &self.private
    }
}

fn read_key_file(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(Error::KeyNotFound {
            path: path.to_path_buf(),
        });
    }
    Ok(fs::read_to_string(path)?)
}

fn restrict_permissions(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(path, perms)?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}
