//! Audit entry signing
//!
//! Entry hashes are signed with an Ed25519 key held in the configured key
//! directory as a PKCS#8 PEM. Public keys are registered in the audit
//! database under a key id (first eight bytes of the public key,
//! hex-encoded) so verification can outlive key rotation.

use std::path::Path;

use ed25519_dalek::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use pkcs8::LineEnding;
use rand::rngs::OsRng;
use sqlx::SqlitePool;

use meridian_core::time::TimeService;

use crate::{Result, RuntimeError};

const KEY_FILE_NAME: &str = "audit_signing_key.pem";

/// Manages the active signing key and the signing-key registry.
pub struct SignatureManager {
    signing_key: SigningKey,
    key_id: String,
}

impl SignatureManager {
    /// Load the signing key from the key directory, generating one on first
    /// use, and ensure its public half is registered in the audit database.
    /// A failure here is fatal for signed-audit deployments.
    pub async fn init(
        key_path: &Path,
        pool: &SqlitePool,
        time: &dyn TimeService,
    ) -> Result<Self> {
        std::fs::create_dir_all(key_path)?;
        let key_file = key_path.join(KEY_FILE_NAME);

        let signing_key = if key_file.exists() {
            let pem = std::fs::read_to_string(&key_file)?;
            SigningKey::from_pkcs8_pem(&pem)
                .map_err(|e| RuntimeError::Audit(format!("cannot parse signing key: {e}")))?
        } else {
            let signing_key = SigningKey::generate(&mut OsRng);
            let pem = signing_key
                .to_pkcs8_pem(LineEnding::LF)
                .map_err(|e| RuntimeError::Audit(format!("cannot encode signing key: {e}")))?;
            std::fs::write(&key_file, pem.as_bytes())?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&key_file, std::fs::Permissions::from_mode(0o600))?;
            }
            tracing::info!(path = %key_file.display(), "generated new audit signing key");
            signing_key
        };

        let verifying_key = signing_key.verifying_key();
        let public_bytes = verifying_key.to_bytes();
        let key_id = hex::encode(&public_bytes[..8]);

        sqlx::query(
            "INSERT OR IGNORE INTO audit_signing_keys \
             (key_id, public_key, algorithm, key_size, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&key_id)
        .bind(hex::encode(public_bytes))
        .bind("ed25519")
        .bind(256i64)
        .bind(time.now_iso())
        .execute(pool)
        .await?;

        let manager = Self {
            signing_key,
            key_id,
        };
        if !manager.test_signing() {
            return Err(RuntimeError::Audit("signing self-test failed".into()));
        }
        Ok(manager)
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Sign data, returning the hex-encoded signature.
    pub fn sign(&self, data: &str) -> String {
        hex::encode(self.signing_key.sign(data.as_bytes()).to_bytes())
    }

    /// Verify a signature against a registered key id.
    pub async fn verify_with_registry(
        pool: &SqlitePool,
        key_id: &str,
        data: &str,
        signature_hex: &str,
    ) -> Result<bool> {
        let row: Option<(String, Option<String>)> = sqlx::query_as(
            "SELECT public_key, revoked_at FROM audit_signing_keys WHERE key_id = ?",
        )
        .bind(key_id)
        .fetch_optional(pool)
        .await?;

        let Some((public_hex, _revoked_at)) = row else {
            return Ok(false);
        };
        let Ok(public_bytes) = hex::decode(&public_hex) else {
            return Ok(false);
        };
        let Ok(public_array) = <[u8; 32]>::try_from(public_bytes.as_slice()) else {
            return Ok(false);
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&public_array) else {
            return Ok(false);
        };
        let Ok(signature_bytes) = hex::decode(signature_hex) else {
            return Ok(false);
        };
        let Ok(signature) = Signature::from_slice(&signature_bytes) else {
            return Ok(false);
        };
        Ok(verifying_key.verify(data.as_bytes(), &signature).is_ok())
    }

    /// Sign-and-verify self test run at startup.
    pub fn test_signing(&self) -> bool {
        let sample = "audit-signing-self-test";
        let signature = self.signing_key.sign(sample.as_bytes());
        self.signing_key
            .verifying_key()
            .verify(sample.as_bytes(), &signature)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::init_audit_schema;
    use meridian_core::time::ManualTimeService;

    async fn pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_audit_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_init_generates_and_reloads_key() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool().await;
        let time = ManualTimeService::new();

        let first = SignatureManager::init(dir.path(), &pool, &time).await.unwrap();
        let second = SignatureManager::init(dir.path(), &pool, &time).await.unwrap();
        assert_eq!(first.key_id(), second.key_id());
    }

    #[tokio::test]
    async fn test_sign_and_verify_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool().await;
        let time = ManualTimeService::new();
        let manager = SignatureManager::init(dir.path(), &pool, &time).await.unwrap();

        let signature = manager.sign("abc123");
        assert!(SignatureManager::verify_with_registry(
            &pool,
            manager.key_id(),
            "abc123",
            &signature
        )
        .await
        .unwrap());
        assert!(!SignatureManager::verify_with_registry(
            &pool,
            manager.key_id(),
            "tampered",
            &signature
        )
        .await
        .unwrap());
    }

    #[tokio::test]
    async fn test_unknown_key_id_fails_verification() {
        let pool = pool().await;
        assert!(!SignatureManager::verify_with_registry(&pool, "deadbeef", "x", "00")
            .await
            .unwrap());
    }
}
