//! Authentication capability.
//!
//! Sensitive flows (vote casting, vault unlock) never touch key material
//! directly. They present a [`Challenge`] to an [`Authenticator`], which
//! either yields a [`SigningCapability`] for the duration of the flow or
//! fails. Platform keystores and biometric prompts live behind this trait.

use async_trait::async_trait;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while authenticating the user.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Authentication cancelled by user")]
    Cancelled,

    #[error("Authentication failed: {0}")]
    Failed(String),

    #[error("Authenticator unavailable: {0}")]
    Unavailable(String),
}

/// What the user is asked to approve.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Challenge {
    /// Short title shown by the prompt.
    pub title: String,
    /// Longer description of the action.
    pub description: String,
    /// Random nonce binding the approval to this request.
    pub nonce: [u8; 16],
}

impl Challenge {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        let mut nonce = [0u8; 16];
        OsRng.fill_bytes(&mut nonce);
        Self {
            title: title.into(),
            description: description.into(),
            nonce,
        }
    }
}

/// A key that may sign on behalf of the authenticated user.
pub trait SigningCapability: Send + Sync {
    /// Public half of the signing key.
    fn public_key(&self) -> [u8; 32];

    /// Sign an arbitrary message.
    fn sign(&self, message: &[u8]) -> Vec<u8>;
}

/// Gate in front of the user's signing key.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(
        &self,
        challenge: &Challenge,
    ) -> Result<Box<dyn SigningCapability>, AuthError>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// SOFTWARE AUTHENTICATOR
// ═══════════════════════════════════════════════════════════════════════════════

/// In-process ed25519 authenticator.
///
/// Approves every challenge. Used by the CLI and by tests where no platform
/// keystore exists.
#[derive(Clone)]
pub struct SoftwareAuthenticator {
    key: SigningKey,
}

impl SoftwareAuthenticator {
    /// Create an authenticator with a fresh random key.
    pub fn generate() -> Self {
        Self {
            key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Restore an authenticator from a persisted 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(seed),
        }
    }

    /// Seed bytes suitable for persisting the identity.
    pub fn seed(&self) -> [u8; 32] {
        self.key.to_bytes()
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }
}

struct Ed25519Capability {
    key: SigningKey,
}

impl SigningCapability for Ed25519Capability {
    fn public_key(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.key.sign(message).to_bytes().to_vec()
    }
}

#[async_trait]
impl Authenticator for SoftwareAuthenticator {
    async fn authenticate(
        &self,
        _challenge: &Challenge,
    ) -> Result<Box<dyn SigningCapability>, AuthError> {
        Ok(Box::new(Ed25519Capability {
            key: self.key.clone(),
        }))
    }
}

/// Verify an ed25519 signature produced by a [`SigningCapability`].
pub fn verify_signature(public_key: &[u8; 32], message: &[u8], signature: &[u8]) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(public_key) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    key.verify(message, &signature).is_ok()
}
