//! HMAC-SHA256 signatures for the local object store's time-limited links.
//!
//! A link is valid for exactly one method, bucket, key, expiry and content
//! type. The signature covers all five, newline separated:
//!
//! ```text
//! PUT\nimages\nuserA/1f0c.../a.jpg\n1760000000\nimage/jpeg
//! ```

use super::{SignedMethod, StoreError, StoreResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::{fmt, sync::Arc};

type HmacSha256 = Hmac<Sha256>;

/// The fields a signed link is bound to.
#[derive(Debug, Clone, Copy)]
pub struct SignedFields<'a> {
    pub method: SignedMethod,
    pub bucket: &'a str,
    pub key: &'a str,
    pub expires: i64,
    pub content_type: &'a str,
}

impl SignedFields<'_> {
    fn string_to_sign(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}\n{}",
            self.method, self.bucket, self.key, self.expires, self.content_type
        )
    }
}

#[derive(Clone)]
pub struct UrlSigner {
    secret: Arc<[u8]>,
}

impl fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrlSigner")
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl UrlSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: Arc::from(secret.as_ref()),
        }
    }

    fn mac(&self, fields: &SignedFields<'_>) -> StoreResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|err| StoreError::Signing(err.to_string()))?;
        mac.update(fields.string_to_sign().as_bytes());
        Ok(mac)
    }

    /// Hex-encoded signature for `fields`.
    pub fn sign(&self, fields: &SignedFields<'_>) -> StoreResult<String> {
        let mac = self.mac(fields)?;
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Constant-time check of a hex signature against `fields`.
    pub fn verify(&self, fields: &SignedFields<'_>, signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        match self.mac(fields) {
            Ok(mac) => mac.verify_slice(&expected).is_ok(),
            Err(_) => false,
        }
    }
}
