//! Cookie signing for session ids.
//!
//! The session id carried in the cookie is authenticated, not encrypted: a
//! signer appends an HMAC tag that proves the id was issued by this server.
//! Verification failures are reported through [`Unsigned`], never as errors.

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha384, Sha512};

use crate::Error;

/// The digest an [`HmacSigner`] authenticates with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Algorithm {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

/// Minimum length for a string secret.
pub const MIN_SECRET_LEN: usize = 32;

/// Signs values and verifies signed tokens.
pub trait Signer: fmt::Debug + Send + Sync + 'static {
    /// Embeds an authentication tag into `value`.
    fn sign(&self, value: &str) -> String;

    /// Verifies `token` and recovers the original value.
    ///
    /// A mismatched or malformed token yields `valid: false`; this never
    /// fails with an error.
    fn unsign(&self, token: &str) -> Unsigned;
}

/// The outcome of [`Signer::unsign`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Unsigned {
    pub valid: bool,
    pub value: Option<String>,
}

impl Unsigned {
    fn ok(value: &str) -> Self {
        Self {
            valid: true,
            value: Some(value.to_owned()),
        }
    }

    fn invalid() -> Self {
        Self {
            valid: false,
            value: None,
        }
    }
}

/// HMAC signer producing `{value}.{base64url(tag)}` tokens, SHA-256 by
/// default.
///
/// Holds one or more keys, newest first: the first key signs, every key
/// verifies, so secrets can rotate without invalidating live sessions.
pub struct HmacSigner {
    keys: Vec<Vec<u8>>,
    algorithm: Algorithm,
}

impl HmacSigner {
    /// # Panics
    ///
    /// Panics if `keys` is empty. [`Secret`] validation guarantees this
    /// never happens for signers built from configuration.
    pub fn new(keys: Vec<String>) -> Self {
        Self::with_algorithm(keys, Algorithm::default())
    }

    /// Builds a signer over a non-default digest. All keys authenticate with
    /// the same digest; tokens from one digest never verify under another.
    ///
    /// # Panics
    ///
    /// Panics if `keys` is empty.
    pub fn with_algorithm(keys: Vec<String>, algorithm: Algorithm) -> Self {
        assert!(!keys.is_empty(), "HmacSigner requires at least one key");
        Self {
            keys: keys.into_iter().map(String::into_bytes).collect(),
            algorithm,
        }
    }

    fn tag(&self, key: &[u8], value: &str) -> Vec<u8> {
        match self.algorithm {
            Algorithm::Sha256 => tag_with::<Hmac<Sha256>>(key, value),
            Algorithm::Sha384 => tag_with::<Hmac<Sha384>>(key, value),
            Algorithm::Sha512 => tag_with::<Hmac<Sha512>>(key, value),
        }
    }

    fn verify(&self, key: &[u8], value: &str, tag: &[u8]) -> bool {
        match self.algorithm {
            Algorithm::Sha256 => verify_with::<Hmac<Sha256>>(key, value, tag),
            Algorithm::Sha384 => verify_with::<Hmac<Sha384>>(key, value, tag),
            Algorithm::Sha512 => verify_with::<Hmac<Sha512>>(key, value, tag),
        }
    }
}

fn mac<M: Mac + KeyInit>(key: &[u8]) -> M {
    // HMAC accepts keys of any length, so this cannot fail
    <M as Mac>::new_from_slice(key).expect("HMAC accepts keys of any size")
}

fn tag_with<M: Mac + KeyInit>(key: &[u8], value: &str) -> Vec<u8> {
    let mut mac = mac::<M>(key);
    mac.update(value.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

fn verify_with<M: Mac + KeyInit>(key: &[u8], value: &str, tag: &[u8]) -> bool {
    let mut mac = mac::<M>(key);
    mac.update(value.as_bytes());
    // verify_slice compares in constant time
    mac.verify_slice(tag).is_ok()
}

impl fmt::Debug for HmacSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HmacSigner")
            .field("keys", &self.keys.len())
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

impl Signer for HmacSigner {
    fn sign(&self, value: &str) -> String {
        let tag = self.tag(&self.keys[0], value);
        format!("{value}.{}", URL_SAFE_NO_PAD.encode(tag))
    }

    fn unsign(&self, token: &str) -> Unsigned {
        let Some((value, tag)) = token.rsplit_once('.') else {
            return Unsigned::invalid();
        };
        let Ok(tag) = URL_SAFE_NO_PAD.decode(tag) else {
            return Unsigned::invalid();
        };

        for key in &self.keys {
            if self.verify(key, value, &tag) {
                return Unsigned::ok(value);
            }
        }

        Unsigned::invalid()
    }
}

/// The `secret` configuration surface.
///
/// A string or string-array secret builds a SHA-256 [`HmacSigner`]; for
/// another digest, pass a signer built with [`HmacSigner::with_algorithm`].
/// A pre-built signer capability is accepted as-is.
#[derive(Clone, Debug)]
pub enum Secret {
    /// A single signing key.
    Key(String),
    /// Rotating keys, newest first. The first signs; all verify.
    Keys(Vec<String>),
    /// A pre-built signer capability.
    Signer(Arc<dyn Signer>),
}

impl From<&str> for Secret {
    fn from(key: &str) -> Self {
        Secret::Key(key.to_owned())
    }
}

impl From<String> for Secret {
    fn from(key: String) -> Self {
        Secret::Key(key)
    }
}

impl From<Vec<String>> for Secret {
    fn from(keys: Vec<String>) -> Self {
        Secret::Keys(keys)
    }
}

impl From<Arc<dyn Signer>> for Secret {
    fn from(signer: Arc<dyn Signer>) -> Self {
        Secret::Signer(signer)
    }
}

impl Secret {
    /// Validates the secret and builds the signer capability.
    pub(crate) fn into_signer(self) -> Result<Arc<dyn Signer>, Error> {
        match self {
            Secret::Key(key) => {
                if key.len() < MIN_SECRET_LEN {
                    return Err(Error::SecretTooShort);
                }
                Ok(Arc::new(HmacSigner::new(vec![key])))
            }
            Secret::Keys(keys) => {
                if keys.is_empty() {
                    return Err(Error::NoSecrets);
                }
                if keys.iter().any(|key| key.len() < MIN_SECRET_LEN) {
                    return Err(Error::SecretTooShort);
                }
                Ok(Arc::new(HmacSigner::new(keys)))
            }
            Secret::Signer(signer) => Ok(signer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "an-hmac-key-with-at-least-32-chars";
    const OLD_KEY: &str = "a-retired-key-with-at-least-32-ch!";

    #[test]
    fn test_sign_unsign_round_trip() {
        let signer = HmacSigner::new(vec![KEY.to_owned()]);
        let token = signer.sign("abc123session");

        let unsigned = signer.unsign(&token);
        assert!(unsigned.valid);
        assert_eq!(unsigned.value.as_deref(), Some("abc123session"));
    }

    #[test]
    fn test_tampered_token_is_invalid() {
        let signer = HmacSigner::new(vec![KEY.to_owned()]);
        let token = signer.sign("abc123session");

        let tampered = token.replace("abc", "xyz");
        assert_eq!(signer.unsign(&tampered), Unsigned::invalid());

        assert_eq!(signer.unsign("no-separator"), Unsigned::invalid());
        assert_eq!(signer.unsign("value.!!!not-base64!!!"), Unsigned::invalid());
    }

    #[test]
    fn test_key_rotation_verifies_old_tokens() {
        let old = HmacSigner::new(vec![OLD_KEY.to_owned()]);
        let token = old.sign("abc123session");

        let rotated = HmacSigner::new(vec![KEY.to_owned(), OLD_KEY.to_owned()]);
        let unsigned = rotated.unsign(&token);
        assert!(unsigned.valid);

        // new tokens are signed with the newest key
        let fresh = rotated.sign("abc123session");
        assert!(HmacSigner::new(vec![KEY.to_owned()]).unsign(&fresh).valid);
    }

    #[test]
    fn test_algorithm_selection() {
        let sha512 = HmacSigner::with_algorithm(vec![KEY.to_owned()], Algorithm::Sha512);
        let token = sha512.sign("abc123session");

        let unsigned = sha512.unsign(&token);
        assert!(unsigned.valid);
        assert_eq!(unsigned.value.as_deref(), Some("abc123session"));

        // digests do not cross-verify, in either direction
        let sha256 = HmacSigner::new(vec![KEY.to_owned()]);
        assert_eq!(sha256.unsign(&token), Unsigned::invalid());
        assert_eq!(
            sha512.unsign(&sha256.sign("abc123session")),
            Unsigned::invalid()
        );
    }

    #[test]
    fn test_secret_validation() {
        // 31 characters is rejected, 32 accepted
        assert!(matches!(
            Secret::from("k".repeat(31)).into_signer(),
            Err(Error::SecretTooShort)
        ));
        assert!(Secret::from("k".repeat(32)).into_signer().is_ok());

        assert!(matches!(
            Secret::from(Vec::<String>::new()).into_signer(),
            Err(Error::NoSecrets)
        ));
        assert!(matches!(
            Secret::from(vec!["k".repeat(32), "short".to_owned()]).into_signer(),
            Err(Error::SecretTooShort)
        ));
        assert!(Secret::from(vec!["k".repeat(32), "j".repeat(40)]).into_signer().is_ok());

        let prebuilt: Arc<dyn Signer> = Arc::new(HmacSigner::new(vec![KEY.to_owned()]));
        assert!(Secret::from(prebuilt).into_signer().is_ok());
    }
}
