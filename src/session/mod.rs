//! Session lifecycle management.
//!
//! An entity owns one session's identity, payload, cookie state and
//! dirty-hash tracking; the public [`Session`] handle exposes its lifecycle
//! transitions over the per-request active-session slot. Clearing that slot
//! is how a request ends up sessionless (after `destroy`, or after a failed
//! regeneration when the keep policy is off).

use std::fmt;
use std::{result, sync::Arc};

use cookie::time::{Duration, OffsetDateTime};
use parking_lot::RwLock;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

mod cookie_options;
mod hash;
mod id;
mod payload;

pub use cookie_options::{CookieOptions, Secure, SessionCookie};
pub use id::IdGenerator;
pub use payload::SessionPayload;

use crate::signer::Signer;
use crate::store::{self, SessionStore};
use hash::hash_session;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] store::Error),
    #[error("session secret must have length 32 or greater")]
    SecretTooShort,
    #[error("at least one secret is required")]
    NoSecrets,
    #[error("cookie options are required for new sessions")]
    MissingCookieOptions,
    #[error("cookie signer is required")]
    MissingSigner,
    #[error("session has not been initialized")]
    UnInitialized,
}

type Result<T> = result::Result<T, Error>;

/// Policies and callables shared by every request going through one layer.
#[derive(Clone)]
pub struct SessionConfig {
    pub signer: Arc<dyn Signer>,
    pub cookie_options: Option<CookieOptions>,
    /// Re-save the session and re-emit the cookie on every request.
    pub rolling: bool,
    /// Persist sessions whose cookie was never issued to the client.
    pub save_uninitialized: bool,
    /// Keep the current session attached when a regeneration write fails;
    /// when off, the failed request ends up sessionless instead.
    pub keep_if_regeneration_fails: bool,
    pub generate_id: Arc<dyn Fn() -> String + Send + Sync>,
    /// Orchestrator hook: when present and true for a restored session, the
    /// session id is rotated before the handler runs.
    pub auto_regenerate: Option<Arc<dyn Fn() -> bool + Send + Sync>>,
}

impl SessionConfig {
    pub fn new(signer: Arc<dyn Signer>) -> Self {
        let generator = IdGenerator::new();
        Self {
            signer,
            cookie_options: None,
            rolling: false,
            save_uninitialized: false,
            keep_if_regeneration_fails: true,
            generate_id: Arc::new(move || generator.generate()),
            auto_regenerate: None,
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("signer", &self.signer)
            .field("cookie_options", &self.cookie_options)
            .field("rolling", &self.rolling)
            .field("save_uninitialized", &self.save_uninitialized)
            .field("keep_if_regeneration_fails", &self.keep_if_regeneration_fails)
            .field("auto_regenerate", &self.auto_regenerate.is_some())
            .finish_non_exhaustive()
    }
}

/// One session's identity, payload and cookie state.
#[derive(Clone, Debug)]
pub(crate) struct SessionEntity {
    pub(crate) id: String,
    pub(crate) encrypted_id: String,
    pub(crate) payload: SessionPayload,
    pub(crate) cookie: SessionCookie,
    pub(crate) persisted_hash: String,
    pub(crate) saved: bool,
}

/// Inputs for building an entity; `previous` is a snapshot of the entity the
/// new one replaces, never a live reference back to it.
struct EntitySeed<'a> {
    session_id: Option<String>,
    payload: Option<SessionPayload>,
    previous: Option<&'a SessionEntity>,
}

impl SessionEntity {
    fn build(
        seed: EntitySeed<'_>,
        config: &SessionConfig,
        store_name: &'static str,
        default_payload: SessionPayload,
        secure_request: bool,
    ) -> Result<Self> {
        let payload = seed
            .payload
            .or_else(|| seed.previous.map(|previous| previous.payload.clone()))
            .unwrap_or(default_payload);

        let cookie = match seed.previous {
            Some(previous) => SessionCookie::new(&previous.cookie.options(), secure_request)?,
            None => {
                let mut options = config
                    .cookie_options
                    .clone()
                    .ok_or(Error::MissingCookieOptions)?;
                if options.signer.is_none() {
                    options.signer = Some(config.signer.clone());
                }
                SessionCookie::new(&options, secure_request)?
            }
        };

        let id = seed.session_id.unwrap_or_else(|| (config.generate_id)());

        // same-id reconstruction keeps the signed form; tampering is caught
        // at decrypt time, not here
        let encrypted_id = match seed.previous {
            Some(previous) if previous.id == id => previous.encrypted_id.clone(),
            _ => cookie.signer().sign(&id),
        };

        let persisted_hash = hash_session(&id, &encrypted_id, store_name, &payload);

        Ok(Self {
            id,
            encrypted_id,
            payload,
            cookie,
            persisted_hash,
            saved: false,
        })
    }

    pub(crate) fn live_hash(&self, store_name: &str) -> String {
        hash_session(&self.id, &self.encrypted_id, store_name, &self.payload)
    }
}

/// Per-request session state shared between the middleware, the extractor
/// and handler-held [`Session`] clones.
#[derive(Debug)]
pub struct Inner<S: SessionStore> {
    pub(crate) entity: RwLock<Option<SessionEntity>>,
    pub(crate) store: Arc<S>,
    pub(crate) config: Arc<SessionConfig>,
    pub(crate) secure_request: bool,
}

impl<S: SessionStore> Inner<S> {
    pub fn new(store: Arc<S>, config: Arc<SessionConfig>, secure_request: bool) -> Self {
        Self {
            entity: RwLock::new(None),
            store,
            config,
            secure_request,
        }
    }
}

/// A handle to the request's active session.
///
/// Cheap to clone; all clones observe the same underlying session slot.
#[derive(Debug)]
pub struct Session<S: SessionStore> {
    pub(crate) inner: Arc<Inner<S>>,
}

impl<S: SessionStore> Clone for Session<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> Session<S>
where
    S: SessionStore,
{
    /// Creates a new `Session` handle over shared per-request state.
    pub fn new(inner: Arc<Inner<S>>) -> Self {
        Self { inner }
    }

    fn build_entity(
        &self,
        session_id: Option<String>,
        payload: Option<SessionPayload>,
        previous: Option<&SessionEntity>,
    ) -> Result<SessionEntity> {
        SessionEntity::build(
            EntitySeed {
                session_id,
                payload,
                previous,
            },
            &self.inner.config,
            self.inner.store.name(),
            self.inner.store.default_payload(),
            self.inner.secure_request,
        )
    }

    /// Builds and attaches a fresh session: new id, default payload, never
    /// persisted.
    pub fn attach_fresh(&self) -> Result<()> {
        let entity = self.build_entity(None, None, None)?;
        *self.inner.entity.write() = Some(entity);
        Ok(())
    }

    /// Attaches a session restored from the store under an existing id.
    pub fn attach_restored(&self, session_id: String, payload: SessionPayload) -> Result<()> {
        let entity = self.build_entity(Some(session_id), Some(payload), None)?;
        *self.inner.entity.write() = Some(entity);
        Ok(())
    }

    /// Whether a session is currently attached to the request.
    pub fn is_attached(&self) -> bool {
        self.inner.entity.read().is_some()
    }

    /// Returns the session id, if a session is attached.
    pub fn id(&self) -> Option<String> {
        self.inner.entity.read().as_ref().map(|e| e.id.clone())
    }

    /// The signed form of the session id, as carried in the cookie.
    pub fn encrypted_id(&self) -> Option<String> {
        self.inner
            .entity
            .read()
            .as_ref()
            .map(|e| e.encrypted_id.clone())
    }

    /// True once at least one `save` has succeeded for this session.
    pub fn saved(&self) -> bool {
        self.inner
            .entity
            .read()
            .as_ref()
            .map(|e| e.saved)
            .unwrap_or(false)
    }

    /// True when the session's content hash diverges from the hash taken at
    /// construction or at the last successful `save`.
    pub fn modified(&self) -> bool {
        let guard = self.inner.entity.read();
        match guard.as_ref() {
            Some(entity) => entity.persisted_hash != entity.live_hash(self.inner.store.name()),
            None => false,
        }
    }

    /// The session's cookie state.
    pub fn cookie(&self) -> Option<SessionCookie> {
        self.inner.entity.read().as_ref().map(|e| e.cookie.clone())
    }

    /// Gets a value from the session payload.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.inner
            .entity
            .read()
            .as_ref()
            .and_then(|entity| entity.payload.get(key))
    }

    /// Sets a value in the session payload.
    ///
    /// Silently does nothing when no session is attached.
    pub fn set<T: Serialize>(&self, key: &str, value: T) -> Result<()> {
        let mut guard = self.inner.entity.write();
        match guard.as_mut() {
            Some(entity) => entity.payload.set(key, value).map_err(Error::from),
            None => Ok(()),
        }
    }

    /// Removes a key from the session payload.
    pub fn remove(&self, key: &str) -> bool {
        let mut guard = self.inner.entity.write();
        match guard.as_mut() {
            Some(entity) => entity.payload.remove(key),
            None => false,
        }
    }

    /// Extends the cookie's expiry to now + `duration`.
    ///
    /// Cookie freshness is independent of payload dirtiness: this neither
    /// marks the session modified nor persists anything.
    pub fn touch(&self, duration: Duration) {
        if let Some(entity) = self.inner.entity.write().as_mut() {
            entity
                .cookie
                .set_expires(OffsetDateTime::now_utc() + duration);
        }
    }

    /// Writes the current id and payload to the store.
    ///
    /// On success the dirty bit clears and the session counts as saved; on
    /// error both are left unchanged.
    #[tracing::instrument(name = "saving session to store", skip(self))]
    pub async fn save(&self) -> Result<()> {
        let (id, payload) = {
            let guard = self.inner.entity.read();
            let entity = guard.as_ref().ok_or(Error::UnInitialized)?;
            (entity.id.clone(), entity.payload.clone())
        };

        self.inner.store.set(&id, &payload).await.map_err(|err| {
            tracing::error!(err = %err, "failed to save session to store");
            err
        })?;

        if let Some(entity) = self.inner.entity.write().as_mut() {
            entity.saved = true;
            entity.persisted_hash = entity.live_hash(self.inner.store.name());
        }

        Ok(())
    }

    /// Removes the session from the store and detaches it.
    ///
    /// The request ends up sessionless even when the store fails; the store
    /// error is still reported.
    #[tracing::instrument(name = "destroying session", skip(self))]
    pub async fn destroy(&self) -> Result<()> {
        let id = self.id().ok_or(Error::UnInitialized)?;

        let result = self.inner.store.destroy(&id).await;
        *self.inner.entity.write() = None;

        result.map_err(|err| {
            tracing::error!(err = %err, "failed to destroy session in store");
            err.into()
        })
    }

    /// Replaces the session with one under a new id, carrying the current
    /// payload, and persists it.
    ///
    /// On a persistence error the new session is discarded; unless the
    /// keep-on-failure policy is set, the current session is detached too, so
    /// the caller is never left holding a half-regenerated identity.
    #[tracing::instrument(name = "regenerating session id", skip(self))]
    pub async fn regenerate(&self) -> Result<()> {
        let previous = self
            .inner
            .entity
            .read()
            .clone()
            .ok_or(Error::UnInitialized)?;
        self.regenerate_from(&previous).await
    }

    pub(crate) async fn regenerate_from(&self, previous: &SessionEntity) -> Result<()> {
        let mut entity = self.build_entity(None, None, Some(previous))?;

        match self.inner.store.set(&entity.id, &entity.payload).await {
            Ok(()) => {
                // the write above is this session's first save; the rotated
                // cookie is re-emitted for saved sessions even when nothing
                // else changes before the response
                entity.saved = true;
                *self.inner.entity.write() = Some(entity);
                Ok(())
            }
            Err(err) => {
                tracing::error!(err = %err, "failed to persist regenerated session");
                if !self.inner.config.keep_if_regeneration_fails {
                    *self.inner.entity.write() = None;
                }
                Err(err.into())
            }
        }
    }

    /// Re-fetches the payload from the store under the same id and replaces
    /// the session with the result.
    ///
    /// The replacement becomes active even when the fetch fails, so the
    /// caller is not left sessionless; the error is still reported. A fetch
    /// that finds nothing yields the store's default payload.
    #[tracing::instrument(name = "reloading session from store", skip(self))]
    pub async fn reload(&self) -> Result<()> {
        let previous = self
            .inner
            .entity
            .read()
            .clone()
            .ok_or(Error::UnInitialized)?;

        let (payload, fetch_error) = match self.inner.store.get(&previous.id).await {
            Ok(Some(payload)) => (payload, None),
            Ok(None) => (self.inner.store.default_payload(), None),
            Err(err) => (self.inner.store.default_payload(), Some(err)),
        };

        let entity = self.build_entity(Some(previous.id.clone()), Some(payload), Some(&previous))?;
        *self.inner.entity.write() = Some(entity);

        match fetch_error {
            Some(err) => {
                tracing::error!(err = %err, "failed to reload session from store");
                Err(err.into())
            }
            None => Ok(()),
        }
    }

    pub(crate) fn snapshot(&self) -> Option<SessionEntity> {
        self.inner.entity.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::{HmacSigner, Signer};
    use crate::store::MemoryStore;

    fn test_config() -> SessionConfig {
        let signer: Arc<dyn Signer> = Arc::new(HmacSigner::new(vec!["k".repeat(32)]));
        let mut config = SessionConfig::new(signer);
        config.cookie_options = Some(CookieOptions::build().name("sid"));
        config
    }

    fn test_session(config: SessionConfig) -> Session<MemoryStore> {
        let inner = Inner::new(Arc::new(MemoryStore::new()), Arc::new(config), true);
        Session::new(Arc::new(inner))
    }

    #[test]
    fn test_fresh_entity_invariants() {
        let session = test_session(test_config());
        session.attach_fresh().unwrap();

        let id = session.id().unwrap();
        let encrypted_id = session.encrypted_id().unwrap();
        assert_eq!(id.len(), 32);

        // the signed form round-trips back to the id
        let unsigned = session.inner.config.signer.unsign(&encrypted_id);
        assert!(unsigned.valid);
        assert_eq!(unsigned.value.as_deref(), Some(id.as_str()));

        assert!(!session.modified());
        assert!(!session.saved());
    }

    #[test]
    fn test_missing_cookie_options_fails_construction() {
        let signer: Arc<dyn Signer> = Arc::new(HmacSigner::new(vec!["k".repeat(32)]));
        let session = test_session(SessionConfig::new(signer));
        assert!(matches!(
            session.attach_fresh(),
            Err(Error::MissingCookieOptions)
        ));
    }

    #[test]
    fn test_custom_id_generator_is_used() {
        let mut config = test_config();
        config.generate_id = Arc::new(|| "fixed-session-id".to_owned());
        let session = test_session(config);
        session.attach_fresh().unwrap();
        assert_eq!(session.id().unwrap(), "fixed-session-id");
    }

    #[test]
    fn test_restored_entity_reuses_nothing_unsigned() {
        let session = test_session(test_config());
        let mut payload = SessionPayload::new();
        payload.set("user", "amelia").unwrap();
        session
            .attach_restored("known-session-id".to_owned(), payload)
            .unwrap();

        assert_eq!(session.id().unwrap(), "known-session-id");
        let unsigned = session
            .inner
            .config
            .signer
            .unsign(&session.encrypted_id().unwrap());
        assert_eq!(unsigned.value.as_deref(), Some("known-session-id"));
        assert_eq!(session.get::<String>("user").unwrap(), "amelia");
    }

    #[test]
    fn test_entity_seed_precedence() {
        let session = test_session(test_config());
        session.attach_fresh().unwrap();
        session.set("carried", 1).unwrap();
        let previous = session.snapshot().unwrap();

        // previous payload carries when none is supplied
        let carried = session.build_entity(None, None, Some(&previous)).unwrap();
        assert_eq!(carried.payload, previous.payload);
        assert_ne!(carried.id, previous.id);
        assert_ne!(carried.encrypted_id, previous.encrypted_id);

        // same-id reconstruction keeps the signed form without re-signing
        let same_id = session
            .build_entity(Some(previous.id.clone()), None, Some(&previous))
            .unwrap();
        assert_eq!(same_id.encrypted_id, previous.encrypted_id);

        // an explicit payload wins over the previous one
        let mut explicit = SessionPayload::new();
        explicit.set("explicit", true).unwrap();
        let replaced = session
            .build_entity(None, Some(explicit.clone()), Some(&previous))
            .unwrap();
        assert_eq!(replaced.payload, explicit);
    }

    #[tokio::test]
    async fn test_modified_tracks_content_hash() {
        let session = test_session(test_config());
        session.attach_fresh().unwrap();
        assert!(!session.modified());

        session.set("theme", "dark").unwrap();
        assert!(session.modified());

        session.save().await.unwrap();
        assert!(!session.modified());
        assert!(session.saved());

        // a second save without mutation starts from a clean dirty bit
        session.save().await.unwrap();
        assert!(!session.modified());
    }

    #[test]
    fn test_touch_does_not_dirty() {
        let session = test_session(test_config());
        session.attach_fresh().unwrap();

        session.touch(Duration::hours(1));
        assert!(!session.modified());
        let expires = session.cookie().unwrap().expires().unwrap();
        assert!(expires > OffsetDateTime::now_utc());
    }

    #[tokio::test]
    async fn test_lifecycle_calls_require_a_session() {
        let session = test_session(test_config());
        assert!(matches!(session.save().await, Err(Error::UnInitialized)));
        assert!(matches!(session.destroy().await, Err(Error::UnInitialized)));
        assert!(matches!(
            session.regenerate().await,
            Err(Error::UnInitialized)
        ));
        assert!(matches!(session.reload().await, Err(Error::UnInitialized)));
        assert!(session.get::<String>("k").is_none());
        session.set("k", "v").unwrap();
        assert!(!session.is_attached());
    }
}
