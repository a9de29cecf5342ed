//! Session management middleware for tower applications.
//!
//! [`SessionLayer`] wires the two-phase request protocol around the inner
//! service: before the handler runs the session cookie is verified and a
//! session is attached; after it completes the middleware decides whether to
//! persist the session and which cookie, if any, to emit.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use cookie::time::OffsetDateTime;
use http::{Request, Response, StatusCode};
use tower::{Layer, Service};
use tower_cookies::Cookies;

use crate::session::{Error, Inner, Session, SessionConfig};
use crate::signer::Secret;
use crate::store::SessionStore;
use crate::CookieOptions;

/// Layer to apply [`SessionService`] middleware.
///
/// # Example
///
/// ```rust
/// use sesh::{CookieOptions, SessionLayer};
/// use sesh::store::MemoryStore;
/// use std::sync::Arc;
///
/// let session_layer = SessionLayer::new(
///     Arc::new(MemoryStore::new()),
///     "a-session-secret-of-at-least-32-chars",
/// )
/// .unwrap()
/// .with_cookie_options(CookieOptions::build().name("session_id").path("/"));
/// ```
#[derive(Clone, Debug)]
pub struct SessionLayer<S: SessionStore> {
    store: Arc<S>,
    config: SessionConfig,
}

impl<S> SessionLayer<S>
where
    S: SessionStore,
{
    /// Creates a session layer over `store`.
    ///
    /// The secret is validated here: string secrets (single or rotating)
    /// must be at least 32 characters, and a rotating list must not be
    /// empty. An invalid secret is a configuration error, surfaced
    /// immediately and never retried.
    pub fn new(store: Arc<S>, secret: impl Into<Secret>) -> Result<Self, Error> {
        let signer = secret.into().into_signer()?;
        Ok(Self {
            store,
            config: SessionConfig::new(signer),
        })
    }

    /// Sets the cookie options for sessions issued by this layer.
    pub fn with_cookie_options(mut self, options: CookieOptions) -> Self {
        self.config.cookie_options = Some(options);
        self
    }

    /// Re-save the session and re-emit its cookie on every request.
    pub fn rolling(mut self, rolling: bool) -> Self {
        self.config.rolling = rolling;
        self
    }

    /// Persist sessions even when the client never had a cookie for them.
    pub fn save_uninitialized(mut self, save_uninitialized: bool) -> Self {
        self.config.save_uninitialized = save_uninitialized;
        self
    }

    /// Keep the current session attached when a regeneration write fails.
    /// Defaults to true; when off, the failed request ends up sessionless.
    pub fn keep_if_regeneration_fails(mut self, keep: bool) -> Self {
        self.config.keep_if_regeneration_fails = keep;
        self
    }

    /// Overrides the session id source.
    pub fn with_id_generator(
        mut self,
        generate_id: impl Fn() -> String + Send + Sync + 'static,
    ) -> Self {
        self.config.generate_id = Arc::new(generate_id);
        self
    }

    /// Installs a predicate consulted for every restored session; returning
    /// true rotates the session id before the handler runs.
    pub fn with_auto_regenerate(
        mut self,
        auto_regenerate: impl Fn() -> bool + Send + Sync + 'static,
    ) -> Self {
        self.config.auto_regenerate = Some(Arc::new(auto_regenerate));
        self
    }
}

impl<Svc, S> Layer<Svc> for SessionLayer<S>
where
    S: SessionStore,
{
    type Service = SessionService<Svc, S>;

    fn layer(&self, inner: Svc) -> Self::Service {
        SessionService {
            inner,
            store: self.store.clone(),
            config: Arc::new(self.config.clone()),
        }
    }
}

/// A tower middleware running the session request protocol.
#[derive(Clone, Debug)]
pub struct SessionService<Svc, S: SessionStore> {
    inner: Svc,
    store: Arc<S>,
    config: Arc<SessionConfig>,
}

impl<ReqBody, ResBody, Svc, S> Service<Request<ReqBody>> for SessionService<Svc, S>
where
    Svc: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    Svc::Future: Send,
    ReqBody: Send + 'static,
    ResBody: Default + Send + 'static,
    S: SessionStore,
{
    type Response = Svc::Response;
    type Error = Svc::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    #[inline]
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        // the clone takes over; self stays the service that polled ready
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let store = Arc::clone(&self.store);
        let config = Arc::clone(&self.config);

        Box::pin(async move {
            let cookie_path = config
                .cookie_options
                .as_ref()
                .map(|options| options.path)
                .unwrap_or("/");

            // requests outside the cookie's path scope carry no session
            if !path_in_scope(req.uri().path(), cookie_path) {
                return inner.call(req).await;
            }

            let Some(cookies) = req.extensions().get::<Cookies>().cloned() else {
                tracing::error!(
                    "cookies not found in the request extensions; \
                     is CookieManagerLayer applied after SessionLayer?"
                );
                return Ok(internal_error());
            };

            let secure_request = is_secure_request(&req);
            let session_inner = Arc::new(Inner::new(store, Arc::clone(&config), secure_request));
            let session = Session::new(Arc::clone(&session_inner));

            let cookie_name = config
                .cookie_options
                .as_ref()
                .map(|options| options.name)
                .unwrap_or("session_id");
            let presented = cookies
                .get(cookie_name)
                .map(|cookie| cookie.value().to_string());

            let prepared = match &presented {
                None => session.attach_fresh(),
                Some(token) => prepare_session(&session, &config, token).await,
            };
            if let Err(err) = prepared {
                tracing::error!(err = %err, "failed to prepare session for request");
                return Ok(internal_error());
            }

            req.extensions_mut().insert(session_inner);

            let res = inner.call(req).await?;

            if let Err(err) =
                finalize_session(&session, &config, presented.as_deref(), &cookies).await
            {
                tracing::error!(err = %err, "failed to persist session after request");
                return Ok(internal_error());
            }

            Ok(res)
        })
    }
}

/// Decrypt phase: verify the presented cookie and attach the matching
/// session.
///
/// A tampered cookie and a store miss both attach a fresh session and are
/// not errors; only a store failure propagates, leaving no session attached.
async fn prepare_session<S: SessionStore>(
    session: &Session<S>,
    config: &SessionConfig,
    token: &str,
) -> Result<(), Error> {
    let unsigned = config.signer.unsign(token);
    let Some(session_id) = unsigned.value.filter(|_| unsigned.valid) else {
        tracing::warn!("possibly suspicious activity: session cookie failed verification");
        return session.attach_fresh();
    };

    let payload = session.inner.store.get(&session_id).await.map_err(|err| {
        tracing::error!(err = %err, "failed to get session from store");
        err
    })?;

    let Some(payload) = payload else {
        tracing::debug!("session cookie referenced an unknown or expired session");
        return session.attach_fresh();
    };

    session.attach_restored(session_id, payload)?;
    let Some(restored) = session.snapshot() else {
        return Ok(());
    };

    let expiry = restored
        .cookie
        .original_expires()
        .or_else(|| restored.cookie.expires());
    if expiry.is_some_and(|at| at <= OffsetDateTime::now_utc()) {
        // an expired-but-still-present server record must not be served:
        // remove it, then hand the client a regenerated session, strictly in
        // that order
        session.destroy().await?;
        session.regenerate_from(&restored).await?;
        return Ok(());
    }

    if config
        .auto_regenerate
        .as_ref()
        .is_some_and(|should_rotate| should_rotate())
    {
        session.regenerate_from(&restored).await?;
    }

    Ok(())
}

/// Persistence phase: decide whether to save the session and which cookie
/// to emit.
async fn finalize_session<S: SessionStore>(
    session: &Session<S>,
    config: &SessionConfig,
    presented: Option<&str>,
    cookies: &Cookies,
) -> Result<(), Error> {
    let Some(entity) = session.snapshot() else {
        return Ok(());
    };

    let modified = session.modified();
    let should_save = if presented != Some(entity.encrypted_id.as_str()) {
        // identity changed during handling, or the client had no cookie
        config.save_uninitialized || modified
    } else {
        config.rolling || modified
    };

    // never ship a secure session cookie over a downgraded transport
    let downgraded = entity.cookie.secure() && !session.inner.secure_request;

    if !should_save || downgraded {
        if presented.is_some_and(|value| value != entity.encrypted_id) {
            cookies.remove(entity.cookie.removal_cookie());
        }
        if entity.saved {
            cookies.add(entity.cookie.to_cookie(entity.encrypted_id.clone()));
        }
        return Ok(());
    }

    session.save().await?;
    cookies.add(entity.cookie.to_cookie(entity.encrypted_id));

    Ok(())
}

fn internal_error<B: Default>() -> Response<B> {
    let mut res = Response::new(B::default());
    *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    res
}

/// Equal paths match; otherwise the request path must extend the cookie
/// path at a `/` boundary.
fn path_in_scope(path: &str, cookie_path: &str) -> bool {
    if path == cookie_path {
        return true;
    }
    if path.len() < cookie_path.len() || !path.starts_with(cookie_path) {
        return false;
    }
    path.as_bytes().get(cookie_path.len()) == Some(&b'/') || cookie_path.ends_with('/')
}

fn is_secure_request<B>(req: &Request<B>) -> bool {
    if req.uri().scheme_str() == Some("https") {
        return true;
    }

    req.headers()
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|proto| proto.eq_ignore_ascii_case("https"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_scope_matcher() {
        assert!(path_in_scope("/path", "/path"));
        assert!(!path_in_scope("/path", "/path/to"));
        assert!(path_in_scope("/path/to", "/path"));
        assert!(path_in_scope("/path/to/", "/path"));
        assert!(!path_in_scope("/", "/path"));
        assert!(!path_in_scope("/to", "/path"));
        assert!(path_in_scope("/to", "/"));
        // a shared prefix without a segment boundary is not a match
        assert!(!path_in_scope("/pathology", "/path"));
    }

    #[test]
    fn test_secure_request_detection() {
        let https = Request::builder()
            .uri("https://example.com/")
            .body(())
            .unwrap();
        assert!(is_secure_request(&https));

        let http = Request::builder().uri("/relative").body(()).unwrap();
        assert!(!is_secure_request(&http));

        let forwarded = Request::builder()
            .uri("/relative")
            .header("x-forwarded-proto", "https")
            .body(())
            .unwrap();
        assert!(is_secure_request(&forwarded));
    }
}
