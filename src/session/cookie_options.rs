use std::sync::Arc;

use cookie::SameSite;
use cookie::time::{Duration, OffsetDateTime};
use tower_cookies::Cookie;

use crate::Error;
use crate::signer::Signer;

/// How the cookie's `Secure` attribute is decided.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Secure {
    /// Resolve from the request transport when the cookie model is built:
    /// secure over HTTPS, otherwise insecure with `SameSite` forced to `Lax`.
    #[default]
    Auto,
    Always,
    Never,
}

/// Configuration options for session cookies.
///
/// # Example
///
/// ```rust
/// use sesh::CookieOptions;
/// use sesh::cookie::time::Duration;
///
/// let cookie_options = CookieOptions::build()
///     .name("session_id")
///     .http_only(true)
///     .same_site(cookie::SameSite::Lax)
///     .max_age(Duration::hours(1))
///     .path("/");
/// ```
#[derive(Clone, Debug)]
pub struct CookieOptions {
    pub name: &'static str,
    pub http_only: bool,
    pub domain: Option<&'static str>,
    pub path: &'static str,
    pub same_site: SameSite,
    pub secure: Secure,
    pub partitioned: bool,
    pub max_age: Option<Duration>,
    pub expires: Option<OffsetDateTime>,
    /// What the client was originally promised; carried across
    /// regenerate/reload, never set directly by callers.
    pub original_max_age: Option<Duration>,
    pub original_expires: Option<OffsetDateTime>,
    /// Defaults to the signer the layer was configured with.
    pub signer: Option<Arc<dyn Signer>>,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            name: "session_id",
            http_only: true,
            domain: None,
            path: "/",
            same_site: SameSite::Lax,
            secure: Secure::Auto,
            partitioned: false,
            max_age: None,
            expires: None,
            original_max_age: None,
            original_expires: None,
            signer: None,
        }
    }
}

impl CookieOptions {
    /// Creates a new `CookieOptions` with default values.
    pub fn build() -> Self {
        Self::default()
    }

    /// Sets the name of the cookie.
    pub fn name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = same_site;
        self
    }

    pub fn secure(mut self, secure: Secure) -> Self {
        self.secure = secure;
        self
    }

    pub fn partitioned(mut self, partitioned: bool) -> Self {
        self.partitioned = partitioned;
        self
    }

    pub fn domain(mut self, domain: &'static str) -> Self {
        self.domain = Some(domain);
        self
    }

    pub fn path(mut self, path: &'static str) -> Self {
        self.path = path;
        self
    }

    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn expires(mut self, at: OffsetDateTime) -> Self {
        self.expires = Some(at);
        self
    }

    pub fn signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }
}

/// The cookie attributes tracked for one session.
///
/// Built once per session from [`CookieOptions`] and the request's transport;
/// `Secure::Auto` is resolved here and never re-resolved. The original
/// max-age/expires snapshot records what the client was issued and feeds the
/// expiry-policy comparison, independent of the live `expires` value.
#[derive(Clone, Debug)]
pub struct SessionCookie {
    name: &'static str,
    path: &'static str,
    domain: Option<&'static str>,
    http_only: bool,
    same_site: SameSite,
    secure: bool,
    partitioned: bool,
    expires: Option<OffsetDateTime>,
    original_max_age: Option<Duration>,
    original_expires: Option<OffsetDateTime>,
    signer: Arc<dyn Signer>,
}

impl SessionCookie {
    pub fn new(options: &CookieOptions, secure_request: bool) -> Result<Self, Error> {
        let signer = options.signer.clone().ok_or(Error::MissingSigner)?;

        let original_max_age = options.original_max_age.or(options.max_age);
        let original_expires = options.original_expires.or(options.expires);

        // a configured max-age wins over a configured expiry
        let expires = match options.max_age {
            Some(max_age) => Some(OffsetDateTime::now_utc() + max_age),
            None => options.expires,
        };

        let (secure, same_site) = match options.secure {
            Secure::Always => (true, options.same_site),
            Secure::Never => (false, options.same_site),
            Secure::Auto if secure_request => (true, options.same_site),
            Secure::Auto => (false, SameSite::Lax),
        };

        Ok(Self {
            name: options.name,
            path: options.path,
            domain: options.domain,
            http_only: options.http_only,
            same_site,
            secure,
            partitioned: options.partitioned,
            expires,
            original_max_age,
            original_expires,
            signer,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn path(&self) -> &'static str {
        self.path
    }

    pub fn secure(&self) -> bool {
        self.secure
    }

    pub fn same_site(&self) -> SameSite {
        self.same_site
    }

    pub fn expires(&self) -> Option<OffsetDateTime> {
        self.expires
    }

    pub fn set_expires(&mut self, at: OffsetDateTime) {
        self.expires = Some(at);
    }

    /// Derived from `expires`; `None` when no expiry is set.
    pub fn max_age(&self) -> Option<Duration> {
        self.expires.map(|at| at - OffsetDateTime::now_utc())
    }

    /// Sets `expires` to now + `max_age` and records the new original
    /// max-age promise.
    pub fn set_max_age(&mut self, max_age: Duration) {
        self.expires = Some(OffsetDateTime::now_utc() + max_age);
        self.original_max_age = Some(max_age);
    }

    pub fn original_max_age(&self) -> Option<Duration> {
        self.original_max_age
    }

    pub fn original_expires(&self) -> Option<OffsetDateTime> {
        self.original_expires
    }

    pub(crate) fn signer(&self) -> &Arc<dyn Signer> {
        &self.signer
    }

    /// The options a subsequent session for the same client is built from.
    ///
    /// Includes the signer, which must propagate across regenerate/reload,
    /// and the already-resolved `secure` flag so `Auto` is never re-resolved.
    pub fn options(&self) -> CookieOptions {
        CookieOptions {
            name: self.name,
            http_only: self.http_only,
            domain: self.domain,
            path: self.path,
            same_site: self.same_site,
            secure: if self.secure { Secure::Always } else { Secure::Never },
            partitioned: self.partitioned,
            max_age: None,
            expires: self.expires,
            original_max_age: self.original_max_age,
            original_expires: self.original_expires,
            signer: Some(self.signer.clone()),
        }
    }

    /// The wire cookie handed to the serialization collaborator.
    ///
    /// Deliberately excludes the signer.
    pub fn to_cookie(&self, value: String) -> Cookie<'static> {
        let mut builder = Cookie::build((self.name, value))
            .path(self.path)
            .secure(self.secure)
            .http_only(self.http_only)
            .same_site(self.same_site)
            .partitioned(self.partitioned);

        if let Some(domain) = self.domain {
            builder = builder.domain(domain);
        }

        if let Some(expires) = self.expires {
            builder = builder
                .max_age(expires - OffsetDateTime::now_utc())
                .expires(expires);
        }

        builder.build()
    }

    /// A cookie matching this session's name/path/domain, used to clear a
    /// stale client cookie.
    pub fn removal_cookie(&self) -> Cookie<'static> {
        let mut builder = Cookie::build(self.name).path(self.path);
        if let Some(domain) = self.domain {
            builder = builder.domain(domain);
        }
        builder.build()
    }
}
