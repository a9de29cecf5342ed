//! # Sesh: signed-cookie sessions for tower HTTP applications
//!
//! `sesh` manages server-side sessions identified by a random id carried in
//! a signed cookie. The middleware verifies the cookie on the way in,
//! attaches a session to the request, and on the way out persists the
//! session only when its content actually changed or policy requires it.
//!
//! # Quick Start
//!
//! Here's a basic example with [Axum](https://docs.rs/axum/latest/axum/) and
//! the in-memory store.
//!
//! ```rust,no_run
//! use axum::{Router, routing::get};
//! use sesh::{CookieOptions, Session, SessionLayer};
//! use sesh::cookie::time::Duration;
//! use sesh::store::MemoryStore;
//! use std::sync::Arc;
//! use tower_cookies::CookieManagerLayer;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(MemoryStore::new());
//!
//!     let cookie_options = CookieOptions::build()
//!         .name("session_id")
//!         .http_only(true)
//!         .same_site(cookie::SameSite::Lax)
//!         .max_age(Duration::hours(1))
//!         .path("/");
//!
//!     let session_layer = SessionLayer::new(store, "an-example-secret-of-32-characters")
//!         .unwrap()
//!         .with_cookie_options(cookie_options);
//!
//!     let app = Router::new()
//!         .route("/", get(handler))
//!         .layer(session_layer)
//!         .layer(CookieManagerLayer::new()); // CookieManagerLayer must be after
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//!
//! async fn handler(session: Session<MemoryStore>) -> String {
//!     let count: i32 = session.get("count").unwrap_or(0);
//!     session.set("count", count + 1).unwrap();
//!     format!("You've visited this page {} times", count + 1)
//! }
//! ```
//!
//! # Session Management
//!
//! ```rust,no_run
//! use sesh::Session;
//! use sesh::cookie::time::Duration;
//! use sesh::store::MemoryStore;
//!
//! # async fn handler(session: Session<MemoryStore>) {
//! // Read and write the payload; changes are detected by content hash and
//! // persisted after the handler completes
//! let user: Option<String> = session.get("user");
//! session.set("user", "amelia").unwrap();
//!
//! // Rotate the session id (e.g. after a privilege change)
//! session.regenerate().await.unwrap();
//!
//! // Re-fetch the payload from the store
//! session.reload().await.unwrap();
//!
//! // Extend the cookie expiry without touching the payload
//! session.touch(Duration::hours(2));
//!
//! // Remove the session entirely; the request ends up sessionless
//! session.destroy().await.unwrap();
//! # }
//! ```
//!
//! # Cookie integrity
//!
//! The cookie value is the session id in signed form, produced by a
//! [`Signer`]. String secrets build the HMAC-SHA256 reference signer; pass a
//! `Vec<String>` to rotate keys (the first signs, all verify) or a pre-built
//! [`Signer`] of your own. Tampered cookies are indistinguishable from
//! absent ones: the request simply gets a fresh session.
//!
//! # Persistence policy
//!
//! After the handler runs the middleware saves the session only when its
//! content hash moved, or when policy demands it: `save_uninitialized`
//! persists sessions the client has no cookie for yet, and `rolling`
//! re-saves on every request to keep the cookie fresh. A request arriving
//! over plain HTTP for a `Secure` cookie is a security downgrade: nothing is
//! persisted and no cookie is set on that response.
//!
//! # Stores
//!
//! Sessions persist through the [`store::SessionStore`] trait. The built-in
//! [`store::MemoryStore`] keeps payloads in a process-local map; it is the
//! reference/test backend and is not durable across restarts.
//!
//! # Important Notes
//!
//! ## Middleware Ordering
//!
//! The `SessionLayer` must be applied **before** the `CookieManagerLayer`:
//!
//! ```rust,no_run
//! use axum::Router;
//! use sesh::{SessionLayer, store::MemoryStore};
//! use tower_cookies::CookieManagerLayer;
//! use std::sync::Arc;
//!
//! let app: Router<()> = Router::new();
//! let session_layer =
//!     SessionLayer::new(Arc::new(MemoryStore::new()), "an-example-secret-of-32-characters")
//!         .unwrap();
//!
//! // Correct order
//! let router = app
//!     .layer(session_layer)
//!     .layer(CookieManagerLayer::new());
//! ```
//!
//! ## Best Practices
//!
//! - Enable HTTPS in production; leave `secure` on `Auto` or set it to
//!   `Always`.
//! - Always set a session expiration time (`max_age`).
//! - Rotate session ids with `session.regenerate()` after a change in
//!   privilege level (like logging in), or install an `auto_regenerate`
//!   predicate for periodic rotation.
//! - Keep `http_only: true` to prevent client-side script access to the
//!   session cookie.

pub use cookie;

#[cfg(feature = "axum")]
mod extract;

mod service;
pub use service::*;

mod session;
pub use session::*;

mod signer;
pub use signer::*;

pub mod store;

pub use tower_cookies;
