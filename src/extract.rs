use std::sync::Arc;

use axum_core::extract::FromRequestParts;
use http::{StatusCode, request::Parts};

use crate::store::SessionStore;
use crate::{Inner, Session};

/// Axum extractor for [`Session`].
///
/// The session is attached by [`crate::SessionLayer`] during pre-handling;
/// a request outside the cookie's path scope, or one that never went through
/// the layer, has no session to extract.
impl<S, State> FromRequestParts<State> for Session<S>
where
    S: SessionStore,
    State: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &State) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Arc<Inner<S>>>()
            .cloned()
            .map(Session::new)
            .ok_or_else(|| {
                tracing::error!("session layer not found in the request extensions");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "session layer not found in the request extensions",
                )
            })
    }
}
