use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts},
    headers::{authorization::Bearer, Authorization},
    http::request::Parts,
    RequestPartsExt, TypedHeader,
};
use serde::{Deserialize, Serialize};
use tap::TapFallible;

use crate::{
    error::{Error, UnauthorizedType},
    store::{Db, UserStore},
};

use super::user::UserRole;

/// Caller identity as confirmed by the identity provider.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub uid: String,
    pub email: String,
}

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("unknown signing key {0:?}")]
    UnknownKey(Option<String>),

    #[error("token carries no email")]
    MissingEmail,

    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

/// Verifies opaque bearer tokens.
#[axum::async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, VerifyError>;
}

#[derive(Clone)]
pub struct Auth(pub Arc<dyn IdentityProvider>);

impl Auth {
    pub fn new(provider: impl IdentityProvider + 'static) -> Self {
        Self(Arc::new(provider))
    }
}

impl std::ops::Deref for Auth {
    type Target = dyn IdentityProvider;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl VerifiedIdentity {
    pub async fn from_token(auth: &Auth, token: &str) -> Result<Self, Error> {
        auth.verify(token)
            .await
            .map_err(|_| Error::Forbidden)
            .tap_err(|_| tracing::debug!("bearer token failed verification"))
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for VerifiedIdentity
where
    Auth: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if !parts.headers.contains_key(axum::http::header::AUTHORIZATION) {
            return Err(Error::Unauthorized(UnauthorizedType::MissingToken));
        }

        let TypedHeader(Authorization(token)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| Error::Unauthorized(UnauthorizedType::MalformedHeader))?;

        let auth = Auth::from_ref(state);

        Self::from_token(&auth, token.token()).await
    }
}

/// Verified caller whose stored user has the admin role.
#[derive(Debug, Clone)]
pub struct Admin(pub VerifiedIdentity);

impl Admin {
    pub async fn from_identity(identity: VerifiedIdentity, db: &Db) -> Result<Self, Error> {
        let user = db.find_user_by_email(&identity.email).await?;

        match user {
            Some(user) if user.role == UserRole::Admin => Ok(Self(identity)),
            _ => Err(Error::Forbidden)
                .tap_err(|_| tracing::debug!(email = %identity.email, "non admin tried admin route")),
        }
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Admin
where
    Auth: FromRef<S>,
    Db: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let identity = parts.extract_with_state::<VerifiedIdentity, _>(state).await?;
        let db = Db::from_ref(state);

        Self::from_identity(identity, &db).await
    }
}
