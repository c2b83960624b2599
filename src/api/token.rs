use std::time::Instant;

use anyhow::Context;
use base64::Engine;
use jsonwebtoken::{
    jwk::{Jwk, JwkSet},
    Algorithm, DecodingKey, Validation,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::config::FirebaseKeys;

use super::auth::{IdentityProvider, VerifiedIdentity, VerifyError};

/// Google publishes the keys signing Firebase ID tokens here.
pub const FIREBASE_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FirebaseClaims {
    pub sub: String,
    pub aud: String,
    pub iss: String,
    pub exp: i64,
    #[serde(default)]
    pub email: Option<String>,
}

/// How often a downloaded key set is refreshed.
#[derive(Debug, Clone, Copy)]
pub struct KeyRefresh {
    /// Keys older than this are refetched before use.
    pub interval: std::time::Duration,
    /// Minimum gap between refetches triggered by an unknown `kid`.
    pub cooldown: std::time::Duration,
    /// How long past `interval` cached keys are still trusted when Google is unreachable.
    pub max_stale: std::time::Duration,
}

impl Default for KeyRefresh {
    fn default() -> Self {
        Self {
            interval: std::time::Duration::from_secs(60 * 60),
            cooldown: std::time::Duration::from_secs(30),
            max_stale: std::time::Duration::from_secs(60 * 60),
        }
    }
}

struct KeyCache {
    keys: JwkSet,
    fetched_at: Instant,
}

/// Verifies Firebase ID tokens.
///
/// Keys loaded from the environment or a file are fixed. Keys downloaded
/// from a JWKS url are refetched when they age out or when a token names
/// a `kid` the cache does not hold.
pub struct FirebaseVerifier {
    cache: RwLock<KeyCache>,
    refresh_lock: Mutex<()>,
    source: Option<String>,
    refresh: KeyRefresh,
    client: reqwest::Client,
    validation: Validation,
}

impl FirebaseVerifier {
    pub fn new(project_id: &str, keys: JwkSet) -> Self {
        Self::with_source(project_id, keys, None, KeyRefresh::default())
    }

    fn with_source(
        project_id: &str,
        keys: JwkSet,
        source: Option<String>,
        refresh: KeyRefresh,
    ) -> Self {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[project_id]);
        validation.set_issuer(&[format!("https://securetoken.google.com/{}", project_id)]);

        Self {
            cache: RwLock::new(KeyCache {
                keys,
                fetched_at: Instant::now(),
            }),
            refresh_lock: Mutex::new(()),
            source,
            refresh,
            client: reqwest::Client::new(),
            validation,
        }
    }

    pub fn from_jwks_json(project_id: &str, json: &[u8]) -> anyhow::Result<Self> {
        let keys: JwkSet = serde_json::from_slice(json).context("Failed to parse Firebase key set")?;

        Ok(Self::new(project_id, keys))
    }

    /// Downloads the key set from `url` and keeps it fresh.
    #[tracing::instrument(skip(refresh))]
    pub async fn remote(project_id: &str, url: &str, refresh: KeyRefresh) -> anyhow::Result<Self> {
        let verifier = Self::with_source(
            project_id,
            JwkSet { keys: Vec::new() },
            Some(url.to_string()),
            refresh,
        );

        let keys = download(&verifier.client, url).await?;
        tracing::info!("loaded {} Firebase signing keys", keys.keys.len());
        verifier.cache.write().await.keys = keys;

        Ok(verifier)
    }

    pub async fn fetch(project_id: &str) -> anyhow::Result<Self> {
        Self::remote(project_id, FIREBASE_JWKS_URL, KeyRefresh::default()).await
    }

    pub async fn load(project_id: &str, keys: &FirebaseKeys) -> anyhow::Result<Self> {
        match keys {
            FirebaseKeys::Inline(encoded) => {
                let json = base64::engine::general_purpose::STANDARD
                    .decode(encoded.trim())
                    .context("FIREBASE_CERTS is not valid base64")?;
                Self::from_jwks_json(project_id, &json)
            }
            FirebaseKeys::Path(path) => {
                let json = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                Self::from_jwks_json(project_id, &json)
            }
            FirebaseKeys::Fetch => Self::fetch(project_id).await,
        }
    }

    async fn key(&self, kid: &str) -> Result<Jwk, VerifyError> {
        let unknown = || VerifyError::UnknownKey(Some(kid.to_string()));

        {
            let cache = self.cache.read().await;
            if let Some(jwk) = cache.keys.find(kid) {
                if self.source.is_none() || cache.fetched_at.elapsed() < self.refresh.interval {
                    return Ok(jwk.clone());
                }
            }
        }

        let url = match self.source.as_deref() {
            Some(url) => url,
            None => return Err(unknown()),
        };

        // One refetch at a time; later callers see its result.
        let _guard = self.refresh_lock.lock().await;

        let (cached, age) = {
            let cache = self.cache.read().await;
            let age = cache.fetched_at.elapsed();
            let found = cache.keys.find(kid);
            match found {
                Some(jwk) if age < self.refresh.interval => return Ok(jwk.clone()),
                None if age < self.refresh.cooldown => return Err(unknown()),
                found => (found.cloned(), age),
            }
        };

        match download(&self.client, url).await {
            Ok(keys) => {
                tracing::info!("refreshed {} Firebase signing keys", keys.keys.len());
                let jwk = keys.find(kid).cloned();
                *self.cache.write().await = KeyCache {
                    keys,
                    fetched_at: Instant::now(),
                };
                jwk.ok_or_else(unknown)
            }
            Err(err) => match cached {
                Some(jwk) if age < self.refresh.interval + self.refresh.max_stale => {
                    tracing::warn!("using stale Firebase keys, refresh failed: {:#}", err);
                    Ok(jwk)
                }
                _ => {
                    tracing::error!("failed to refresh Firebase keys: {:#}", err);
                    Err(VerifyError::Unavailable(err.to_string()))
                }
            },
        }
    }
}

async fn download(client: &reqwest::Client, url: &str) -> anyhow::Result<JwkSet> {
    client
        .get(url)
        .send()
        .await
        .context("Failed to download Firebase key set")?
        .error_for_status()
        .context("Firebase key set request failed")?
        .json::<JwkSet>()
        .await
        .context("Failed to parse Firebase key set")
}

#[axum::async_trait]
impl IdentityProvider for FirebaseVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, VerifyError> {
        let header = jsonwebtoken::decode_header(token)?;

        let kid = header.kid.ok_or(VerifyError::UnknownKey(None))?;
        let jwk = self.key(&kid).await?;

        let key = DecodingKey::from_jwk(&jwk)?;
        let token = jsonwebtoken::decode::<FirebaseClaims>(token, &key, &self.validation)?;

        let email = token.claims.email.ok_or(VerifyError::MissingEmail)?;

        Ok(VerifiedIdentity {
            uid: token.claims.sub,
            email,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use assert_matches::assert_matches;
    use axum::{http::StatusCode, routing, Json, Router};
    use base64::Engine;
    use jsonwebtoken::{Algorithm, EncodingKey, Header};
    use time::{Duration, OffsetDateTime};

    use crate::{
        api::auth::{IdentityProvider, VerifyError},
        config::FirebaseKeys,
    };

    use super::{FirebaseClaims, FirebaseVerifier, KeyRefresh};

    const PROJECT: &str = "profast-test";

    fn verifier() -> FirebaseVerifier {
        FirebaseVerifier::from_jwks_json(PROJECT, include_bytes!("testdata/jwks.json")).unwrap()
    }

    fn sign(kid: &str, claims: &FirebaseClaims) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_string());
        let key = EncodingKey::from_rsa_pem(include_bytes!("testdata/signing_key.pem")).unwrap();

        jsonwebtoken::encode(&header, claims, &key).unwrap()
    }

    fn claims(email: Option<&str>, expires_in: Duration) -> FirebaseClaims {
        FirebaseClaims {
            sub: "uid-1".to_string(),
            aud: PROJECT.to_string(),
            iss: format!("https://securetoken.google.com/{}", PROJECT),
            exp: (OffsetDateTime::now_utc() + expires_in).unix_timestamp(),
            email: email.map(ToString::to_string),
        }
    }

    #[tokio::test]
    async fn test_verify_valid_token() {
        let token = sign("test-key-1", &claims(Some("a@x.com"), Duration::hours(1)));

        let identity = verifier().verify(&token).await.unwrap();

        assert_eq!(identity.uid, "uid-1");
        assert_eq!(identity.email, "a@x.com");
    }

    #[tokio::test]
    async fn test_reject_expired_token() {
        let token = sign("test-key-1", &claims(Some("a@x.com"), Duration::hours(-2)));

        let err = verifier().verify(&token).await.unwrap_err();
        assert_matches!(err, VerifyError::InvalidToken(_));
    }

    #[tokio::test]
    async fn test_reject_foreign_project() {
        let mut claims = claims(Some("a@x.com"), Duration::hours(1));
        claims.aud = "someone-else".to_string();
        let token = sign("test-key-1", &claims);

        let err = verifier().verify(&token).await.unwrap_err();
        assert_matches!(err, VerifyError::InvalidToken(_));
    }

    #[tokio::test]
    async fn test_reject_unknown_key() {
        let token = sign("rotated-away", &claims(Some("a@x.com"), Duration::hours(1)));

        let err = verifier().verify(&token).await.unwrap_err();
        assert_matches!(err, VerifyError::UnknownKey(Some(kid)) if kid == "rotated-away");
    }

    #[tokio::test]
    async fn test_reject_token_without_email() {
        let token = sign("test-key-1", &claims(None, Duration::hours(1)));

        let err = verifier().verify(&token).await.unwrap_err();
        assert_matches!(err, VerifyError::MissingEmail);
    }

    #[tokio::test]
    async fn test_reject_garbage() {
        let err = verifier().verify("definitely.not.a-jwt").await.unwrap_err();
        assert_matches!(err, VerifyError::InvalidToken(_));
    }

    #[tokio::test]
    async fn test_load_inline_keys() {
        let encoded =
            base64::engine::general_purpose::STANDARD.encode(include_bytes!("testdata/jwks.json"));
        let verifier = FirebaseVerifier::load(PROJECT, &FirebaseKeys::Inline(encoded))
            .await
            .unwrap();

        let token = sign("test-key-1", &claims(Some("a@x.com"), Duration::hours(1)));
        assert_eq!(verifier.verify(&token).await.unwrap().email, "a@x.com");

        let err = FirebaseVerifier::load(PROJECT, &FirebaseKeys::Inline("%%%".to_string()))
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("base64"));
    }

    /// The checked-in key set with its only key renamed.
    fn jwks_with_kid(kid: &str) -> serde_json::Value {
        let mut jwks: serde_json::Value =
            serde_json::from_slice(include_bytes!("testdata/jwks.json")).unwrap();
        jwks["keys"][0]["kid"] = kid.into();
        jwks
    }

    async fn serve(app: Router) -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::Server::from_tcp(listener)
                .unwrap()
                .serve(app.into_make_service())
                .await
                .unwrap();
        });
        format!("http://{}/jwks", addr)
    }

    #[tokio::test]
    async fn test_refetch_keys_for_rotated_kid() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/jwks",
            routing::get(move || {
                let served = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    match served {
                        0 => Json(jwks_with_kid("retiring-key")),
                        _ => Json(jwks_with_kid("test-key-1")),
                    }
                }
            }),
        );
        let url = serve(app).await;
        let refresh = KeyRefresh {
            cooldown: std::time::Duration::ZERO,
            ..KeyRefresh::default()
        };
        let verifier = FirebaseVerifier::remote(PROJECT, &url, refresh).await.unwrap();

        let token = sign("test-key-1", &claims(Some("a@x.com"), Duration::hours(1)));
        assert_eq!(verifier.verify(&token).await.unwrap().email, "a@x.com");
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        // Cached now, no further download.
        assert_eq!(verifier.verify(&token).await.unwrap().email, "a@x.com");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_kid_within_cooldown_is_not_refetched() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/jwks",
            routing::get(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Json(jwks_with_kid("test-key-1")) }
            }),
        );
        let url = serve(app).await;
        let verifier = FirebaseVerifier::remote(PROJECT, &url, KeyRefresh::default())
            .await
            .unwrap();

        let token = sign("made-up", &claims(Some("a@x.com"), Duration::hours(1)));
        let err = verifier.verify(&token).await.unwrap_err();

        assert_matches!(err, VerifyError::UnknownKey(Some(kid)) if kid == "made-up");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_keys_survive_failed_refresh() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/jwks",
            routing::get(move || {
                let served = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    match served {
                        0 => Ok(Json(jwks_with_kid("test-key-1"))),
                        _ => Err(StatusCode::SERVICE_UNAVAILABLE),
                    }
                }
            }),
        );
        let url = serve(app).await;
        let refresh = KeyRefresh {
            interval: std::time::Duration::ZERO,
            ..KeyRefresh::default()
        };
        let verifier = FirebaseVerifier::remote(PROJECT, &url, refresh).await.unwrap();

        let token = sign("test-key-1", &claims(Some("a@x.com"), Duration::hours(1)));
        assert_eq!(verifier.verify(&token).await.unwrap().email, "a@x.com");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
