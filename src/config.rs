use std::path::PathBuf;

use anyhow::Context;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_DATABASE_NAME: &str = "profast_delivery_db";
pub const DEFAULT_LOG_FILTER: &str = "profast=debug,tower_http=debug";

/// Where the Firebase signing keys come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirebaseKeys {
    /// Base64 encoded JWK set.
    Inline(String),
    Path(PathBuf),
    Fetch,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub mongo_url: String,
    pub database_name: String,
    pub payment_gateway_key: String,
    pub firebase_project_id: String,
    pub firebase_keys: FirebaseKeys,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|it| !it.is_empty())
                .with_context(|| format!("Missing required environment variable: {}", key))
        };

        let port = match lookup("PORT") {
            Some(port) => port
                .parse()
                .with_context(|| format!("PORT is not a valid port: {}", port))?,
            None => DEFAULT_PORT,
        };

        let firebase_keys = match (lookup("FIREBASE_CERTS"), lookup("FIREBASE_CERTS_PATH")) {
            (Some(inline), _) if !inline.is_empty() => FirebaseKeys::Inline(inline),
            (_, Some(path)) if !path.is_empty() => FirebaseKeys::Path(path.into()),
            _ => FirebaseKeys::Fetch,
        };

        Ok(Self {
            port,
            mongo_url: required("MONGODB_URI")?,
            database_name: lookup("DATABASE_NAME")
                .filter(|it| !it.is_empty())
                .unwrap_or_else(|| DEFAULT_DATABASE_NAME.to_string()),
            payment_gateway_key: required("PAYMENT_GATEWAY_KEY")?,
            firebase_project_id: required("FIREBASE_PROJECT_ID")?,
            firebase_keys,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{Config, FirebaseKeys, DEFAULT_DATABASE_NAME, DEFAULT_PORT};

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("MONGODB_URI", "mongodb://localhost:27017"),
        ("PAYMENT_GATEWAY_KEY", "sk_test_1"),
        ("FIREBASE_PROJECT_ID", "profast"),
    ];

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&REQUIRED)).unwrap();

        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.database_name, DEFAULT_DATABASE_NAME);
        assert_eq!(config.firebase_keys, FirebaseKeys::Fetch);
    }

    #[test]
    fn test_overrides() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("PORT", "8080"),
            ("DATABASE_NAME", "staging"),
            ("FIREBASE_CERTS_PATH", "/etc/profast/jwks.json"),
        ]);

        let config = Config::from_lookup(lookup(&pairs)).unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.database_name, "staging");
        assert_eq!(
            config.firebase_keys,
            FirebaseKeys::Path("/etc/profast/jwks.json".into())
        );
    }

    #[test]
    fn test_missing_required() {
        let err = Config::from_lookup(lookup(&REQUIRED[1..])).unwrap_err();
        assert!(err.to_string().contains("MONGODB_URI"));

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("PORT", "eighty"));
        assert!(Config::from_lookup(lookup(&pairs)).is_err());
    }
}
