use axum::{
    extract::{Path, Query, State},
    Json,
};
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use validator::Validate;

use crate::{
    error::Error,
    store::{Db, UpdateOutcome, UserStore},
    util::{now, FormattedDateTime, ObjectIdString, PathObjectId},
};

use super::auth::Admin;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
    #[serde(default)]
    pub role: UserRole,

    pub created_at: bson::DateTime,
    pub last_log_in: bson::DateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_updated_at: Option<bson::DateTime>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    Customer,
    Rider,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Rider => "rider",
            Self::Admin => "admin",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct User {
    pub id: ObjectIdString,
    pub email: String,
    pub name: Option<String>,
    pub photo: Option<String>,
    pub role: UserRole,

    pub created_at: FormattedDateTime,
    pub last_log_in: FormattedDateTime,
    pub role_updated_at: Option<FormattedDateTime>,
}

impl From<UserModel> for User {
    fn from(value: UserModel) -> Self {
        Self {
            id: value.id.into(),
            email: value.email,
            name: value.name,
            photo: value.photo,
            role: value.role,

            created_at: value.created_at.into(),
            last_log_in: value.last_log_in.into(),
            role_updated_at: value.role_updated_at.map(Into::into),
        }
    }
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct SignInRequest {
    #[validate(email)]
    pub email: String,

    #[validate(length(min = 1, max = 124))]
    pub name: Option<String>,

    #[validate(url)]
    pub photo: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SignInResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub inserted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inserted_id: Option<ObjectIdString>,
}

impl SignInResponse {
    fn already_exists() -> Self {
        Self {
            message: Some("User Already exists".to_string()),
            inserted: false,
            inserted_id: None,
        }
    }
}

#[tracing::instrument(
    skip_all,
    fields(
        email = %request.email,
    )
)]
pub async fn sign_in(
    State(db): State<Db>,
    Json(request): Json<SignInRequest>,
) -> Result<Json<SignInResponse>, Error> {
    request.validate()?;

    let at = now();

    if db.find_user_by_email(&request.email).await?.is_some() {
        db.touch_last_log_in(&request.email, at).await?;
        return Ok(Json(SignInResponse::already_exists()));
    }

    let model = UserModel {
        id: ObjectId::new(),
        email: request.email,
        name: request.name,
        photo: request.photo,
        role: UserRole::Customer,
        created_at: at,
        last_log_in: at,
        role_updated_at: None,
    };

    match db.insert_user(&model).await {
        Ok(outcome) => Ok(Json(SignInResponse {
            message: None,
            inserted: true,
            inserted_id: Some(outcome.inserted_id),
        })),
        // lost a race against a concurrent first sign-in
        Err(Error::MustUniqueError(_)) => {
            tracing::debug!("user inserted concurrently");
            db.touch_last_log_in(&model.email, at).await?;
            Ok(Json(SignInResponse::already_exists()))
        }
        Err(err) => Err(err),
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RoleResponse {
    pub role: UserRole,
}

pub async fn role(
    State(db): State<Db>,
    Path(email): Path<String>,
) -> Result<Json<RoleResponse>, Error> {
    let user = db
        .find_user_by_email(&email)
        .await?
        .ok_or(Error::NotFound("user"))
        .tap_err(|_| tracing::debug!("role lookup for unknown user"))?;

    Ok(Json(RoleResponse { role: user.role }))
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct SearchQuery {
    pub email: Option<String>,
}

pub async fn search(
    Admin(_): Admin,
    State(db): State<Db>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<User>>, Error> {
    let fragment = query
        .email
        .filter(|it| !it.trim().is_empty())
        .ok_or(Error::InvalidQuery("missing email query"))?;

    let users = db.search_users(fragment.trim()).await?;

    Ok(Json(users.into_iter().map(Into::into).collect()))
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct UpdateRoleRequest {
    pub role: UserRole,
}

#[tracing::instrument(
    skip_all,
    fields(
        admin = %admin.email,
        id = %user_id,
    )
)]
pub async fn update_role(
    Admin(admin): Admin,
    State(db): State<Db>,
    PathObjectId(user_id): PathObjectId,
    Json(request): Json<UpdateRoleRequest>,
) -> Result<Json<UpdateOutcome>, Error> {
    let outcome = db.set_user_role(user_id, request.role, now()).await?;

    if outcome.matched_count == 0 {
        return Err(Error::NotFound("user"));
    }

    tracing::info!(role = request.role.as_str(), "user role changed");

    Ok(Json(outcome))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use axum::{
        extract::{Path, Query},
        Json,
    };
    use bson::oid::ObjectId;

    use std::sync::Arc;

    use crate::{
        api::tests::{bootstrap, bootstrap_with, RacingStore},
        error::Error,
        store::{memory::MemoryStore, UserStore},
        util::PathObjectId,
    };

    use super::{SearchQuery, SignInRequest, UpdateRoleRequest, UserRole};

    fn sign_in_request(email: &str) -> SignInRequest {
        SignInRequest {
            email: email.to_string(),
            name: Some("Alice".to_string()),
            photo: None,
        }
    }

    #[tokio::test]
    async fn test_sign_in_losing_insert_race() {
        let memory = Arc::new(MemoryStore::new());
        let bootstrap = bootstrap_with(RacingStore {
            inner: memory.clone(),
            stale_user_lookup: true,
            ..Default::default()
        })
        .await;
        let existing = bootstrap.create_user("a@x.com", UserRole::Customer).await;

        let Json(response) = super::sign_in(bootstrap.db(), Json(sign_in_request("a@x.com")))
            .await
            .unwrap();

        assert!(!response.inserted);
        assert_eq!(response.message.as_deref(), Some("User Already exists"));
        assert_eq!(response.inserted_id, None);

        let stored = memory.find_user_by_email("a@x.com").await.unwrap().unwrap();
        assert_eq!(stored.id, existing.id);
        assert_ne!(stored.last_log_in, existing.last_log_in);
    }

    #[tokio::test]
    async fn test_sign_in_inserts_then_touches() {
        let bootstrap = bootstrap().await;

        let Json(first) = super::sign_in(bootstrap.db(), Json(sign_in_request("a@x.com")))
            .await
            .unwrap();
        assert!(first.inserted);
        assert!(first.inserted_id.is_some());

        let created = bootstrap
            .store
            .find_user_by_email("a@x.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(created.role, UserRole::Customer);
        assert_eq!(created.name.as_deref(), Some("Alice"));

        let Json(second) = super::sign_in(bootstrap.db(), Json(sign_in_request("a@x.com")))
            .await
            .unwrap();
        assert!(!second.inserted);
        assert_eq!(second.message.as_deref(), Some("User Already exists"));

        let touched = bootstrap
            .store
            .find_user_by_email("a@x.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(touched.id, created.id);
        assert_eq!(touched.created_at, created.created_at);
        assert!(touched.last_log_in >= created.last_log_in);
    }

    #[tokio::test]
    async fn test_sign_in_rejects_invalid_email() {
        let bootstrap = bootstrap().await;

        let err = super::sign_in(bootstrap.db(), Json(sign_in_request("not-an-email")))
            .await
            .unwrap_err();
        assert_matches!(err, Error::ValidationError(_));
    }

    #[tokio::test]
    async fn test_role_lookup() {
        let bootstrap = bootstrap().await;
        bootstrap.create_user("admin@x.com", UserRole::Admin).await;

        let Json(found) = super::role(bootstrap.db(), Path("admin@x.com".to_string()))
            .await
            .unwrap();
        assert_eq!(found.role, UserRole::Admin);

        let err = super::role(bootstrap.db(), Path("missing@x.com".to_string()))
            .await
            .unwrap_err();
        assert_matches!(err, Error::NotFound("user"));
    }

    #[tokio::test]
    async fn test_search_is_case_insensitive_substring() {
        let bootstrap = bootstrap().await;
        bootstrap.create_user("Alice@Example.com", UserRole::Customer).await;
        bootstrap.create_user("bob@example.com", UserRole::Customer).await;
        bootstrap.create_user("carol@other.org", UserRole::Customer).await;

        let Json(users) = super::search(
            bootstrap.admin(),
            bootstrap.db(),
            Query(SearchQuery {
                email: Some("EXAMPLE".to_string()),
            }),
        )
        .await
        .unwrap();

        let mut emails = users.into_iter().map(|it| it.email).collect::<Vec<_>>();
        emails.sort();
        assert_eq!(emails, vec!["Alice@Example.com", "bob@example.com"]);

        let err = super::search(bootstrap.admin(), bootstrap.db(), Query(SearchQuery::default()))
            .await
            .unwrap_err();
        assert_matches!(err, Error::InvalidQuery(_));
    }

    #[tokio::test]
    async fn test_search_treats_fragment_literally() {
        let bootstrap = bootstrap().await;
        bootstrap.create_user("a+b@x.com", UserRole::Customer).await;
        bootstrap.create_user("aab@x.com", UserRole::Customer).await;

        let Json(users) = super::search(
            bootstrap.admin(),
            bootstrap.db(),
            Query(SearchQuery {
                email: Some("a+b".to_string()),
            }),
        )
        .await
        .unwrap();

        assert_eq!(users.len(), 1);
        assert_eq!(users[0].email, "a+b@x.com");
    }

    #[tokio::test]
    async fn test_update_role() {
        let bootstrap = bootstrap().await;
        let user = bootstrap.create_user("c@x.com", UserRole::Customer).await;

        let Json(outcome) = super::update_role(
            bootstrap.admin(),
            bootstrap.db(),
            PathObjectId(user.id),
            Json(UpdateRoleRequest {
                role: UserRole::Admin,
            }),
        )
        .await
        .unwrap();
        assert_eq!(outcome.matched_count, 1);
        assert_eq!(outcome.modified_count, 1);

        let updated = bootstrap
            .store
            .find_user_by_email("c@x.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.role, UserRole::Admin);
        assert!(updated.role_updated_at.is_some());

        let err = super::update_role(
            bootstrap.admin(),
            bootstrap.db(),
            PathObjectId(ObjectId::new()),
            Json(UpdateRoleRequest {
                role: UserRole::Admin,
            }),
        )
        .await
        .unwrap_err();
        assert_matches!(err, Error::NotFound("user"));
    }
}
