use bson::oid::ObjectId;
use tap::TapFallible;
use tokio::sync::OnceCell;

use crate::{
    api::{
        parcel::{AssignedRider, DeliveryStatus, ParcelModel},
        payment::PaymentModel,
        rider::{RiderModel, RiderStatus},
        user::{UserModel, UserRole},
    },
    error::Error,
};

use super::{
    mongo::MongoStore, DeleteOutcome, InsertOutcome, ParcelFilter, ParcelStore, PaymentStore,
    RiderStatusOutcome, RiderStore, UpdateOutcome, UserStore,
};

/// [`MongoStore`] that is built on first use.
///
/// A connection string that cannot be parsed or resolved fails the request
/// that needed the database instead of the process. The next request tries
/// again.
pub struct LazyMongoStore {
    mongo_url: String,
    database_name: String,
    store: OnceCell<MongoStore>,
}

impl LazyMongoStore {
    pub fn new(mongo_url: &str, database_name: &str) -> Self {
        Self {
            mongo_url: mongo_url.to_string(),
            database_name: database_name.to_string(),
            store: OnceCell::new(),
        }
    }

    pub async fn get(&self) -> Result<&MongoStore, Error> {
        self.store
            .get_or_try_init(|| async {
                let store = MongoStore::connect(&self.mongo_url, &self.database_name).await?;
                if let Err(err) = store.ensure_indexes().await {
                    tracing::error!("failed to ensure indexes: {}", err);
                }
                Ok::<_, Error>(store)
            })
            .await
            .tap_err(|err| tracing::error!("failed to connect to MongoDB: {}", err))
    }
}

#[axum::async_trait]
impl UserStore for LazyMongoStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserModel>, Error> {
        self.get().await?.find_user_by_email(email).await
    }

    async fn insert_user(&self, user: &UserModel) -> Result<InsertOutcome, Error> {
        self.get().await?.insert_user(user).await
    }

    async fn touch_last_log_in(
        &self,
        email: &str,
        at: bson::DateTime,
    ) -> Result<UpdateOutcome, Error> {
        self.get().await?.touch_last_log_in(email, at).await
    }

    async fn search_users(&self, fragment: &str) -> Result<Vec<UserModel>, Error> {
        self.get().await?.search_users(fragment).await
    }

    async fn set_user_role(
        &self,
        id: ObjectId,
        role: UserRole,
        at: bson::DateTime,
    ) -> Result<UpdateOutcome, Error> {
        self.get().await?.set_user_role(id, role, at).await
    }
}

#[axum::async_trait]
impl ParcelStore for LazyMongoStore {
    async fn list_parcels(&self, filter: &ParcelFilter) -> Result<Vec<ParcelModel>, Error> {
        self.get().await?.list_parcels(filter).await
    }

    async fn find_parcel(&self, id: ObjectId) -> Result<Option<ParcelModel>, Error> {
        self.get().await?.find_parcel(id).await
    }

    async fn insert_parcel(&self, parcel: &ParcelModel) -> Result<InsertOutcome, Error> {
        self.get().await?.insert_parcel(parcel).await
    }

    async fn delete_parcel(&self, id: ObjectId) -> Result<DeleteOutcome, Error> {
        self.get().await?.delete_parcel(id).await
    }

    async fn set_delivery_status(
        &self,
        tracking_id: &str,
        status: DeliveryStatus,
        at: bson::DateTime,
    ) -> Result<UpdateOutcome, Error> {
        self.get()
            .await?
            .set_delivery_status(tracking_id, status, at)
            .await
    }

    async fn parcels_for_rider(&self, email: &str) -> Result<Vec<ParcelModel>, Error> {
        self.get().await?.parcels_for_rider(email).await
    }

    async fn assign_rider(
        &self,
        parcel_id: ObjectId,
        rider_id: ObjectId,
        snapshot: &AssignedRider,
    ) -> Result<UpdateOutcome, Error> {
        self.get()
            .await?
            .assign_rider(parcel_id, rider_id, snapshot)
            .await
    }
}

#[axum::async_trait]
impl PaymentStore for LazyMongoStore {
    async fn list_payments(&self, email: Option<&str>) -> Result<Vec<PaymentModel>, Error> {
        self.get().await?.list_payments(email).await
    }

    async fn record_payment(&self, payment: &PaymentModel) -> Result<InsertOutcome, Error> {
        self.get().await?.record_payment(payment).await
    }
}

#[axum::async_trait]
impl RiderStore for LazyMongoStore {
    async fn insert_rider(&self, rider: &RiderModel) -> Result<InsertOutcome, Error> {
        self.get().await?.insert_rider(rider).await
    }

    async fn riders_by_status(&self, status: RiderStatus) -> Result<Vec<RiderModel>, Error> {
        self.get().await?.riders_by_status(status).await
    }

    async fn available_riders(&self, district: Option<&str>) -> Result<Vec<RiderModel>, Error> {
        self.get().await?.available_riders(district).await
    }

    async fn set_rider_status(
        &self,
        rider_id: ObjectId,
        status: RiderStatus,
        rider_email: &str,
        at: bson::DateTime,
    ) -> Result<RiderStatusOutcome, Error> {
        self.get()
            .await?
            .set_rider_status(rider_id, status, rider_email, at)
            .await
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use axum::http::{Method, StatusCode};

    use crate::{
        api::tests::{bootstrap_with, send},
        error::Error,
        store::{ParcelFilter, ParcelStore, UserStore},
    };

    use super::LazyMongoStore;

    const UNUSABLE_URL: &str = "not a connection string";

    #[tokio::test]
    async fn test_unusable_url_fails_each_call() {
        let store = LazyMongoStore::new(UNUSABLE_URL, "profast_test");

        let err = store.find_user_by_email("a@x.com").await.unwrap_err();
        assert_matches!(err, Error::DatabaseError(_));

        let err = store.list_parcels(&ParcelFilter::All).await.unwrap_err();
        assert_matches!(err, Error::DatabaseError(_));
        assert!(store.store.get().is_none());
    }

    #[tokio::test]
    async fn test_router_serves_without_database() {
        let bootstrap = bootstrap_with(LazyMongoStore::new(UNUSABLE_URL, "profast_test")).await;

        let (status, _) = send(&bootstrap, Method::GET, "/", None, None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) =
            send(&bootstrap, Method::GET, "/users/a@x.com/role", None, None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["type"], "DatabaseError");
    }
}
