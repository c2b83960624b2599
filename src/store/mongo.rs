use axum::http::StatusCode;
use bson::{oid::ObjectId, Document};
use mongodb::options::{ClientOptions, FindOptions};

use crate::{
    api::{
        parcel::{AssignedRider, DeliveryStatus, ParcelModel, PaymentStatus},
        payment::PaymentModel,
        rider::{RiderModel, RiderStatus},
        user::{UserModel, UserRole},
    },
    error::Error,
    mongo_ext::{is_duplicate_key, transaction_options, Collection},
};

use super::{
    check_assignable, DeleteOutcome, InsertOutcome, ParcelFilter, ParcelStore,
    PaymentStore, RiderStatusOutcome, RiderStore, UpdateOutcome, UserStore, RIDER_CAPACITY,
    USER_SEARCH_LIMIT,
};

#[derive(Clone)]
pub struct MongoStore {
    pub(crate) client: mongodb::Client,
    pub(crate) database: mongodb::Database,
    pub(crate) users: Collection<UserModel>,
    pub(crate) parcels: Collection<ParcelModel>,
    pub(crate) payments: Collection<PaymentModel>,
    pub(crate) riders: Collection<RiderModel>,
}

impl MongoStore {
    pub async fn connect(mongo_url: &str, database_name: &str) -> Result<Self, Error> {
        let mongo_client_opt = ClientOptions::parse(mongo_url).await?;
        let client = mongodb::Client::with_options(mongo_client_opt)?;

        Ok(Self::new(client, database_name))
    }

    pub fn new(client: mongodb::Client, database_name: &str) -> Self {
        let database = client.database(database_name);

        Self {
            users: database.collection("users").into(),
            parcels: database.collection("parcels").into(),
            payments: database.collection("payments").into(),
            riders: database.collection("riders").into(),
            database,
            client,
        }
    }

    pub async fn ping(&self) -> Result<(), Error> {
        self.database
            .run_command(bson::doc! { "ping": 1 }, None)
            .await
            .map(|_| ())
            .map_err(Into::into)
    }
}

fn newest_first(field: &str) -> FindOptions {
    FindOptions::builder().sort(bson::doc! { field: -1 }).build()
}

fn parcel_filter(filter: &ParcelFilter) -> Document {
    match filter {
        ParcelFilter::All => bson::doc! {},
        ParcelFilter::Sender(email) => bson::doc! { "senderDetails.email": email },
        ParcelFilter::Status { delivery, payment } => bson::doc! {
            "parcelDetails.delivery_status": delivery.as_str(),
            "parcelDetails.payment_status": payment.as_str(),
        },
    }
}

/// Case-insensitive match on any part of the email, with `fragment` taken literally.
fn email_search(fragment: &str) -> Document {
    bson::doc! {
        "email": {
            "$regex": regex::escape(fragment),
            "$options": "i",
        }
    }
}

fn unique_email(err: mongodb::error::Error) -> Error {
    if is_duplicate_key(&err) {
        Error::MustUniqueError("email".to_string())
    } else {
        err.into()
    }
}

fn inserted(result: mongodb::results::InsertOneResult, fallback: ObjectId) -> InsertOutcome {
    InsertOutcome {
        inserted_id: result.inserted_id.as_object_id().unwrap_or(fallback).into(),
    }
}

#[axum::async_trait]
impl UserStore for MongoStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserModel>, Error> {
        self.users
            .find_one(bson::doc! { "email": email }, None)
            .await
            .map_err(Into::into)
    }

    async fn insert_user(&self, user: &UserModel) -> Result<InsertOutcome, Error> {
        let result = self
            .users
            .insert_one(user, None)
            .await
            .map_err(unique_email)?;

        Ok(inserted(result, user.id))
    }

    async fn touch_last_log_in(
        &self,
        email: &str,
        at: bson::DateTime,
    ) -> Result<UpdateOutcome, Error> {
        self.users
            .update_one(
                bson::doc! { "email": email },
                bson::doc! { "$set": { "last_log_in": at } },
                None,
            )
            .await
            .map(Into::into)
            .map_err(Into::into)
    }

    async fn search_users(&self, fragment: &str) -> Result<Vec<UserModel>, Error> {
        self.users
            .find_all(
                email_search(fragment),
                FindOptions::builder()
                    .limit(USER_SEARCH_LIMIT as i64)
                    .build(),
            )
            .await
    }

    async fn set_user_role(
        &self,
        id: ObjectId,
        role: UserRole,
        at: bson::DateTime,
    ) -> Result<UpdateOutcome, Error> {
        self.users
            .update_one(
                bson::doc! { "_id": id },
                bson::doc! {
                    "$set": {
                        "role": role.as_str(),
                        "role_updated_at": at,
                    }
                },
                None,
            )
            .await
            .map(Into::into)
            .map_err(Into::into)
    }
}

#[axum::async_trait]
impl ParcelStore for MongoStore {
    async fn list_parcels(&self, filter: &ParcelFilter) -> Result<Vec<ParcelModel>, Error> {
        self.parcels
            .find_all(parcel_filter(filter), newest_first("parcelDetails.createdAt"))
            .await
    }

    async fn find_parcel(&self, id: ObjectId) -> Result<Option<ParcelModel>, Error> {
        self.parcels.find_one_by_id(id).await
    }

    async fn insert_parcel(&self, parcel: &ParcelModel) -> Result<InsertOutcome, Error> {
        let result = self.parcels.insert_one(parcel, None).await?;

        Ok(inserted(result, parcel.id))
    }

    async fn delete_parcel(&self, id: ObjectId) -> Result<DeleteOutcome, Error> {
        let result = self.parcels.delete_one(bson::doc! { "_id": id }, None).await?;

        Ok(DeleteOutcome {
            deleted_count: result.deleted_count,
        })
    }

    async fn set_delivery_status(
        &self,
        tracking_id: &str,
        status: DeliveryStatus,
        at: bson::DateTime,
    ) -> Result<UpdateOutcome, Error> {
        self.parcels
            .update_one(
                bson::doc! { "parcelDetails.trackingId": tracking_id },
                bson::doc! {
                    "$set": {
                        "parcelDetails.delivery_status": status.as_str(),
                        "updated_at": at,
                    }
                },
                None,
            )
            .await
            .map(Into::into)
            .map_err(Into::into)
    }

    async fn parcels_for_rider(&self, email: &str) -> Result<Vec<ParcelModel>, Error> {
        self.parcels
            .find_all(
                bson::doc! { "assigned_rider.email": email },
                newest_first("parcelDetails.createdAt"),
            )
            .await
    }

    #[tracing::instrument(skip(self, snapshot))]
    async fn assign_rider(
        &self,
        parcel_id: ObjectId,
        rider_id: ObjectId,
        snapshot: &AssignedRider,
    ) -> Result<UpdateOutcome, Error> {
        let mut session = self.client.start_session(None).await?;
        session.start_transaction(transaction_options()).await?;

        let rider = self
            .riders
            .find_one_by_id_with_session(rider_id, &mut session)
            .await?
            .ok_or(Error::NotFound("rider"))?;
        check_assignable(&rider)?;

        let result = self
            .parcels
            .update_one_with_session(
                bson::doc! { "_id": parcel_id },
                bson::doc! {
                    "$set": {
                        "assigned_rider": bson::to_bson(snapshot)?,
                        "parcelDetails.delivery_status": DeliveryStatus::RiderAssigned.as_str(),
                        "updated_at": snapshot.assigned_at,
                    }
                },
                None,
                &mut session,
            )
            .await?;

        if result.matched_count == 0 {
            session.abort_transaction().await?;
            return Err(Error::NotFound("parcel"));
        }

        // the position check keeps a concurrent assignment from overfilling
        let capacity_slot = format!("assignedParcels.{}", RIDER_CAPACITY - 1);
        let pushed = self
            .riders
            .update_one_with_session(
                bson::doc! {
                    "_id": rider_id,
                    "status": RiderStatus::Approved.as_str(),
                    capacity_slot: { "$exists": false },
                },
                bson::doc! { "$push": { "assignedParcels": parcel_id } },
                None,
                &mut session,
            )
            .await?;

        if pushed.matched_count == 0 {
            session.abort_transaction().await?;
            return Err(Error::CustomStr(
                StatusCode::CONFLICT,
                "rider has no remaining capacity",
            ));
        }

        session.commit_transaction().await?;

        Ok(result.into())
    }
}

#[axum::async_trait]
impl PaymentStore for MongoStore {
    async fn list_payments(&self, email: Option<&str>) -> Result<Vec<PaymentModel>, Error> {
        let filter = match email {
            Some(email) => bson::doc! { "email": email },
            None => bson::doc! {},
        };

        self.payments.find_all(filter, newest_first("paid_at")).await
    }

    #[tracing::instrument(skip_all, fields(parcel = %payment.parcel_id))]
    async fn record_payment(&self, payment: &PaymentModel) -> Result<InsertOutcome, Error> {
        let mut session = self.client.start_session(None).await?;
        session.start_transaction(transaction_options()).await?;

        let marked = self
            .parcels
            .update_one_with_session(
                bson::doc! { "_id": payment.parcel_id },
                bson::doc! {
                    "$set": { "parcelDetails.payment_status": PaymentStatus::Paid.as_str() }
                },
                None,
                &mut session,
            )
            .await?;

        if marked.matched_count == 0 {
            session.abort_transaction().await?;
            return Err(Error::NotFound("parcel"));
        }

        let result = self
            .payments
            .insert_one_with_session(payment, None, &mut session)
            .await?;

        session.commit_transaction().await?;

        Ok(inserted(result, payment.id))
    }
}

#[axum::async_trait]
impl RiderStore for MongoStore {
    async fn insert_rider(&self, rider: &RiderModel) -> Result<InsertOutcome, Error> {
        let result = self
            .riders
            .insert_one(rider, None)
            .await
            .map_err(unique_email)?;

        Ok(inserted(result, rider.id))
    }

    async fn riders_by_status(&self, status: RiderStatus) -> Result<Vec<RiderModel>, Error> {
        self.riders
            .find_all(bson::doc! { "status": status.as_str() }, None)
            .await
    }

    async fn available_riders(&self, district: Option<&str>) -> Result<Vec<RiderModel>, Error> {
        let mut filter = bson::doc! {
            "status": RiderStatus::Approved.as_str(),
            "$or": [
                { "assignedParcels": { "$exists": false } },
                { "assignedParcels": { "$size": 0 } },
                { "assignedParcels": { "$not": { "$size": RIDER_CAPACITY as i32 } } },
            ],
        };

        if let Some(district) = district {
            filter.insert("district", district);
        }

        self.riders.find_all(filter, None).await
    }

    #[tracing::instrument(skip(self))]
    async fn set_rider_status(
        &self,
        rider_id: ObjectId,
        status: RiderStatus,
        rider_email: &str,
        at: bson::DateTime,
    ) -> Result<RiderStatusOutcome, Error> {
        let mut session = self.client.start_session(None).await?;
        session.start_transaction(transaction_options()).await?;

        let rider = self
            .riders
            .update_one_with_session(
                bson::doc! { "_id": rider_id },
                bson::doc! {
                    "$set": {
                        "status": status.as_str(),
                        "updated_at": at,
                    }
                },
                None,
                &mut session,
            )
            .await?;

        if rider.matched_count == 0 {
            session.abort_transaction().await?;
            return Err(Error::NotFound("rider"));
        }

        let user = if status == RiderStatus::Approved {
            let promoted = self
                .users
                .update_one_with_session(
                    bson::doc! { "email": rider_email },
                    bson::doc! {
                        "$set": {
                            "role": UserRole::Rider.as_str(),
                            "role_updated_at": at,
                        }
                    },
                    None,
                    &mut session,
                )
                .await?;
            Some(promoted.into())
        } else {
            None
        };

        session.commit_transaction().await?;

        Ok(RiderStatusOutcome {
            rider: rider.into(),
            user,
        })
    }
}
