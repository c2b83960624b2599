//! Document store behind the handlers.
//!
//! Handlers only see the [`Store`] trait object held by [`Db`]; production
//! wires a [`LazyMongoStore`](lazy::LazyMongoStore), tests and local runs use
//! [`MemoryStore`](memory::MemoryStore).

pub mod lazy;
pub mod memory;
pub mod mongo;

use std::sync::Arc;

use axum::http::StatusCode;
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use crate::{
    api::{
        parcel::{AssignedRider, DeliveryStatus, ParcelModel, PaymentStatus},
        payment::PaymentModel,
        rider::{RiderModel, RiderStatus},
        user::{UserModel, UserRole},
    },
    error::Error,
    util::ObjectIdString,
};

/// Riders holding this many parcels cannot take another one.
pub const RIDER_CAPACITY: usize = 5;

/// How many users a search returns at most.
pub const USER_SEARCH_LIMIT: usize = 10;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InsertOutcome {
    pub inserted_id: ObjectIdString,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOutcome {
    pub matched_count: u64,
    pub modified_count: u64,
}

impl From<mongodb::results::UpdateResult> for UpdateOutcome {
    fn from(value: mongodb::results::UpdateResult) -> Self {
        Self {
            matched_count: value.matched_count,
            modified_count: value.modified_count,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
    pub deleted_count: u64,
}

/// Result of a rider status change: the rider write and, on approval, the
/// user promotion.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiderStatusOutcome {
    pub rider: UpdateOutcome,
    pub user: Option<UpdateOutcome>,
}

/// Parcel listing filter. Sender email wins over the status pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParcelFilter {
    All,
    Sender(String),
    Status {
        delivery: DeliveryStatus,
        payment: PaymentStatus,
    },
}

#[axum::async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserModel>, Error>;

    /// Fails with [`Error::MustUniqueError`] when the email is taken.
    async fn insert_user(&self, user: &UserModel) -> Result<InsertOutcome, Error>;

    async fn touch_last_log_in(
        &self,
        email: &str,
        at: bson::DateTime,
    ) -> Result<UpdateOutcome, Error>;

    /// Case-insensitive substring match on email, at most [`USER_SEARCH_LIMIT`].
    async fn search_users(&self, fragment: &str) -> Result<Vec<UserModel>, Error>;

    async fn set_user_role(
        &self,
        id: ObjectId,
        role: UserRole,
        at: bson::DateTime,
    ) -> Result<UpdateOutcome, Error>;
}

#[axum::async_trait]
pub trait ParcelStore: Send + Sync {
    /// Newest `parcelDetails.createdAt` first.
    async fn list_parcels(&self, filter: &ParcelFilter) -> Result<Vec<ParcelModel>, Error>;

    async fn find_parcel(&self, id: ObjectId) -> Result<Option<ParcelModel>, Error>;

    async fn insert_parcel(&self, parcel: &ParcelModel) -> Result<InsertOutcome, Error>;

    async fn delete_parcel(&self, id: ObjectId) -> Result<DeleteOutcome, Error>;

    async fn set_delivery_status(
        &self,
        tracking_id: &str,
        status: DeliveryStatus,
        at: bson::DateTime,
    ) -> Result<UpdateOutcome, Error>;

    /// Parcels whose rider snapshot carries this email, newest first.
    async fn parcels_for_rider(&self, email: &str) -> Result<Vec<ParcelModel>, Error>;

    /// Sets the parcel's rider snapshot and appends the parcel to the rider's
    /// `assignedParcels`, both or neither.
    async fn assign_rider(
        &self,
        parcel_id: ObjectId,
        rider_id: ObjectId,
        snapshot: &AssignedRider,
    ) -> Result<UpdateOutcome, Error>;
}

#[axum::async_trait]
pub trait PaymentStore: Send + Sync {
    /// Newest `paid_at` first.
    async fn list_payments(&self, email: Option<&str>) -> Result<Vec<PaymentModel>, Error>;

    /// Marks the referenced parcel paid and inserts the payment, both or
    /// neither.
    async fn record_payment(&self, payment: &PaymentModel) -> Result<InsertOutcome, Error>;
}

#[axum::async_trait]
pub trait RiderStore: Send + Sync {
    /// Fails with [`Error::MustUniqueError`] when the email already applied.
    async fn insert_rider(&self, rider: &RiderModel) -> Result<InsertOutcome, Error>;

    async fn riders_by_status(&self, status: RiderStatus) -> Result<Vec<RiderModel>, Error>;

    /// Approved riders whose `assignedParcels` is absent, empty, or not of
    /// size [`RIDER_CAPACITY`].
    async fn available_riders(&self, district: Option<&str>) -> Result<Vec<RiderModel>, Error>;

    /// Sets the rider status; on [`RiderStatus::Approved`] also promotes the
    /// user with `rider_email` to [`UserRole::Rider`], both or neither.
    async fn set_rider_status(
        &self,
        rider_id: ObjectId,
        status: RiderStatus,
        rider_email: &str,
        at: bson::DateTime,
    ) -> Result<RiderStatusOutcome, Error>;
}

pub trait Store: UserStore + ParcelStore + PaymentStore + RiderStore {}

impl<T> Store for T where T: UserStore + ParcelStore + PaymentStore + RiderStore {}

/// Shared handle injected into handlers through the router state.
#[derive(Clone)]
pub struct Db(pub Arc<dyn Store>);

impl Db {
    pub fn new(store: impl Store + 'static) -> Self {
        Self(Arc::new(store))
    }
}

impl std::ops::Deref for Db {
    type Target = dyn Store;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

/// Inherited availability rule, see `RiderStore::available_riders`.
pub fn has_open_slot(assigned_parcels: Option<&[ObjectId]>) -> bool {
    match assigned_parcels {
        None => true,
        Some(parcels) => parcels.is_empty() || parcels.len() != RIDER_CAPACITY,
    }
}

/// Only approved riders below [`RIDER_CAPACITY`] take parcels.
pub fn check_assignable(rider: &RiderModel) -> Result<(), Error> {
    if rider.status != RiderStatus::Approved {
        return Err(Error::CustomStr(
            StatusCode::CONFLICT,
            "rider is not approved",
        ));
    }

    let held = rider.assigned_parcels.as_ref().map(Vec::len).unwrap_or(0);
    if held >= RIDER_CAPACITY {
        return Err(Error::CustomStr(
            StatusCode::CONFLICT,
            "rider has no remaining capacity",
        ));
    }

    Ok(())
}
