use axum::{
    extract::{Query, State},
    Json,
};
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    error::Error,
    store::{Db, InsertOutcome, RiderStatusOutcome, RiderStore},
    util::{now, FormattedDateTime, ObjectIdString, PathObjectId},
};

use super::auth::Admin;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RiderModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub name: String,
    pub email: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    pub region: String,
    pub district: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bike_brand: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bike_registration: Option<String>,

    pub status: RiderStatus,
    #[serde(
        rename = "assignedParcels",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub assigned_parcels: Option<Vec<ObjectId>>,

    pub created_at: bson::DateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<bson::DateTime>,
}

/// Stored casing follows the existing documents: `pending` is lowercase, the
/// admin decisions are capitalised.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiderStatus {
    #[serde(rename = "pending")]
    Pending,
    Approved,
    Rejected,
    Deactivated,
}

impl RiderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
            Self::Deactivated => "Deactivated",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Rider {
    pub id: ObjectIdString,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub age: Option<u32>,
    pub region: String,
    pub district: String,
    pub nid: Option<String>,
    pub bike_brand: Option<String>,
    pub bike_registration: Option<String>,
    pub status: RiderStatus,
    #[serde(rename = "assignedParcels")]
    pub assigned_parcels: Vec<ObjectIdString>,
    pub created_at: FormattedDateTime,
    pub updated_at: Option<FormattedDateTime>,
}

impl From<RiderModel> for Rider {
    fn from(value: RiderModel) -> Self {
        Self {
            id: value.id.into(),
            name: value.name,
            email: value.email,
            phone: value.phone,
            age: value.age,
            region: value.region,
            district: value.district,
            nid: value.nid,
            bike_brand: value.bike_brand,
            bike_registration: value.bike_registration,
            status: value.status,
            assigned_parcels: value
                .assigned_parcels
                .unwrap_or_default()
                .into_iter()
                .map(Into::into)
                .collect(),
            created_at: value.created_at.into(),
            updated_at: value.updated_at.map(Into::into),
        }
    }
}

fn into_riders(models: Vec<RiderModel>) -> Vec<Rider> {
    models.into_iter().map(Into::into).collect()
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct ApplicationRequest {
    #[validate(length(min = 1, max = 124))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 6, max = 20))]
    pub phone: String,
    #[validate(range(min = 18, max = 80))]
    pub age: Option<u32>,
    #[validate(length(min = 1))]
    pub region: String,
    #[validate(length(min = 1))]
    pub district: String,
    pub nid: Option<String>,
    pub bike_brand: Option<String>,
    pub bike_registration: Option<String>,
}

#[tracing::instrument(
    skip_all,
    fields(
        email = %request.email,
    )
)]
pub async fn apply(
    State(db): State<Db>,
    Json(request): Json<ApplicationRequest>,
) -> Result<Json<InsertOutcome>, Error> {
    request.validate()?;

    let model = RiderModel {
        id: ObjectId::new(),
        name: request.name,
        email: request.email,
        phone: request.phone,
        age: request.age,
        region: request.region,
        district: request.district,
        nid: request.nid,
        bike_brand: request.bike_brand,
        bike_registration: request.bike_registration,
        status: RiderStatus::Pending,
        assigned_parcels: Some(vec![]),
        created_at: now(),
        updated_at: None,
    };

    let outcome = db.insert_rider(&model).await?;

    Ok(Json(outcome))
}

pub async fn pending(Admin(_): Admin, State(db): State<Db>) -> Result<Json<Vec<Rider>>, Error> {
    let riders = db.riders_by_status(RiderStatus::Pending).await?;

    Ok(Json(into_riders(riders)))
}

pub async fn active(Admin(_): Admin, State(db): State<Db>) -> Result<Json<Vec<Rider>>, Error> {
    let riders = db.riders_by_status(RiderStatus::Approved).await?;

    Ok(Json(into_riders(riders)))
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct AvailableQuery {
    pub district: Option<String>,
}

pub async fn available(
    State(db): State<Db>,
    Query(query): Query<AvailableQuery>,
) -> Result<Json<Vec<Rider>>, Error> {
    let district = query.district.filter(|it| !it.is_empty());

    let riders = db.available_riders(district.as_deref()).await?;

    Ok(Json(into_riders(riders)))
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    #[validate(email)]
    pub rider_email: String,
    pub status: RiderStatus,
}

#[tracing::instrument(
    skip_all,
    fields(
        admin = %admin.email,
        rider = %rider_id,
        status = request.status.as_str(),
    )
)]
pub async fn update_status(
    Admin(admin): Admin,
    State(db): State<Db>,
    PathObjectId(rider_id): PathObjectId,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<RiderStatusOutcome>, Error> {
    request.validate()?;

    let outcome = db
        .set_rider_status(rider_id, request.status, &request.rider_email, now())
        .await?;

    if outcome.user.is_some() {
        tracing::info!(email = %request.rider_email, "user promoted to rider");
    }

    Ok(Json(outcome))
}
