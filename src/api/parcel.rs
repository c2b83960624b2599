use axum::{
    extract::{Path, Query, State},
    Json,
};
use bson::oid::ObjectId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use validator::{Validate, ValidationError};

use crate::{
    error::Error,
    store::{Db, DeleteOutcome, InsertOutcome, ParcelFilter, ParcelStore, UpdateOutcome},
    util::{now, parse_object_id, DecimalString, FormattedDateTime, ObjectIdString, PathObjectId},
};

use super::auth::VerifiedIdentity;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ParcelModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    #[serde(rename = "senderDetails")]
    pub sender_details: SenderDetails,
    #[serde(rename = "receiverDetails")]
    pub receiver_details: ReceiverDetails,
    #[serde(rename = "parcelDetails")]
    pub parcel_details: ParcelDetails,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_rider: Option<AssignedRider>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<bson::DateTime>,
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SenderDetails {
    #[validate(length(min = 1, max = 124))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    pub phone: Option<String>,
    pub region: Option<String>,
    pub district: Option<String>,
    pub address: Option<String>,
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ReceiverDetails {
    #[validate(length(min = 1, max = 124))]
    pub name: String,
    pub phone: Option<String>,
    pub region: Option<String>,
    pub district: Option<String>,
    pub address: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ParcelDetails {
    #[serde(rename = "trackingId")]
    pub tracking_id: String,
    #[serde(rename = "type")]
    pub parcel_type: ParcelType,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    pub cost: Decimal,

    #[serde(rename = "createdAt")]
    pub created_at: bson::DateTime,
    pub delivery_status: DeliveryStatus,
    pub payment_status: PaymentStatus,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParcelType {
    #[serde(rename = "document")]
    Document,
    #[serde(rename = "non-document")]
    NonDocument,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    NotCollected,
    RiderAssigned,
    InTransit,
    Delivered,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotCollected => "not_collected",
            Self::RiderAssigned => "rider_assigned",
            Self::InTransit => "in_transit",
            Self::Delivered => "delivered",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unpaid => "unpaid",
            Self::Paid => "paid",
        }
    }
}

/// Rider snapshot copied onto the parcel at assignment time.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AssignedRider {
    #[serde(rename = "riderId")]
    pub rider_id: ObjectId,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub assigned_at: bson::DateTime,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Parcel {
    pub id: ObjectIdString,
    #[serde(rename = "senderDetails")]
    pub sender_details: SenderDetails,
    #[serde(rename = "receiverDetails")]
    pub receiver_details: ReceiverDetails,
    #[serde(rename = "parcelDetails")]
    pub parcel_details: ParcelInfo,
    pub assigned_rider: Option<AssignedRiderInfo>,
    pub updated_at: Option<FormattedDateTime>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ParcelInfo {
    #[serde(rename = "trackingId")]
    pub tracking_id: String,
    #[serde(rename = "type")]
    pub parcel_type: ParcelType,
    pub title: String,
    pub weight: Option<f64>,
    pub cost: Decimal,
    #[serde(rename = "createdAt")]
    pub created_at: FormattedDateTime,
    pub delivery_status: DeliveryStatus,
    pub payment_status: PaymentStatus,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AssignedRiderInfo {
    #[serde(rename = "riderId")]
    pub rider_id: ObjectIdString,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub assigned_at: FormattedDateTime,
}

impl From<ParcelModel> for Parcel {
    fn from(value: ParcelModel) -> Self {
        let details = value.parcel_details;

        Self {
            id: value.id.into(),
            sender_details: value.sender_details,
            receiver_details: value.receiver_details,
            parcel_details: ParcelInfo {
                tracking_id: details.tracking_id,
                parcel_type: details.parcel_type,
                title: details.title,
                weight: details.weight,
                cost: details.cost,
                created_at: details.created_at.into(),
                delivery_status: details.delivery_status,
                payment_status: details.payment_status,
            },
            assigned_rider: value.assigned_rider.map(|rider| AssignedRiderInfo {
                rider_id: rider.rider_id.into(),
                name: rider.name,
                email: rider.email,
                phone: rider.phone,
                assigned_at: rider.assigned_at.into(),
            }),
            updated_at: value.updated_at.map(Into::into),
        }
    }
}

fn into_parcels(models: Vec<ParcelModel>) -> Vec<Parcel> {
    models.into_iter().map(Into::into).collect()
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ParcelQuery {
    pub email: Option<String>,
    pub delivery_status: Option<DeliveryStatus>,
    pub payment_status: Option<PaymentStatus>,
}

impl ParcelQuery {
    pub fn filter(self) -> Result<ParcelFilter, Error> {
        if let Some(email) = self.email.filter(|it| !it.is_empty()) {
            return Ok(ParcelFilter::Sender(email));
        }

        match (self.delivery_status, self.payment_status) {
            (Some(delivery), Some(payment)) => Ok(ParcelFilter::Status { delivery, payment }),
            (None, None) => Ok(ParcelFilter::All),
            _ => Err(Error::InvalidQuery(
                "delivery_status and payment_status must be given together",
            )),
        }
    }
}

pub async fn index(
    _identity: VerifiedIdentity,
    State(db): State<Db>,
    Query(query): Query<ParcelQuery>,
) -> Result<Json<Vec<Parcel>>, Error> {
    let filter = query.filter()?;

    let parcels = db.list_parcels(&filter).await?;

    Ok(Json(into_parcels(parcels)))
}

pub async fn show(
    State(db): State<Db>,
    PathObjectId(parcel_id): PathObjectId,
) -> Result<Json<Parcel>, Error> {
    let parcel = db
        .find_parcel(parcel_id)
        .await?
        .ok_or(Error::NotFound("parcel"))
        .tap_err(|_| tracing::debug!("tried accessing non existing parcel"))?;

    Ok(Json(parcel.into()))
}

fn non_negative(value: &DecimalString) -> Result<(), ValidationError> {
    if value.0.is_sign_negative() {
        return Err(ValidationError::new("non_negative"));
    }
    Ok(())
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct NewParcelDetails {
    #[serde(rename = "trackingId")]
    #[validate(length(min = 1, max = 64))]
    pub tracking_id: String,
    #[serde(rename = "type")]
    pub parcel_type: ParcelType,
    #[validate(length(min = 1, max = 256))]
    pub title: String,
    #[validate(range(min = 0.0))]
    pub weight: Option<f64>,
    #[validate(custom = "non_negative")]
    pub cost: DecimalString,
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct CreateRequest {
    #[serde(rename = "senderDetails")]
    #[validate]
    pub sender_details: SenderDetails,
    #[serde(rename = "receiverDetails")]
    #[validate]
    pub receiver_details: ReceiverDetails,
    #[serde(rename = "parcelDetails")]
    #[validate]
    pub parcel_details: NewParcelDetails,
}

#[tracing::instrument(
    skip_all,
    fields(
        tracking_id = %request.parcel_details.tracking_id,
    )
)]
pub async fn create(
    State(db): State<Db>,
    Json(request): Json<CreateRequest>,
) -> Result<Json<InsertOutcome>, Error> {
    request.validate()?;

    let details = request.parcel_details;
    let model = ParcelModel {
        id: ObjectId::new(),
        sender_details: request.sender_details,
        receiver_details: request.receiver_details,
        parcel_details: ParcelDetails {
            tracking_id: details.tracking_id,
            parcel_type: details.parcel_type,
            title: details.title,
            weight: details.weight,
            cost: details.cost.into(),
            created_at: now(),
            delivery_status: DeliveryStatus::NotCollected,
            payment_status: PaymentStatus::Unpaid,
        },
        assigned_rider: None,
        updated_at: None,
    };

    tracing::debug!(tracking_id = %model.parcel_details.tracking_id, "creating parcel");
    let outcome = db.insert_parcel(&model).await?;

    Ok(Json(outcome))
}

#[tracing::instrument(
    skip_all,
    fields(
        id = %parcel_id,
    )
)]
pub async fn delete(
    State(db): State<Db>,
    PathObjectId(parcel_id): PathObjectId,
) -> Result<Json<DeleteOutcome>, Error> {
    let outcome = db.delete_parcel(parcel_id).await?;

    Ok(Json(outcome))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UpdateStatusRequest {
    pub delivery_status: DeliveryStatus,
}

#[tracing::instrument(
    skip_all,
    fields(
        tracking_id = %tracking_id,
        status = request.delivery_status.as_str(),
    )
)]
pub async fn update_status(
    State(db): State<Db>,
    Path(tracking_id): Path<String>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<UpdateOutcome>, Error> {
    let outcome = db
        .set_delivery_status(&tracking_id, request.delivery_status, now())
        .await?;

    Ok(Json(outcome))
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AssignRiderRequest {
    pub rider_id: String,
    #[validate(length(min = 1, max = 124))]
    pub rider_name: String,
    #[validate(email)]
    pub rider_email: String,
    pub rider_phone: Option<String>,
}

#[tracing::instrument(
    skip_all,
    fields(
        parcel = %parcel_id,
        rider = %request.rider_id,
    )
)]
pub async fn assign_rider(
    State(db): State<Db>,
    PathObjectId(parcel_id): PathObjectId,
    Json(request): Json<AssignRiderRequest>,
) -> Result<Json<UpdateOutcome>, Error> {
    request.validate()?;
    let rider_id = parse_object_id(&request.rider_id)?;

    let snapshot = AssignedRider {
        rider_id,
        name: request.rider_name,
        email: request.rider_email,
        phone: request.rider_phone,
        assigned_at: now(),
    };

    let outcome = db.assign_rider(parcel_id, snapshot.rider_id, &snapshot).await?;

    tracing::info!("rider assigned");

    Ok(Json(outcome))
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RiderParcelQuery {
    pub email: Option<String>,
}

pub async fn assigned_to_rider(
    State(db): State<Db>,
    Query(query): Query<RiderParcelQuery>,
) -> Result<Json<Vec<Parcel>>, Error> {
    let email = query
        .email
        .filter(|it| !it.is_empty())
        .ok_or(Error::InvalidQuery("missing email query"))?;

    let parcels = db.parcels_for_rider(&email).await?;

    Ok(Json(into_parcels(parcels)))
}
