use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use bson::oid::ObjectId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::{
    error::Error,
    store::{Db, InsertOutcome, PaymentStore},
    util::{now, parse_object_id, DecimalString, FormattedDateTime, ObjectIdString},
};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PaymentModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub email: String,
    #[serde(rename = "parcelId")]
    pub parcel_id: ObjectId,
    pub amount: Decimal,
    #[serde(
        rename = "paymentMethod",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub payment_method: Option<String>,
    #[serde(
        rename = "transactionId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub transaction_id: Option<String>,

    pub paid_at: bson::DateTime,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: ObjectIdString,
    pub email: String,
    pub parcel_id: ObjectIdString,
    pub amount: Decimal,
    pub payment_method: Option<String>,
    pub transaction_id: Option<String>,
    #[serde(rename = "paid_at")]
    pub paid_at: FormattedDateTime,
}

impl From<PaymentModel> for Payment {
    fn from(value: PaymentModel) -> Self {
        Self {
            id: value.id.into(),
            email: value.email,
            parcel_id: value.parcel_id.into(),
            amount: value.amount,
            payment_method: value.payment_method,
            transaction_id: value.transaction_id,
            paid_at: value.paid_at.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct PaymentQuery {
    pub email: Option<String>,
}

pub async fn index(
    State(db): State<Db>,
    Query(query): Query<PaymentQuery>,
) -> Result<Json<Vec<Payment>>, Error> {
    let email = query.email.filter(|it| !it.is_empty());

    let payments = db.list_payments(email.as_deref()).await?;

    Ok(Json(payments.into_iter().map(Into::into).collect()))
}

fn positive(value: &DecimalString) -> Result<(), ValidationError> {
    if value.0 <= Decimal::ZERO {
        return Err(ValidationError::new("positive"));
    }
    Ok(())
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    pub parcel_id: String,
    #[validate(email)]
    pub email: String,
    #[validate(custom = "positive")]
    pub amount: DecimalString,
    pub payment_method: Option<String>,
    pub transaction_id: Option<String>,
}

#[tracing::instrument(
    skip_all,
    fields(
        parcel = %request.parcel_id,
        email = %request.email,
    )
)]
pub async fn create(
    State(db): State<Db>,
    Json(request): Json<CreateRequest>,
) -> Result<Json<InsertOutcome>, Error> {
    request.validate()?;
    let parcel_id = parse_object_id(&request.parcel_id)?;

    let model = PaymentModel {
        id: ObjectId::new(),
        email: request.email,
        parcel_id,
        amount: request.amount.into(),
        payment_method: request.payment_method,
        transaction_id: request.transaction_id,
        paid_at: now(),
    };

    let outcome = db.record_payment(&model).await?;

    tracing::info!("payment recorded");

    Ok(Json(outcome))
}

/// Currency and method sent with every payment intent.
pub const INTENT_CURRENCY: &str = "usd";
pub const INTENT_PAYMENT_METHOD: &str = "card";

/// Creates payment intents with an external processor.
#[axum::async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Returns the intent's client secret. The error carries the processor's
    /// own message.
    async fn create_intent(&self, amount_in_cents: i64) -> Result<String, String>;
}

#[derive(Clone)]
pub struct Payments(pub Arc<dyn PaymentProcessor>);

impl Payments {
    pub fn new(processor: impl PaymentProcessor + 'static) -> Self {
        Self(Arc::new(processor))
    }
}

impl std::ops::Deref for Payments {
    type Target = dyn PaymentProcessor;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct IntentRequest {
    #[validate(range(min = 1))]
    pub amount_in_cents: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IntentResponse {
    pub client_secret: String,
}

#[tracing::instrument(
    skip_all,
    fields(
        amount = request.amount_in_cents,
    )
)]
pub async fn create_intent(
    State(payments): State<Payments>,
    Json(request): Json<IntentRequest>,
) -> Result<Json<IntentResponse>, Error> {
    request.validate()?;

    let client_secret = payments
        .create_intent(request.amount_in_cents)
        .await
        .map_err(Error::PaymentProcessor)?;

    Ok(Json(IntentResponse { client_secret }))
}
