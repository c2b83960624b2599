use mongodb::{options::IndexOptions, IndexModel};

use crate::{error::Error, store::mongo::MongoStore};

fn index(keys: bson::Document, unique: bool) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(IndexOptions::builder().unique(unique).build())
        .build()
}

impl MongoStore {
    /// Creates the indexes the queries and uniqueness rules rely on.
    /// Safe to run on every start.
    pub async fn ensure_indexes(&self) -> Result<(), Error> {
        tracing::debug!("ensuring indexes");

        self.users
            .create_index(index(bson::doc! { "email": 1 }, true), None)
            .await?;

        self.riders
            .create_index(index(bson::doc! { "email": 1 }, true), None)
            .await?;
        self.riders
            .create_index(index(bson::doc! { "status": 1, "district": 1 }, false), None)
            .await?;

        self.parcels
            .create_indexes(
                [
                    index(bson::doc! { "parcelDetails.trackingId": 1 }, false),
                    index(
                        bson::doc! { "senderDetails.email": 1, "parcelDetails.createdAt": -1 },
                        false,
                    ),
                    index(bson::doc! { "assigned_rider.email": 1 }, false),
                ],
                None,
            )
            .await?;

        self.payments
            .create_index(index(bson::doc! { "email": 1, "paid_at": -1 }, false), None)
            .await?;

        Ok(())
    }
}
