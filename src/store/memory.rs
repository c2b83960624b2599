use std::sync::RwLock;

use bson::oid::ObjectId;

use crate::{
    api::{
        parcel::{AssignedRider, DeliveryStatus, ParcelModel, PaymentStatus},
        payment::PaymentModel,
        rider::{RiderModel, RiderStatus},
        user::{UserModel, UserRole},
    },
    error::Error,
};

use super::{
    check_assignable, has_open_slot, DeleteOutcome, InsertOutcome, ParcelFilter, ParcelStore,
    PaymentStore, RiderStatusOutcome, RiderStore, UpdateOutcome, UserStore, USER_SEARCH_LIMIT,
};

#[derive(Debug, Default)]
struct Collections {
    users: Vec<UserModel>,
    parcels: Vec<ParcelModel>,
    payments: Vec<PaymentModel>,
    riders: Vec<RiderModel>,
}

/// In-process store.
///
/// Intended for tests and local runs. Every multi-document write happens
/// under one write lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Collections>, Error> {
        self.inner
            .read()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned").into())
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Collections>, Error> {
        self.inner
            .write()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned").into())
    }
}

fn updated(matched: bool, modified: bool) -> UpdateOutcome {
    UpdateOutcome {
        matched_count: u64::from(matched),
        modified_count: u64::from(matched && modified),
    }
}

fn newest_parcels_first(parcels: &mut [ParcelModel]) {
    parcels.sort_by(|a, b| b.parcel_details.created_at.cmp(&a.parcel_details.created_at));
}

#[axum::async_trait]
impl UserStore for MemoryStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserModel>, Error> {
        Ok(self.read()?.users.iter().find(|it| it.email == email).cloned())
    }

    async fn insert_user(&self, user: &UserModel) -> Result<InsertOutcome, Error> {
        let mut collections = self.write()?;

        if collections.users.iter().any(|it| it.email == user.email) {
            return Err(Error::MustUniqueError("email".to_string()));
        }
        collections.users.push(user.clone());

        Ok(InsertOutcome {
            inserted_id: user.id.into(),
        })
    }

    async fn touch_last_log_in(
        &self,
        email: &str,
        at: bson::DateTime,
    ) -> Result<UpdateOutcome, Error> {
        let mut collections = self.write()?;

        Ok(match collections.users.iter_mut().find(|it| it.email == email) {
            Some(user) => {
                let modified = user.last_log_in != at;
                user.last_log_in = at;
                updated(true, modified)
            }
            None => updated(false, false),
        })
    }

    async fn search_users(&self, fragment: &str) -> Result<Vec<UserModel>, Error> {
        let fragment = fragment.to_lowercase();

        Ok(self
            .read()?
            .users
            .iter()
            .filter(|it| it.email.to_lowercase().contains(&fragment))
            .take(USER_SEARCH_LIMIT)
            .cloned()
            .collect())
    }

    async fn set_user_role(
        &self,
        id: ObjectId,
        role: UserRole,
        at: bson::DateTime,
    ) -> Result<UpdateOutcome, Error> {
        let mut collections = self.write()?;

        Ok(match collections.users.iter_mut().find(|it| it.id == id) {
            Some(user) => {
                user.role = role;
                user.role_updated_at = Some(at);
                updated(true, true)
            }
            None => updated(false, false),
        })
    }
}

#[axum::async_trait]
impl ParcelStore for MemoryStore {
    async fn list_parcels(&self, filter: &ParcelFilter) -> Result<Vec<ParcelModel>, Error> {
        let mut parcels = self
            .read()?
            .parcels
            .iter()
            .filter(|it| match filter {
                ParcelFilter::All => true,
                ParcelFilter::Sender(email) => &it.sender_details.email == email,
                ParcelFilter::Status { delivery, payment } => {
                    it.parcel_details.delivery_status == *delivery
                        && it.parcel_details.payment_status == *payment
                }
            })
            .cloned()
            .collect::<Vec<_>>();

        newest_parcels_first(&mut parcels);

        Ok(parcels)
    }

    async fn find_parcel(&self, id: ObjectId) -> Result<Option<ParcelModel>, Error> {
        Ok(self.read()?.parcels.iter().find(|it| it.id == id).cloned())
    }

    async fn insert_parcel(&self, parcel: &ParcelModel) -> Result<InsertOutcome, Error> {
        self.write()?.parcels.push(parcel.clone());

        Ok(InsertOutcome {
            inserted_id: parcel.id.into(),
        })
    }

    async fn delete_parcel(&self, id: ObjectId) -> Result<DeleteOutcome, Error> {
        let mut collections = self.write()?;
        let before = collections.parcels.len();
        collections.parcels.retain(|it| it.id != id);

        Ok(DeleteOutcome {
            deleted_count: (before - collections.parcels.len()) as u64,
        })
    }

    async fn set_delivery_status(
        &self,
        tracking_id: &str,
        status: DeliveryStatus,
        at: bson::DateTime,
    ) -> Result<UpdateOutcome, Error> {
        let mut collections = self.write()?;

        Ok(
            match collections
                .parcels
                .iter_mut()
                .find(|it| it.parcel_details.tracking_id == tracking_id)
            {
                Some(parcel) => {
                    parcel.parcel_details.delivery_status = status;
                    parcel.updated_at = Some(at);
                    updated(true, true)
                }
                None => updated(false, false),
            },
        )
    }

    async fn parcels_for_rider(&self, email: &str) -> Result<Vec<ParcelModel>, Error> {
        let mut parcels = self
            .read()?
            .parcels
            .iter()
            .filter(|it| {
                it.assigned_rider
                    .as_ref()
                    .map(|rider| rider.email == email)
                    .unwrap_or(false)
            })
            .cloned()
            .collect::<Vec<_>>();

        newest_parcels_first(&mut parcels);

        Ok(parcels)
    }

    async fn assign_rider(
        &self,
        parcel_id: ObjectId,
        rider_id: ObjectId,
        snapshot: &AssignedRider,
    ) -> Result<UpdateOutcome, Error> {
        let mut guard = self.write()?;
        let collections = &mut *guard;

        let rider = collections
            .riders
            .iter_mut()
            .find(|it| it.id == rider_id)
            .ok_or(Error::NotFound("rider"))?;
        check_assignable(rider)?;

        let parcel = collections
            .parcels
            .iter_mut()
            .find(|it| it.id == parcel_id)
            .ok_or(Error::NotFound("parcel"))?;

        parcel.assigned_rider = Some(snapshot.clone());
        parcel.parcel_details.delivery_status = DeliveryStatus::RiderAssigned;
        parcel.updated_at = Some(snapshot.assigned_at);
        rider
            .assigned_parcels
            .get_or_insert_with(Vec::new)
            .push(parcel_id);

        Ok(updated(true, true))
    }
}

#[axum::async_trait]
impl PaymentStore for MemoryStore {
    async fn list_payments(&self, email: Option<&str>) -> Result<Vec<PaymentModel>, Error> {
        let mut payments = self
            .read()?
            .payments
            .iter()
            .filter(|it| email.map(|email| it.email == email).unwrap_or(true))
            .cloned()
            .collect::<Vec<_>>();

        payments.sort_by(|a, b| b.paid_at.cmp(&a.paid_at));

        Ok(payments)
    }

    async fn record_payment(&self, payment: &PaymentModel) -> Result<InsertOutcome, Error> {
        let mut guard = self.write()?;
        let collections = &mut *guard;

        let parcel = collections
            .parcels
            .iter_mut()
            .find(|it| it.id == payment.parcel_id)
            .ok_or(Error::NotFound("parcel"))?;

        let previous = parcel.parcel_details.payment_status;
        parcel.parcel_details.payment_status = PaymentStatus::Paid;

        if collections.payments.iter().any(|it| it.id == payment.id) {
            parcel.parcel_details.payment_status = previous;
            return Err(anyhow::anyhow!("duplicate payment id {}", payment.id).into());
        }
        collections.payments.push(payment.clone());

        Ok(InsertOutcome {
            inserted_id: payment.id.into(),
        })
    }
}

#[axum::async_trait]
impl RiderStore for MemoryStore {
    async fn insert_rider(&self, rider: &RiderModel) -> Result<InsertOutcome, Error> {
        let mut collections = self.write()?;

        if collections.riders.iter().any(|it| it.email == rider.email) {
            return Err(Error::MustUniqueError("email".to_string()));
        }
        collections.riders.push(rider.clone());

        Ok(InsertOutcome {
            inserted_id: rider.id.into(),
        })
    }

    async fn riders_by_status(&self, status: RiderStatus) -> Result<Vec<RiderModel>, Error> {
        Ok(self
            .read()?
            .riders
            .iter()
            .filter(|it| it.status == status)
            .cloned()
            .collect())
    }

    async fn available_riders(&self, district: Option<&str>) -> Result<Vec<RiderModel>, Error> {
        Ok(self
            .read()?
            .riders
            .iter()
            .filter(|it| it.status == RiderStatus::Approved)
            .filter(|it| has_open_slot(it.assigned_parcels.as_deref()))
            .filter(|it| district.map(|d| it.district == d).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn set_rider_status(
        &self,
        rider_id: ObjectId,
        status: RiderStatus,
        rider_email: &str,
        at: bson::DateTime,
    ) -> Result<RiderStatusOutcome, Error> {
        let mut guard = self.write()?;
        let collections = &mut *guard;

        let rider = collections
            .riders
            .iter_mut()
            .find(|it| it.id == rider_id)
            .ok_or(Error::NotFound("rider"))?;

        rider.status = status;
        rider.updated_at = Some(at);
        let rider = updated(true, true);

        let user = if status == RiderStatus::Approved {
            Some(
                match collections.users.iter_mut().find(|it| it.email == rider_email) {
                    Some(user) => {
                        user.role = UserRole::Rider;
                        user.role_updated_at = Some(at);
                        updated(true, true)
                    }
                    None => updated(false, false),
                },
            )
        } else {
            None
        };

        Ok(RiderStatusOutcome { rider, user })
    }
}

#[cfg(test)]
mod tests {
    use bson::oid::ObjectId;

    use crate::{
        api::user::{UserModel, UserRole},
        error::Error,
        store::UserStore,
        util::now,
    };

    use super::MemoryStore;

    fn user(email: &str) -> UserModel {
        UserModel {
            id: ObjectId::new(),
            email: email.to_string(),
            name: None,
            photo: None,
            role: UserRole::Customer,
            created_at: now(),
            last_log_in: now(),
            role_updated_at: None,
        }
    }

    #[tokio::test]
    async fn test_user_email_is_unique() {
        let store = MemoryStore::new();

        store.insert_user(&user("a@x.com")).await.unwrap();
        let err = store.insert_user(&user("a@x.com")).await.unwrap_err();

        assert!(matches!(err, Error::MustUniqueError(_)));
    }

    #[tokio::test]
    async fn test_search_limit() {
        let store = MemoryStore::new();
        for i in 0..15 {
            store
                .insert_user(&user(&format!("user{}@x.com", i)))
                .await
                .unwrap();
        }

        assert_eq!(store.search_users("@x.com").await.unwrap().len(), 10);
    }
}
