use axum::extract::FromRef;

use crate::{
    api::{
        auth::{Auth, IdentityProvider},
        payment::{PaymentProcessor, Payments},
    },
    store::{Db, Store},
};

#[derive(FromRef, Clone)]
pub struct AppState {
    pub db: Db,
    pub auth: Auth,
    pub payments: Payments,
}

impl AppState {
    pub fn new(
        store: impl Store + 'static,
        identity: impl IdentityProvider + 'static,
        processor: impl PaymentProcessor + 'static,
    ) -> Self {
        Self {
            db: Db::new(store),
            auth: Auth::new(identity),
            payments: Payments::new(processor),
        }
    }
}
