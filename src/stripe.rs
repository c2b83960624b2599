use serde::Deserialize;

use crate::api::payment::{PaymentProcessor, INTENT_CURRENCY, INTENT_PAYMENT_METHOD};

pub const STRIPE_API_BASE: &str = "https://api.stripe.com";

/// Payment intents through the Stripe REST API.
#[derive(Clone)]
pub struct StripeProcessor {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct IntentBody {
    client_secret: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

impl StripeProcessor {
    pub fn new(secret_key: &str) -> Self {
        Self::with_base_url(secret_key, STRIPE_API_BASE)
    }

    pub fn with_base_url(secret_key: &str, base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
        }
    }
}

#[axum::async_trait]
impl PaymentProcessor for StripeProcessor {
    #[tracing::instrument(skip(self))]
    async fn create_intent(&self, amount_in_cents: i64) -> Result<String, String> {
        let url = format!("{}/v1/payment_intents", self.base_url);
        let amount = amount_in_cents.to_string();

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.secret_key)
            .form(&[
                ("amount", amount.as_str()),
                ("currency", INTENT_CURRENCY),
                ("payment_method_types[]", INTENT_PAYMENT_METHOD),
            ])
            .send()
            .await
            .map_err(|err| err.to_string())?;

        let status = response.status();
        let body = response.text().await.map_err(|err| err.to_string())?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&body)
                .ok()
                .and_then(|it| it.error.message)
                .unwrap_or_else(|| format!("payment processor responded with {}", status));
            tracing::warn!(%status, "payment intent rejected: {}", message);
            return Err(message);
        }

        serde_json::from_str::<IntentBody>(&body)
            .map(|it| it.client_secret)
            .map_err(|err| err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use axum::{http::StatusCode, routing, Form, Json, Router};
    use serde_json::json;

    use crate::api::payment::PaymentProcessor;

    use super::StripeProcessor;

    async fn serve(app: Router) -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::Server::from_tcp(listener)
                .unwrap()
                .serve(app.into_make_service())
                .await
                .unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_create_intent_sends_fixed_configuration() {
        let app = Router::new().route(
            "/v1/payment_intents",
            routing::post(
                |headers: axum::http::HeaderMap, Form(form): Form<Vec<(String, String)>>| async move {
                    assert_eq!(headers["authorization"], "Bearer sk_test_123");
                    assert!(form.contains(&("amount".to_string(), "1250".to_string())));
                    assert!(form.contains(&("currency".to_string(), "usd".to_string())));
                    assert!(form.contains(&(
                        "payment_method_types[]".to_string(),
                        "card".to_string()
                    )));
                    Json(json!({ "id": "pi_1", "client_secret": "pi_1_secret_abc" }))
                },
            ),
        );
        let base_url = serve(app).await;

        let secret = StripeProcessor::with_base_url("sk_test_123", &base_url)
            .create_intent(1250)
            .await
            .unwrap();

        assert_eq!(secret, "pi_1_secret_abc");
    }

    #[tokio::test]
    async fn test_create_intent_relays_processor_message() {
        let app = Router::new().route(
            "/v1/payment_intents",
            routing::post(|| async {
                (
                    StatusCode::PAYMENT_REQUIRED,
                    Json(json!({ "error": { "message": "Your card was declined.", "type": "card_error" } })),
                )
            }),
        );
        let base_url = serve(app).await;

        let message = StripeProcessor::with_base_url("sk_test_123", &base_url)
            .create_intent(1250)
            .await
            .unwrap_err();

        assert_eq!(message, "Your card was declined.");
    }
}
