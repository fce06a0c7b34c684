use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const STRIPE_API: &str = "https://api.stripe.com/v1";

/// What the booking flow needs from a hosted checkout provider.
#[async_trait]
pub trait PaymentClient: Send + Sync {
    async fn create_checkout_session(&self, req: &CheckoutRequest)
        -> anyhow::Result<CheckoutSession>;
    /// Provider-side lookup used to confirm a booking after redirect.
    async fn retrieve_session(&self, session_id: &str) -> anyhow::Result<SessionStatus>;
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub tour_id: Uuid,
    pub user_id: Uuid,
    pub tour_name: String,
    pub tour_summary: String,
    /// Price in the store's major unit (dollars).
    pub price: f64,
    pub customer_email: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionStatus {
    pub id: String,
    pub payment_status: String,
    pub amount_total: Option<i64>,
    pub metadata: SessionMetadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionMetadata {
    pub tour_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
}

impl SessionStatus {
    pub fn is_paid(&self) -> bool {
        self.payment_status == "paid"
    }
}

/// Form-encoded parameters for `POST /v1/checkout/sessions`. Price is
/// converted to cents; tour and buyer ids travel in provider metadata so
/// the confirmation step never trusts client query parameters.
pub fn checkout_form(req: &CheckoutRequest) -> Vec<(String, String)> {
    vec![
        ("mode".into(), "payment".into()),
        ("success_url".into(), req.success_url.clone()),
        ("cancel_url".into(), req.cancel_url.clone()),
        ("customer_email".into(), req.customer_email.clone()),
        ("client_reference_id".into(), req.tour_id.to_string()),
        ("metadata[tour_id]".into(), req.tour_id.to_string()),
        ("metadata[user_id]".into(), req.user_id.to_string()),
        ("line_items[0][quantity]".into(), "1".into()),
        ("line_items[0][price_data][currency]".into(), "usd".into()),
        (
            "line_items[0][price_data][unit_amount]".into(),
            ((req.price * 100.0).round() as i64).to_string(),
        ),
        (
            "line_items[0][price_data][product_data][name]".into(),
            format!("{} Tour", req.tour_name),
        ),
        (
            "line_items[0][price_data][product_data][description]".into(),
            req.tour_summary.clone(),
        ),
    ]
}

pub struct StripeCheckout {
    http: reqwest::Client,
    secret_key: String,
}

impl StripeCheckout {
    pub fn new(secret_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            secret_key,
        }
    }
}

#[async_trait]
impl PaymentClient for StripeCheckout {
    async fn create_checkout_session(
        &self,
        req: &CheckoutRequest,
    ) -> anyhow::Result<CheckoutSession> {
        let session = self
            .http
            .post(format!("{}/checkout/sessions", STRIPE_API))
            .bearer_auth(&self.secret_key)
            .form(&checkout_form(req))
            .send()
            .await
            .context("create checkout session")?
            .error_for_status()
            .context("checkout session rejected")?
            .json::<CheckoutSession>()
            .await
            .context("decode checkout session")?;
        Ok(session)
    }

    async fn retrieve_session(&self, session_id: &str) -> anyhow::Result<SessionStatus> {
        let status = self
            .http
            .get(format!("{}/checkout/sessions/{}", STRIPE_API, session_id))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .context("retrieve checkout session")?
            .error_for_status()
            .context("checkout session lookup rejected")?
            .json::<SessionStatus>()
            .await
            .context("decode checkout session status")?;
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CheckoutRequest {
        CheckoutRequest {
            tour_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            tour_name: "The Forest Hiker".into(),
            tour_summary: "Breathtaking hike".into(),
            price: 497.0,
            customer_email: "buyer@example.com".into(),
            success_url: "http://localhost/confirm?session_id={CHECKOUT_SESSION_ID}".into(),
            cancel_url: "http://localhost/tour/the-forest-hiker".into(),
        }
    }

    #[test]
    fn checkout_form_converts_price_to_cents() {
        let req = sample();
        let form = checkout_form(&req);
        let amount = form
            .iter()
            .find(|(k, _)| k == "line_items[0][price_data][unit_amount]")
            .map(|(_, v)| v.clone())
            .unwrap();
        assert_eq!(amount, "49700");
    }

    #[test]
    fn checkout_form_carries_ids_in_metadata() {
        let req = sample();
        let form = checkout_form(&req);
        let get = |k: &str| {
            form.iter()
                .find(|(key, _)| key == k)
                .map(|(_, v)| v.clone())
                .unwrap()
        };
        assert_eq!(get("metadata[tour_id]"), req.tour_id.to_string());
        assert_eq!(get("metadata[user_id]"), req.user_id.to_string());
        assert_eq!(get("mode"), "payment");
    }

    #[test]
    fn paid_session_is_detected() {
        let paid = SessionStatus {
            id: "cs_test".into(),
            payment_status: "paid".into(),
            amount_total: Some(49700),
            metadata: SessionMetadata::default(),
        };
        assert!(paid.is_paid());
        let unpaid = SessionStatus {
            payment_status: "unpaid".into(),
            ..paid
        };
        assert!(!unpaid.is_paid());
    }
}
