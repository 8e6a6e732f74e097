//! Stripe REST implementation of [`PaymentGateway`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;

use gigwallet_core::{PaymentMetadata, User};

use super::types::{
    Customer, PaymentIntent, PaymentMethod, Price, StripeErrorResponse, StripeInvoice, StripeList,
    Subscription,
};
use super::{
    GatewayError, GatewaySubscription, InvoicePage, OffSessionCharge, PaymentGateway,
    PaymentHandle, PaymentIntentRequest,
};
use crate::crypto;

type Params = Vec<(String, String)>;

/// Stripe API client.
#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    api_key: String,
    base_url: String,
    webhook_secret: Option<String>,
    webhook_tolerance_seconds: i64,
}

impl StripeClient {
    /// Stripe API base URL.
    pub const BASE_URL: &'static str = "https://api.stripe.com/v1";

    /// Default age limit of a webhook signature.
    pub const DEFAULT_WEBHOOK_TOLERANCE_SECONDS: i64 = 300;

    /// Create a new Stripe client.
    ///
    /// # Arguments
    ///
    /// * `api_key` - Stripe secret API key (`sk_test_...` or `sk_live_...`)
    /// * `webhook_secret` - Webhook signing secret (`whsec_...`); webhooks are
    ///   rejected when absent
    /// * `timeout` - Per-request timeout
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Configuration` if the HTTP client cannot be built.
    pub fn new(
        api_key: impl Into<String>,
        webhook_secret: Option<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: Self::BASE_URL.to_string(),
            webhook_secret,
            webhook_tolerance_seconds: Self::DEFAULT_WEBHOOK_TOLERANCE_SECONDS,
        })
    }

    /// Point the client at another API root.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Override the webhook signature age limit.
    #[must_use]
    pub const fn with_webhook_tolerance(mut self, seconds: i64) -> Self {
        self.webhook_tolerance_seconds = seconds;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.api_key, Option::<&str>::None)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, GatewayError> {
        let response = self
            .authed(self.client.get(self.url(path)))
            .query(query)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &Params,
        idempotency_key: Option<&str>,
    ) -> Result<T, GatewayError> {
        let mut request = self.authed(self.client.post(self.url(path))).form(params);
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }

        Self::handle_response(request.send().await?).await
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        let (message, code) = match response.json::<StripeErrorResponse>().await {
            Ok(body) => (
                body.error
                    .message
                    .or(body.error.error_type)
                    .unwrap_or_else(|| format!("HTTP {status}")),
                body.error.code,
            ),
            Err(_) => (format!("HTTP {status}"), None),
        };

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            tracing::warn!(status = %status, message = %message, "Stripe request failed");
            Err(GatewayError::Transient(message))
        } else {
            tracing::debug!(status = %status, message = %message, code = ?code, "Stripe rejected request");
            Err(GatewayError::Rejected { message, code })
        }
    }
}

fn metadata_params(metadata: &PaymentMetadata) -> Params {
    metadata
        .to_map()
        .into_iter()
        .map(|(key, value)| (format!("metadata[{key}]"), value))
        .collect()
}

fn param(key: &str, value: impl ToString) -> (String, String) {
    (key.to_string(), value.to_string())
}

#[async_trait]
impl PaymentGateway for StripeClient {
    async fn create_customer(&self, user: &User) -> Result<String, GatewayError> {
        let params = vec![
            param("email", &user.email),
            param("metadata[user_id]", user.id),
        ];
        let idempotency_key = format!("customer_{}", user.id);

        let customer: Customer = self
            .post("customers", &params, Some(&idempotency_key))
            .await?;

        tracing::info!(user_id = %user.id, customer_id = %customer.id, "Created Stripe customer");
        Ok(customer.id)
    }

    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
    ) -> Result<PaymentHandle, GatewayError> {
        let mut params = vec![
            param("amount", request.amount_cents),
            param("currency", &request.currency),
            param("customer", &request.customer_id),
            param("description", &request.description),
            param("automatic_payment_methods[enabled]", "true"),
        ];
        if request.save_card {
            params.push(param("setup_future_usage", "off_session"));
        }
        params.extend(metadata_params(&request.metadata));

        tracing::debug!(
            reference = %request.idempotency_key,
            amount_cents = request.amount_cents,
            "Creating Stripe payment intent"
        );

        let intent: PaymentIntent = self
            .post("payment_intents", &params, Some(&request.idempotency_key))
            .await?;
        Ok(intent.into())
    }

    async fn create_recurring_price(
        &self,
        amount_cents: i64,
        currency: &str,
    ) -> Result<String, GatewayError> {
        let params = vec![
            param("unit_amount", amount_cents),
            param("currency", currency),
            param("recurring[interval]", "month"),
            param("product_data[name]", "Wallet top-up"),
        ];

        let price: Price = self.post("prices", &params, None).await?;
        Ok(price.id)
    }

    async fn charge_off_session(
        &self,
        charge: &OffSessionCharge,
    ) -> Result<PaymentHandle, GatewayError> {
        let methods: StripeList<PaymentMethod> = self
            .get(
                "payment_methods",
                &[
                    ("customer", charge.customer_id.clone()),
                    ("type", "card".to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;

        let method = methods
            .data
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::Rejected {
                message: format!("customer {} has no saved card", charge.customer_id),
                code: Some("no_payment_method".to_string()),
            })?;

        let mut params = vec![
            param("amount", charge.amount_cents),
            param("currency", &charge.currency),
            param("customer", &charge.customer_id),
            param("payment_method", &method.id),
            param("off_session", "true"),
            param("confirm", "true"),
        ];
        params.extend(metadata_params(&charge.metadata));

        let intent: PaymentIntent = self
            .post("payment_intents", &params, Some(&charge.idempotency_key))
            .await?;
        Ok(intent.into())
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<GatewaySubscription, GatewayError> {
        let sub: Subscription = self
            .get(&format!("subscriptions/{subscription_id}"), &[])
            .await?;
        Ok(sub.into())
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<GatewaySubscription, GatewayError> {
        let params = vec![param("cancel_at_period_end", "true")];
        let sub: Subscription = self
            .post(&format!("subscriptions/{subscription_id}"), &params, None)
            .await?;
        Ok(sub.into())
    }

    async fn reactivate_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<GatewaySubscription, GatewayError> {
        let params = vec![param("cancel_at_period_end", "false")];
        let sub: Subscription = self
            .post(&format!("subscriptions/{subscription_id}"), &params, None)
            .await?;
        Ok(sub.into())
    }

    async fn update_subscription_price(
        &self,
        subscription_id: &str,
        price_id: &str,
    ) -> Result<GatewaySubscription, GatewayError> {
        let current = self.retrieve_subscription(subscription_id).await?;
        let item_id = current.item_id.ok_or_else(|| {
            GatewayError::Malformed(format!("subscription {subscription_id} has no items"))
        })?;

        let params = vec![
            param("items[0][id]", item_id),
            param("items[0][price]", price_id),
            param("proration_behavior", "none"),
        ];
        let sub: Subscription = self
            .post(&format!("subscriptions/{subscription_id}"), &params, None)
            .await?;
        Ok(sub.into())
    }

    async fn list_invoices(
        &self,
        customer_id: &str,
        limit: u32,
        starting_after: Option<&str>,
    ) -> Result<InvoicePage, GatewayError> {
        let mut query = vec![
            ("customer", customer_id.to_string()),
            ("limit", limit.clamp(1, 100).to_string()),
        ];
        if let Some(cursor) = starting_after {
            query.push(("starting_after", cursor.to_string()));
        }

        let list: StripeList<StripeInvoice> = self.get("invoices", &query).await?;
        Ok(InvoicePage {
            invoices: list.data.into_iter().map(Into::into).collect(),
            has_more: list.has_more,
        })
    }

    fn verify_webhook(&self, payload: &[u8], signature: &str) -> Result<(), GatewayError> {
        let secret = self
            .webhook_secret
            .as_deref()
            .ok_or_else(|| GatewayError::Configuration("webhook secret not configured".into()))?;

        crypto::verify_signature(
            secret,
            payload,
            signature,
            self.webhook_tolerance_seconds,
            chrono::Utc::now().timestamp(),
        )
    }
}
