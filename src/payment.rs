// payment.rs
use constant_time_eq::constant_time_eq;
use hmac::{Hmac, Mac};
use lazy_static::lazy_static;
use moka::future::Cache;
use regex::Regex;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, info, warn};

lazy_static! {
    static ref PAYMENT_LINK_ID: Regex = Regex::new(r"^plink_[A-Za-z0-9]+$").unwrap();
}

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("amount must be a positive number of rupees")]
    InvalidAmount,
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("{0:?} is not a payment link id")]
    InvalidPaymentId(String),
    #[error("payment gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("payment gateway rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentRequest {
    pub amount: f64,
    pub user_id: String,
    pub order_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentLink {
    pub payment_url: String,
    pub payment_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Created,
    Paid,
    Cancelled,
}

impl PaymentStatus {
    /// Gateway link states collapse onto the three states the app understands.
    pub fn from_gateway(status: &str) -> Self {
        match status {
            "paid" => PaymentStatus::Paid,
            "cancelled" | "expired" => PaymentStatus::Cancelled,
            _ => PaymentStatus::Created,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Created)
    }
}

/// Rupees to paise. Rejects zero, negative and non-finite amounts.
pub fn amount_in_paise(amount: f64) -> Result<i64, PaymentError> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(PaymentError::InvalidAmount);
    }
    let paise = (amount * 100.0).round();
    if paise < 1.0 || paise > i64::MAX as f64 {
        return Err(PaymentError::InvalidAmount);
    }
    Ok(paise as i64)
}

/// Only ids shaped like the gateway's own (`plink_...`) ever reach a request URL.
pub fn check_payment_link_id(payment_id: &str) -> Result<(), PaymentError> {
    if PAYMENT_LINK_ID.is_match(payment_id) {
        Ok(())
    } else {
        Err(PaymentError::InvalidPaymentId(payment_id.to_string()))
    }
}

#[trait_variant::make(PaymentGateway: Send)]
pub trait LocalPaymentGateway {
    async fn create_link(&self, request: &CreatePaymentRequest) -> Result<PaymentLink, PaymentError>;
    /// Raw gateway status string for a link.
    async fn link_status(&self, payment_id: &str) -> Result<String, PaymentError>;
}

// Razorpay payment link shapes
#[derive(Serialize)]
struct CreateLinkBody<'a> {
    amount: i64,
    currency: &'a str,
    reference_id: &'a str,
    description: String,
    notes: LinkNotes<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_method: Option<&'a str>,
}

#[derive(Serialize)]
struct LinkNotes<'a> {
    user_id: &'a str,
    order_id: &'a str,
}

#[derive(Deserialize)]
struct LinkResponse {
    id: String,
    #[serde(default)]
    short_url: String,
    #[serde(default)]
    status: String,
}

pub struct RazorpayClient {
    http_client: HttpClient,
    api_url: String,
    key_id: String,
    key_secret: String,
    callback_url: Option<String>,
}

impl RazorpayClient {
    pub fn new(
        api_url: &str,
        key_id: &str,
        key_secret: &str,
        callback_url: Option<String>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            http_client: HttpClient::builder()
                .timeout(Duration::from_secs(15))
                .build()?,
            api_url: api_url.trim_end_matches('/').to_string(),
            key_id: key_id.to_string(),
            key_secret: key_secret.to_string(),
            callback_url,
        })
    }

    async fn read_link(response: reqwest::Response) -> Result<LinkResponse, PaymentError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PaymentError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}

impl PaymentGateway for RazorpayClient {
    async fn create_link(&self, request: &CreatePaymentRequest) -> Result<PaymentLink, PaymentError> {
        let body = CreateLinkBody {
            amount: amount_in_paise(request.amount)?,
            currency: "INR",
            reference_id: &request.order_id,
            description: format!("Prime Status order {}", request.order_id),
            notes: LinkNotes {
                user_id: &request.user_id,
                order_id: &request.order_id,
            },
            callback_url: self.callback_url.as_deref(),
            callback_method: self.callback_url.as_ref().map(|_| "get"),
        };

        let response = self
            .http_client
            .post(format!("{}/v1/payment_links", self.api_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await?;
        let link = Self::read_link(response).await?;

        Ok(PaymentLink {
            payment_url: link.short_url,
            payment_id: link.id,
        })
    }

    async fn link_status(&self, payment_id: &str) -> Result<String, PaymentError> {
        check_payment_link_id(payment_id)?;
        let response = self
            .http_client
            .get(format!("{}/v1/payment_links/{}", self.api_url, payment_id))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .send()
            .await?;
        Ok(Self::read_link(response).await?.status)
    }
}

/// Payment link issuance and status polling in front of a gateway.
pub struct PaymentService<G> {
    gateway: G,
    // Short-lived: open links change state; terminal ones are held longer.
    open_cache: Cache<String, PaymentStatus>,
    terminal_cache: Cache<String, PaymentStatus>,
}

impl<G: PaymentGateway> PaymentService<G> {
    pub fn new(gateway: G) -> Self {
        Self {
            gateway,
            open_cache: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(Duration::from_secs(10))
                .build(),
            terminal_cache: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(Duration::from_secs(3600))
                .build(),
        }
    }

    pub async fn create_payment(&self, request: &CreatePaymentRequest) -> Result<PaymentLink, PaymentError> {
        amount_in_paise(request.amount)?;
        if request.user_id.trim().is_empty() {
            return Err(PaymentError::MissingField("userId"));
        }
        if request.order_id.trim().is_empty() {
            return Err(PaymentError::MissingField("orderId"));
        }

        let link = self.gateway.create_link(request).await?;
        crate::metrics::PAYMENT_LINKS_CREATED.inc();
        info!(
            order_id = %request.order_id,
            user_id = %request.user_id,
            payment_id = %link.payment_id,
            "Payment link created"
        );
        Ok(link)
    }

    pub async fn payment_status(&self, payment_id: &str) -> Result<PaymentStatus, PaymentError> {
        check_payment_link_id(payment_id)?;
        if let Some(status) = self
            .terminal_cache
            .get(payment_id)
            .or_else(|| self.open_cache.get(payment_id))
        {
            crate::metrics::PAYMENT_STATUS_CACHE_HITS.inc();
            debug!(payment_id = %payment_id, "Payment status served from cache");
            return Ok(status);
        }

        crate::metrics::PAYMENT_STATUS_CACHE_MISSES.inc();
        let status = PaymentStatus::from_gateway(&self.gateway.link_status(payment_id).await?);
        let cache = if status.is_terminal() {
            &self.terminal_cache
        } else {
            &self.open_cache
        };
        cache.insert(payment_id.to_string(), status).await;
        Ok(status)
    }

    pub async fn invalidate(&self, payment_id: &str) {
        self.open_cache.invalidate(payment_id).await;
        self.terminal_cache.invalidate(payment_id).await;
    }
}

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 of the raw webhook body, compared in constant time.
pub fn verify_webhook_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(e) => {
            warn!("Invalid webhook secret: {}", e);
            return false;
        }
    };
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(expected.as_bytes(), signature.trim().as_bytes())
}

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl WebhookEvent {
    /// Payment link id carried by `payment_link.*` events.
    pub fn payment_link_id(&self) -> Option<&str> {
        self.payload
            .get("payment_link")?
            .get("entity")?
            .get("id")?
            .as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeGateway {
        status: Mutex<String>,
        status_calls: AtomicUsize,
    }

    impl FakeGateway {
        fn with_status(status: &str) -> Self {
            Self {
                status: Mutex::new(status.to_string()),
                status_calls: AtomicUsize::new(0),
            }
        }
    }

    impl PaymentGateway for FakeGateway {
        async fn create_link(&self, request: &CreatePaymentRequest) -> Result<PaymentLink, PaymentError> {
            Ok(PaymentLink {
                payment_url: format!("https://rzp.io/i/{}", request.order_id),
                payment_id: format!("plink_{}", request.order_id),
            })
        }

        async fn link_status(&self, _payment_id: &str) -> Result<String, PaymentError> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.status.lock().unwrap().clone())
        }
    }

    fn request(amount: f64) -> CreatePaymentRequest {
        CreatePaymentRequest {
            amount,
            user_id: "user-7".into(),
            order_id: "order-99".into(),
        }
    }

    #[test]
    fn test_amount_conversion() {
        assert_eq!(amount_in_paise(199.0).unwrap(), 19900);
        assert_eq!(amount_in_paise(49.99).unwrap(), 4999);
        assert!(amount_in_paise(0.0).is_err());
        assert!(amount_in_paise(-5.0).is_err());
        assert!(amount_in_paise(f64::NAN).is_err());
        assert!(amount_in_paise(0.001).is_err());
    }

    #[test]
    fn test_gateway_status_mapping() {
        assert_eq!(PaymentStatus::from_gateway("paid"), PaymentStatus::Paid);
        assert_eq!(PaymentStatus::from_gateway("expired"), PaymentStatus::Cancelled);
        assert_eq!(PaymentStatus::from_gateway("cancelled"), PaymentStatus::Cancelled);
        assert_eq!(PaymentStatus::from_gateway("partially_paid"), PaymentStatus::Created);
        assert_eq!(PaymentStatus::from_gateway("created"), PaymentStatus::Created);
    }

    #[tokio::test]
    async fn test_create_payment_validates_before_calling_gateway() {
        let service = PaymentService::new(FakeGateway::with_status("created"));

        assert!(matches!(
            service.create_payment(&request(0.0)).await,
            Err(PaymentError::InvalidAmount)
        ));
        let missing_order = CreatePaymentRequest {
            order_id: " ".into(),
            ..request(10.0)
        };
        assert!(matches!(
            service.create_payment(&missing_order).await,
            Err(PaymentError::MissingField("orderId"))
        ));

        let link = service.create_payment(&request(10.0)).await.unwrap();
        assert_eq!(link.payment_id, "plink_order-99");
        assert_eq!(link.payment_url, "https://rzp.io/i/order-99");
    }

    #[tokio::test]
    async fn test_status_is_cached_until_invalidated() {
        let service = PaymentService::new(FakeGateway::with_status("created"));

        assert_eq!(service.payment_status("plink_1").await.unwrap(), PaymentStatus::Created);
        assert_eq!(service.payment_status("plink_1").await.unwrap(), PaymentStatus::Created);
        assert_eq!(service.gateway.status_calls.load(Ordering::SeqCst), 1);

        *service.gateway.status.lock().unwrap() = "paid".into();
        service.invalidate("plink_1").await;
        assert_eq!(service.payment_status("plink_1").await.unwrap(), PaymentStatus::Paid);
        assert_eq!(service.gateway.status_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_webhook_signature() {
        let body = br#"{"event":"payment_link.paid"}"#;
        let mut mac = HmacSha256::new_from_slice(b"whsec").unwrap();
        mac.update(body);
        let signature = hex::encode(mac.finalize().into_bytes());

        assert!(verify_webhook_signature("whsec", body, &signature));
        assert!(!verify_webhook_signature("other", body, &signature));
        assert!(!verify_webhook_signature("whsec", b"{}", &signature));
        assert!(!verify_webhook_signature("whsec", body, "deadbeef"));
    }

    #[test]
    fn test_webhook_event_link_id() {
        let event: WebhookEvent = serde_json::from_str(
            r#"{"event":"payment_link.paid","payload":{"payment_link":{"entity":{"id":"plink_9","status":"paid"}}}}"#,
        )
        .unwrap();
        assert_eq!(event.payment_link_id(), Some("plink_9"));

        let other: WebhookEvent = serde_json::from_str(r#"{"event":"payment.captured"}"#).unwrap();
        assert_eq!(other.payment_link_id(), None);
    }

    #[tokio::test]
    async fn test_status_lookup_rejects_ids_that_are_not_link_ids() {
        let service = PaymentService::new(FakeGateway::with_status("paid"));

        for id in [
            "../../v1/orders?count=100",
            "plink_1/../../v1/orders",
            "plink_",
            "plink_abc?expand=all",
            "order_123",
            "",
        ] {
            assert!(
                matches!(
                    service.payment_status(id).await,
                    Err(PaymentError::InvalidPaymentId(_))
                ),
                "accepted {:?}",
                id
            );
        }
        assert_eq!(service.gateway.status_calls.load(Ordering::SeqCst), 0);
        assert!(service.payment_status("plink_Abc123").await.is_ok());
    }

    #[tokio::test]
    async fn test_razorpay_client_refuses_path_like_ids() {
        // Nothing listens here; a request that got this far would fail as Transport.
        let client = RazorpayClient::new("http://127.0.0.1:9", "key", "secret", None).unwrap();

        let result = PaymentGateway::link_status(&client, "../../v1/orders?count=100").await;

        assert!(matches!(result, Err(PaymentError::InvalidPaymentId(_))));
    }
}
