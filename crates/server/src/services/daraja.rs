//! Safaricom Daraja API client for STK push payments.
//!
//! Covers the three calls the payment flow needs: OAuth client
//! credentials, STK push initiation, and STK push status query. Tokens
//! are cached and refreshed slightly before expiry; refreshes are
//! serialized behind a write lock so a cold cache triggers one upstream
//! call, not a stampede.

use std::time::{Duration, Instant};

use chrono::Utc;
use duka_core::mpesa::{stk_password, stk_timestamp};
use duka_core::types::{Money, PhoneNumber};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::MpesaConfig;

/// Request timeout for all gateway calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Refresh tokens this long before the gateway-reported expiry.
const TOKEN_EXPIRY_MARGIN_SECS: u64 = 60;

/// Errors that can occur when interacting with the Daraja API.
#[derive(Debug, Error)]
pub enum DarajaError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Failed to build a request or parse a response.
    #[error("Parse error: {0}")]
    Parse(String),
}

struct CachedToken {
    token: SecretString,
    expires_at: Instant,
}

/// Daraja API client with a cached OAuth token.
pub struct DarajaClient {
    client: reqwest::Client,
    config: MpesaConfig,
    token_cache: RwLock<Option<CachedToken>>,
}

impl DarajaClient {
    /// Create a new Daraja API client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn new(config: MpesaConfig) -> Result<Self, DarajaError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            config,
            token_cache: RwLock::new(None),
        })
    }

    /// Initiate an STK push to the customer's phone.
    ///
    /// `amount` is rounded to whole shillings; the gateway accepts only
    /// integer amounts.
    ///
    /// # Errors
    ///
    /// Returns error if the token or push request fails, or if the
    /// gateway rejects the push.
    pub async fn stk_push(
        &self,
        phone: &PhoneNumber,
        amount: Money,
        reference: &str,
        description: &str,
    ) -> Result<StkPushResponse, DarajaError> {
        let token = self.access_token().await?;
        let url = self.endpoint("mpesa/stkpush/v1/processrequest")?;

        let amount = amount.whole_units().ok_or_else(|| {
            DarajaError::Parse("amount is not representable in whole shillings".to_owned())
        })?;

        let now = Utc::now();
        let timestamp = stk_timestamp(&now);
        let password = stk_password(
            &self.config.short_code,
            self.config.passkey.expose_secret(),
            &timestamp,
        );

        let body = serde_json::json!({
            "BusinessShortCode": self.config.short_code,
            "Password": password,
            "Timestamp": timestamp,
            "TransactionType": "CustomerPayBillOnline",
            "Amount": amount,
            "PartyA": phone.as_str(),
            "PartyB": self.config.short_code,
            "PhoneNumber": phone.as_str(),
            "CallBackURL": self.config.callback_url.as_str(),
            "AccountReference": reference,
            "TransactionDesc": description,
        });

        let response = self
            .client
            .post(url)
            .bearer_auth(token.expose_secret())
            .json(&body)
            .send()
            .await?;
        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(DarajaError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let push: StkPushResponse = response
            .json()
            .await
            .map_err(|e| DarajaError::Parse(e.to_string()))?;

        if push.response_code != "0" {
            return Err(DarajaError::Api {
                status: status.as_u16(),
                message: push.response_description,
            });
        }

        Ok(push)
    }

    /// Query the status of a previously initiated STK push.
    ///
    /// A still-processing transaction comes back as an API error whose
    /// body carries code `500.001.1001`; callers treat that as "not yet".
    ///
    /// # Errors
    ///
    /// Returns error if the token or query request fails, or if the
    /// gateway answers non-2xx.
    pub async fn stk_query(
        &self,
        checkout_request_id: &str,
    ) -> Result<StkQueryResponse, DarajaError> {
        let token = self.access_token().await?;
        let url = self.endpoint("mpesa/stkpushquery/v1/query")?;

        let timestamp = stk_timestamp(&Utc::now());
        let password = stk_password(
            &self.config.short_code,
            self.config.passkey.expose_secret(),
            &timestamp,
        );

        let body = serde_json::json!({
            "BusinessShortCode": self.config.short_code,
            "Password": password,
            "Timestamp": timestamp,
            "CheckoutRequestID": checkout_request_id,
        });

        let response = self
            .client
            .post(url)
            .bearer_auth(token.expose_secret())
            .json(&body)
            .send()
            .await?;
        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(DarajaError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response.json().await.map_err(|e| DarajaError::Parse(e.to_string()))
    }

    /// Fetch a cached access token, refreshing it when stale.
    async fn access_token(&self) -> Result<SecretString, DarajaError> {
        {
            let cache = self.token_cache.read().await;
            if let Some(cached) = cache.as_ref()
                && cached.expires_at > Instant::now()
            {
                return Ok(cached.token.clone());
            }
        }

        let mut cache = self.token_cache.write().await;
        // Another task may have refreshed while we waited for the lock.
        if let Some(cached) = cache.as_ref()
            && cached.expires_at > Instant::now()
        {
            return Ok(cached.token.clone());
        }

        let url = self.endpoint("oauth/v1/generate?grant_type=client_credentials")?;
        let response = self
            .client
            .get(url)
            .basic_auth(
                &self.config.consumer_key,
                Some(self.config.consumer_secret.expose_secret()),
            )
            .send()
            .await?;
        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(DarajaError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let grant: TokenResponse = response
            .json()
            .await
            .map_err(|e| DarajaError::Parse(e.to_string()))?;

        // The gateway reports expiry in seconds, as a string.
        let expires_in: u64 = grant
            .expires_in
            .parse()
            .map_err(|_| DarajaError::Parse(format!("non-numeric expires_in: {}", grant.expires_in)))?;
        let lifetime = Duration::from_secs(expires_in.saturating_sub(TOKEN_EXPIRY_MARGIN_SECS));

        let token = SecretString::from(grant.access_token);
        *cache = Some(CachedToken {
            token: token.clone(),
            expires_at: Instant::now() + lifetime,
        });

        Ok(token)
    }

    fn endpoint(&self, path: &str) -> Result<reqwest::Url, DarajaError> {
        self.config
            .base_url
            .join(path)
            .map_err(|e| DarajaError::Parse(format!("invalid gateway URL: {e}")))
    }
}

// ===== Wire Types =====

/// OAuth token grant.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Lifetime in seconds; the gateway sends it as a string.
    expires_in: String,
}

/// Acknowledgement of an accepted STK push.
#[derive(Debug, Clone, Deserialize)]
pub struct StkPushResponse {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResponseCode")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription")]
    pub response_description: String,
    #[serde(rename = "CustomerMessage")]
    pub customer_message: String,
}

/// Outcome of an STK push status query.
///
/// Unlike the callback, the query endpoint sends `ResultCode` as a
/// string.
#[derive(Debug, Clone, Deserialize)]
pub struct StkQueryResponse {
    #[serde(rename = "ResponseCode")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription")]
    pub response_description: String,
    #[serde(rename = "ResultCode")]
    pub result_code: String,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
}
