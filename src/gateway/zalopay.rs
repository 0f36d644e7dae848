//! ZaloPay mobile-wallet adapter (API v2).
//!
//! Outbound requests are form posts signed with `key1`; inbound callbacks
//! are verified with `key2`. The two keys are distinct by configuration.

use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::signing::{hmac_sha256_hex, verify_hmac_sha256_hex};
use super::{
    GatewayFailure, GatewayOrderStatus, OrderHandle, OrderRequest, PaymentGateway,
    RefundReceipt, RefundRequest, VerifiedPayment, http_client,
};
use crate::config::{AmountLimits, ZaloPayConfig};
use crate::domain::{PaymentMethod, transaction_code};
use crate::error::LedgerError;

/// Return code meaning "ok" on every ZaloPay endpoint.
const RETURN_SUCCESS: i64 = 1;
/// Query return code for an order that is still being processed.
const RETURN_PROCESSING: i64 = 3;

/// Signed ZaloPay API client.
#[derive(Debug, Clone)]
pub struct ZaloPayClient {
    config: ZaloPayConfig,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct CreateOrderResponse {
    return_code: i64,
    #[serde(default)]
    return_message: String,
    #[serde(default)]
    sub_return_code: Option<i64>,
    #[serde(default)]
    sub_return_message: Option<String>,
    #[serde(default)]
    order_url: Option<String>,
    #[serde(default)]
    zp_trans_token: Option<String>,
    #[serde(default)]
    order_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryOrderResponse {
    return_code: i64,
    #[serde(default)]
    return_message: String,
    #[serde(default)]
    is_processing: bool,
    #[serde(default)]
    amount: Option<u64>,
    #[serde(default)]
    discount_amount: Option<u64>,
    #[serde(default)]
    zp_trans_id: Option<NumberOrString>,
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
    return_code: i64,
    #[serde(default)]
    return_message: String,
    #[serde(default)]
    refund_id: Option<NumberOrString>,
}

/// Payload of the `data` field of a callback.
#[derive(Debug, Deserialize)]
struct CallbackData {
    app_trans_id: String,
    amount: u64,
    zp_trans_id: NumberOrString,
}

/// ZaloPay sends ids as JSON numbers on some endpoints and strings on
/// others.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(i64),
    String(String),
}

impl NumberOrString {
    fn into_string(self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::String(s) => s,
        }
    }
}

impl ZaloPayClient {
    /// Builds a client with its own HTTP connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayFailure::Transport`] if the HTTP client cannot be
    /// built.
    pub fn new(config: ZaloPayConfig) -> Result<Self, GatewayFailure> {
        let http = http_client(config.timeout)?;
        Ok(Self { config, http })
    }

    /// Returns the gateway configuration.
    #[must_use]
    pub const fn config(&self) -> &ZaloPayConfig {
        &self.config
    }

    /// Verifies a callback and extracts the payment it reports.
    ///
    /// The `data` string is authenticated with `key2` before it is parsed.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Signature`] if `mac` does not authenticate
    /// `data`, and [`LedgerError::Validation`] if authenticated data cannot
    /// be parsed.
    pub fn verify_callback(&self, data: &str, mac: &str) -> Result<VerifiedPayment, LedgerError> {
        verify_hmac_sha256_hex(self.config.inbound_key.reveal(), data.as_bytes(), mac)
            .map_err(|_| LedgerError::Signature)?;

        let parsed: CallbackData = serde_json::from_str(data)
            .map_err(|e| LedgerError::Validation(format!("malformed callback data: {e}")))?;

        Ok(VerifiedPayment {
            transaction_code: parsed.app_trans_id,
            amount: parsed.amount,
            gateway_transaction_id: parsed.zp_trans_id.into_string(),
        })
    }

    fn create_mac(&self, fields: &CreateMacFields<'_>) -> Result<String, GatewayFailure> {
        let input = format!(
            "{}|{}|{}|{}|{}|{}|{}",
            self.config.app_id,
            fields.app_trans_id,
            fields.app_user,
            fields.amount,
            fields.app_time,
            fields.embed_data,
            fields.item
        );
        Ok(hmac_sha256_hex(self.config.outbound_key.reveal(), &input)?)
    }

    fn query_mac(&self, app_trans_id: &str) -> Result<String, GatewayFailure> {
        let key = self.config.outbound_key.reveal();
        let input = format!("{}|{app_trans_id}|{key}", self.config.app_id);
        Ok(hmac_sha256_hex(key, &input)?)
    }

    fn refund_mac(
        &self,
        zp_trans_id: &str,
        amount: u64,
        description: &str,
        timestamp: i64,
    ) -> Result<String, GatewayFailure> {
        let input = format!(
            "{}|{zp_trans_id}|{amount}|{description}|{timestamp}",
            self.config.app_id
        );
        Ok(hmac_sha256_hex(self.config.outbound_key.reveal(), &input)?)
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        form: &[(&str, String)],
    ) -> Result<T, GatewayFailure> {
        let response = self.http.post(endpoint).form(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayFailure::Transport(format!("HTTP {status}")));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| GatewayFailure::InvalidResponse(e.to_string()))
    }
}

struct CreateMacFields<'a> {
    app_trans_id: &'a str,
    app_user: &'a str,
    amount: u64,
    app_time: i64,
    embed_data: &'a str,
    item: &'a str,
}

impl PaymentGateway for ZaloPayClient {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Zalopay
    }

    fn currency(&self) -> &str {
        &self.config.currency
    }

    fn amount_limits(&self) -> AmountLimits {
        self.config.limits
    }

    fn timeout(&self) -> Duration {
        self.config.timeout
    }

    async fn create_order(&self, order: &OrderRequest) -> Result<OrderHandle, GatewayFailure> {
        let app_time = Utc::now().timestamp_millis();
        let embed_data = serde_json::json!({
            "redirecturl": order.redirect_url.clone().unwrap_or_default(),
            "merchantinfo": self.config.merchant_info,
            "donationId": order.donation_id.to_string(),
            "campaignId": order.campaign_id.to_string(),
        })
        .to_string();
        let item = serde_json::json!([{
            "itemid": order.donation_id.to_string(),
            "itemname": order.description,
            "itemprice": order.amount,
            "itemquantity": 1,
        }])
        .to_string();

        let mac = self.create_mac(&CreateMacFields {
            app_trans_id: &order.transaction_code,
            app_user: &order.donor_name,
            amount: order.amount,
            app_time,
            embed_data: &embed_data,
            item: &item,
        })?;

        let form = [
            ("app_id", self.config.app_id.clone()),
            ("app_trans_id", order.transaction_code.clone()),
            ("app_user", order.donor_name.clone()),
            ("app_time", app_time.to_string()),
            ("amount", order.amount.to_string()),
            ("description", order.description.clone()),
            ("bank_code", "zalopayapp".to_string()),
            ("item", item),
            ("embed_data", embed_data),
            ("callback_url", self.config.callback_url.clone()),
            ("mac", mac),
        ];

        tracing::debug!(
            transaction_code = %order.transaction_code,
            amount = order.amount,
            "opening ZaloPay order"
        );
        let response: CreateOrderResponse =
            self.post_form(&self.config.create_endpoint, &form).await?;

        if response.return_code != RETURN_SUCCESS {
            let message = response
                .sub_return_message
                .filter(|m| !m.is_empty())
                .unwrap_or(response.return_message);
            tracing::warn!(
                transaction_code = %order.transaction_code,
                return_code = response.return_code,
                sub_return_code = ?response.sub_return_code,
                %message,
                "ZaloPay refused order"
            );
            return Err(GatewayFailure::Rejected {
                code: response.return_code,
                message,
            });
        }

        let Some(order_url) = response.order_url else {
            return Err(GatewayFailure::InvalidResponse(
                "order accepted without order_url".to_string(),
            ));
        };
        Ok(OrderHandle {
            order_url: Some(order_url),
            client_secret: None,
            gateway_order_id: response.zp_trans_token,
            order_token: response.order_token,
        })
    }

    async fn query_order(
        &self,
        transaction_code: &str,
    ) -> Result<GatewayOrderStatus, GatewayFailure> {
        let form = [
            ("app_id", self.config.app_id.clone()),
            ("app_trans_id", transaction_code.to_string()),
            ("mac", self.query_mac(transaction_code)?),
        ];
        let response: QueryOrderResponse =
            self.post_form(&self.config.query_endpoint, &form).await?;

        Ok(GatewayOrderStatus {
            is_paid: response.return_code == RETURN_SUCCESS,
            is_processing: response.is_processing || response.return_code == RETURN_PROCESSING,
            return_code: response.return_code,
            return_message: response.return_message,
            gateway_transaction_id: response
                .zp_trans_id
                .map(NumberOrString::into_string)
                .filter(|id| id != "0"),
            amount: response.amount,
            discount_amount: response.discount_amount.unwrap_or(0),
        })
    }

    async fn refund(&self, refund: &RefundRequest) -> Result<RefundReceipt, GatewayFailure> {
        let now = Utc::now();
        let timestamp = now.timestamp_millis();
        // Stable for one day, so a retried refund is deduplicated upstream.
        let m_refund_id = format!(
            "{}_{}_{}",
            transaction_code::date_prefix(now),
            self.config.app_id,
            transaction_code::suffix(&refund.transaction_code)
        );
        let mac = self.refund_mac(
            &refund.gateway_transaction_id,
            refund.amount,
            &refund.description,
            timestamp,
        )?;
        let form = [
            ("app_id", self.config.app_id.clone()),
            ("m_refund_id", m_refund_id.clone()),
            ("zp_trans_id", refund.gateway_transaction_id.clone()),
            ("amount", refund.amount.to_string()),
            ("timestamp", timestamp.to_string()),
            ("description", refund.description.clone()),
            ("mac", mac),
        ];
        let response: RefundResponse = self.post_form(&self.config.refund_endpoint, &form).await?;

        if response.return_code != RETURN_SUCCESS {
            return Err(GatewayFailure::Rejected {
                code: response.return_code,
                message: response.return_message,
            });
        }
        Ok(RefundReceipt {
            refund_id: response
                .refund_id
                .map_or(m_refund_id, NumberOrString::into_string),
            return_code: response.return_code,
            return_message: response.return_message,
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::secret::Secret;

    fn sign(key: &str, data: &str) -> String {
        let Ok(mac) = hmac_sha256_hex(key, data) else {
            panic!("key refused");
        };
        mac
    }

    fn client() -> ZaloPayClient {
        let config = ZaloPayConfig {
            app_id: "2554".to_string(),
            outbound_key: Secret::from("sdngKKJmqEMzvh5QQcdD2A9XBSKUNaYn"),
            inbound_key: Secret::from("trMrHtvjo6myautxDUiAcYsVtaeQ8nhf"),
            create_endpoint: "http://127.0.0.1:9/v2/create".to_string(),
            query_endpoint: "http://127.0.0.1:9/v2/query".to_string(),
            refund_endpoint: "http://127.0.0.1:9/v2/refund".to_string(),
            callback_url: "http://localhost/api/zalopay/callback".to_string(),
            merchant_info: "test".to_string(),
            timeout: Duration::from_secs(1),
            limits: AmountLimits {
                min: 1_000,
                max: 5_000_000,
            },
            currency: "VND".to_string(),
        };
        let Ok(client) = ZaloPayClient::new(config) else {
            panic!("client builds");
        };
        client
    }

    #[test]
    fn callback_with_valid_mac_is_parsed() {
        let client = client();
        let data = r#"{"app_id":2554,"app_trans_id":"241017_ab12","amount":50000,"zp_trans_id":240000123}"#;
        let mac = sign("trMrHtvjo6myautxDUiAcYsVtaeQ8nhf", data);

        let Ok(payment) = client.verify_callback(data, &mac) else {
            panic!("valid callback rejected");
        };
        assert_eq!(payment.transaction_code, "241017_ab12");
        assert_eq!(payment.amount, 50_000);
        assert_eq!(payment.gateway_transaction_id, "240000123");
    }

    #[test]
    fn callback_signed_with_outbound_key_is_rejected() {
        let client = client();
        let data = r#"{"app_trans_id":"241017_ab12","amount":50000,"zp_trans_id":"1"}"#;
        let mac = sign("sdngKKJmqEMzvh5QQcdD2A9XBSKUNaYn", data);
        assert!(matches!(
            client.verify_callback(data, &mac),
            Err(LedgerError::Signature)
        ));
    }

    #[test]
    fn authenticated_garbage_is_a_validation_error() {
        let client = client();
        let data = "not json";
        let mac = sign("trMrHtvjo6myautxDUiAcYsVtaeQ8nhf", data);
        assert!(matches!(
            client.verify_callback(data, &mac),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn query_mac_covers_app_id_code_and_key() {
        let client = client();
        let expected = sign(
            "sdngKKJmqEMzvh5QQcdD2A9XBSKUNaYn",
            "2554|241017_ab12|sdngKKJmqEMzvh5QQcdD2A9XBSKUNaYn",
        );
        assert_eq!(client.query_mac("241017_ab12"), Ok(expected));
    }

    #[test]
    fn create_mac_uses_pipe_joined_fields_in_order() {
        let client = client();
        let mac = client.create_mac(&CreateMacFields {
            app_trans_id: "241017_ab12",
            app_user: "Lan",
            amount: 50_000,
            app_time: 1_729_123_456_789,
            embed_data: "{}",
            item: "[]",
        });
        let expected = sign(
            "sdngKKJmqEMzvh5QQcdD2A9XBSKUNaYn",
            "2554|241017_ab12|Lan|50000|1729123456789|{}|[]",
        );
        assert_eq!(mac, Ok(expected));
    }

    #[tokio::test]
    async fn unreachable_gateway_is_indeterminate() {
        let client = client();
        let result = client.query_order("241017_ab12").await;
        let Err(failure) = result else {
            panic!("port 9 should refuse connections");
        };
        assert!(failure.is_indeterminate());
    }
}
