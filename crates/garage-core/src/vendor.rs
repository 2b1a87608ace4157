//! Smart-plug vendor API.
//!
//! [`PlugClient`] is the black-box RPC surface the monitor uses. Transport
//! failures, non-200 HTTP statuses and non-200 application codes all come
//! back as [`VendorError`]; callers treat every one of them the same way.
//!
//! With the `cloud` feature, [`GoveeClient`] implements it against the Govee
//! OpenAPI.

use async_trait::async_trait;
use garage_types::{DeviceDescriptor, PlugState};
use serde_json::Value;

/// Capability type/instance pair that switches a plug.
pub const POWER_CAPABILITY_TYPE: &str = "devices.capabilities.on_off";
pub const POWER_CAPABILITY_INSTANCE: &str = "powerSwitch";

/// Errors from the smart-plug vendor.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum VendorError {
    /// The API could not be reached at all.
    #[error("Vendor API not reachable at {url}: {message}")]
    NotReachable { url: String, message: String },

    /// Non-200 HTTP status.
    #[error("Vendor API returned HTTP {status}")]
    Http { status: u16 },

    /// HTTP 200 but a non-200 application code.
    #[error("Vendor API error {code}: {message}")]
    Api { code: i64, message: String },

    /// The payload did not have the expected shape.
    #[error("Malformed vendor response: {0}")]
    Malformed(String),

    #[error("Vendor API key is not configured")]
    MissingApiKey,
}

pub type VendorResult<T> = std::result::Result<T, VendorError>;

/// Black-box smart-plug RPC client.
#[async_trait]
pub trait PlugClient: Send + Sync {
    /// Every device on the account.
    async fn list_devices(&self) -> VendorResult<Vec<DeviceDescriptor>>;

    /// Current power state of one plug.
    async fn get_state(&self, device: &str, model: &str) -> VendorResult<PlugState>;

    /// Switch one plug on or off.
    async fn set_power(&self, device: &str, model: &str, on: bool) -> VendorResult<()>;
}

/// Check the `code` field of a vendor envelope.
pub fn check_envelope(body: &Value) -> VendorResult<()> {
    match body.get("code").and_then(Value::as_i64) {
        Some(200) => Ok(()),
        Some(code) => Err(VendorError::Api {
            code,
            message: body
                .get("message")
                .or_else(|| body.get("msg"))
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        }),
        None => Err(VendorError::Malformed("missing response code".into())),
    }
}

/// Device list from a `/user/devices` response.
pub fn parse_devices(body: &Value) -> VendorResult<Vec<DeviceDescriptor>> {
    check_envelope(body)?;
    let data = body
        .get("data")
        .cloned()
        .unwrap_or_else(|| Value::Array(Vec::new()));
    serde_json::from_value(data).map_err(|e| VendorError::Malformed(e.to_string()))
}

/// Power state from a `/device/state` response.
///
/// A response without a power-switch capability is malformed, not "on".
pub fn parse_power_state(body: &Value) -> VendorResult<PlugState> {
    check_envelope(body)?;
    let capabilities = body
        .pointer("/payload/capabilities")
        .and_then(Value::as_array)
        .ok_or_else(|| VendorError::Malformed("missing capabilities".into()))?;

    let value = capabilities
        .iter()
        .find(|c| {
            c.get("type").and_then(Value::as_str) == Some(POWER_CAPABILITY_TYPE)
                && c.get("instance").and_then(Value::as_str) == Some(POWER_CAPABILITY_INSTANCE)
        })
        .and_then(|c| c.pointer("/state/value"))
        .ok_or_else(|| VendorError::Malformed("no power switch capability".into()))?;

    Ok(if value.as_i64() == Some(1) {
        PlugState::on()
    } else {
        PlugState::off()
    })
}

/// Request body switching `device` on or off.
pub fn power_command(request_id: &str, device: &str, model: &str, on: bool) -> Value {
    serde_json::json!({
        "requestId": request_id,
        "payload": {
            "sku": model,
            "device": device,
            "capability": {
                "type": POWER_CAPABILITY_TYPE,
                "instance": POWER_CAPABILITY_INSTANCE,
                "value": if on { 1 } else { 0 },
            }
        }
    })
}

#[cfg(feature = "cloud")]
pub use govee::GoveeClient;

#[cfg(feature = "cloud")]
mod govee {
    use std::time::Duration;

    use async_trait::async_trait;
    use reqwest::Client;
    use serde_json::Value;
    use tracing::{debug, warn};

    use super::*;

    /// Base URL of the Govee OpenAPI router.
    pub const DEFAULT_BASE_URL: &str = "https://openapi.api.govee.com/router/api/v1";

    /// HTTP client for the Govee OpenAPI.
    #[derive(Debug, Clone)]
    pub struct GoveeClient {
        client: Client,
        base_url: String,
        api_key: String,
    }

    impl GoveeClient {
        pub fn new(api_key: impl Into<String>) -> VendorResult<Self> {
            Self::with_base_url(api_key, DEFAULT_BASE_URL)
        }

        pub fn with_base_url(api_key: impl Into<String>, base_url: &str) -> VendorResult<Self> {
            let api_key = api_key.into();
            if api_key.trim().is_empty() {
                return Err(VendorError::MissingApiKey);
            }

            let client = Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .map_err(|e| VendorError::NotReachable {
                    url: base_url.to_string(),
                    message: e.to_string(),
                })?;

            Ok(Self {
                client,
                base_url: base_url.trim_end_matches('/').to_string(),
                api_key,
            })
        }

        pub fn base_url(&self) -> &str {
            &self.base_url
        }

        async fn get(&self, path: &str) -> VendorResult<Value> {
            let url = format!("{}{}", self.base_url, path);
            let request = self.client.get(&url).header("Govee-API-Key", &self.api_key);
            self.send(&url, request).await
        }

        async fn post(&self, path: &str, body: &Value) -> VendorResult<Value> {
            let url = format!("{}{}", self.base_url, path);
            let request = self
                .client
                .post(&url)
                .header("Govee-API-Key", &self.api_key)
                .json(body);
            self.send(&url, request).await
        }

        async fn send(&self, url: &str, request: reqwest::RequestBuilder) -> VendorResult<Value> {
            let response = request
                .send()
                .await
                .map_err(|e| VendorError::NotReachable {
                    url: url.to_string(),
                    message: e.to_string(),
                })?;

            let status = response.status();
            if !status.is_success() {
                warn!("{} returned HTTP {}", url, status);
                return Err(VendorError::Http {
                    status: status.as_u16(),
                });
            }

            response
                .json::<Value>()
                .await
                .map_err(|e| VendorError::Malformed(e.to_string()))
        }

        fn request_id() -> String {
            uuid::Uuid::new_v4().to_string()
        }
    }

    #[async_trait]
    impl PlugClient for GoveeClient {
        async fn list_devices(&self) -> VendorResult<Vec<DeviceDescriptor>> {
            let body = self.get("/user/devices").await?;
            let devices = parse_devices(&body)?;
            debug!("Vendor listed {} devices", devices.len());
            Ok(devices)
        }

        async fn get_state(&self, device: &str, model: &str) -> VendorResult<PlugState> {
            let body = serde_json::json!({
                "requestId": Self::request_id(),
                "payload": { "sku": model, "device": device },
            });
            let response = self.post("/device/state", &body).await?;
            parse_power_state(&response)
        }

        async fn set_power(&self, device: &str, model: &str, on: bool) -> VendorResult<()> {
            let body = power_command(&Self::request_id(), device, model, on);
            let response = self.post("/device/control", &body).await?;
            check_envelope(&response)?;
            debug!("{} switched {}", device, if on { "on" } else { "off" });
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_requires_api_key() {
            assert!(matches!(
                GoveeClient::new("  "),
                Err(VendorError::MissingApiKey)
            ));
        }

        #[test]
        fn test_base_url_normalized() {
            let client = GoveeClient::with_base_url("key", "http://localhost:9000/").unwrap();
            assert_eq!(client.base_url(), "http://localhost:9000");
        }

        #[tokio::test]
        async fn test_unreachable_is_an_error() {
            let client = GoveeClient::with_base_url("key", "http://127.0.0.1:1").unwrap();
            assert!(matches!(
                client.list_devices().await,
                Err(VendorError::NotReachable { .. })
            ));
        }
    }
}
