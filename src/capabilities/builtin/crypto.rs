//! Cryptocurrency price lookup via the CoinGecko public API.

use async_trait::async_trait;
use serde::Deserialize;

use crate::capabilities::capability::{
    Arguments, Capability, CapabilityContext, CapabilityOutput, ParamType, ParameterSchema,
    require_str,
};
use crate::error::CapabilityError;

const COINGECKO_API: &str = "https://api.coingecko.com/api/v3";

#[derive(Debug, Deserialize)]
struct Coin {
    id: String,
    name: String,
    #[serde(default)]
    symbol: String,
}

/// Looks up the current USD price of a cryptocurrency by name or symbol.
pub struct CryptoPrice {
    client: reqwest::Client,
    base_url: String,
}

impl CryptoPrice {
    pub fn new() -> Self {
        Self::with_base_url(COINGECKO_API)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn failed(&self, reason: impl Into<String>) -> CapabilityError {
        CapabilityError::ExecutionFailed {
            name: self.name().to_string(),
            reason: reason.into(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, CapabilityError> {
        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .query(query)
            .send()
            .await
            .map_err(|e| self.failed(format!("request to {path} failed: {e}")))?;

        if !response.status().is_success() {
            return Err(self.failed(format!("{path} returned {}", response.status())));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| self.failed(format!("invalid response from {path}: {e}")))
    }
}

impl Default for CryptoPrice {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Capability for CryptoPrice {
    fn name(&self) -> &str {
        "crypto_price"
    }

    fn description(&self) -> &str {
        "Get the current price of a cryptocurrency in USD, by coin name (e.g. Bitcoin) or symbol."
    }

    fn tags(&self) -> &[&str] {
        &["money"]
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new().required("token", ParamType::String, "Name of the cryptocurrency")
    }

    async fn invoke(
        &self,
        args: Arguments,
        _ctx: &CapabilityContext,
    ) -> Result<CapabilityOutput, CapabilityError> {
        let token = require_str(self.name(), &args, "token")?.trim();
        let wanted = token.to_lowercase();

        let coins: Vec<Coin> = self.get_json("/coins/list", &[]).await?;
        let coin = coins
            .iter()
            .find(|c| c.name.to_lowercase() == wanted)
            .or_else(|| coins.iter().find(|c| c.symbol.to_lowercase() == wanted))
            .ok_or_else(|| self.failed(format!("{token} not found in the coin list")))?;

        let prices: serde_json::Value = self
            .get_json(
                "/simple/price",
                &[("ids", coin.id.as_str()), ("vs_currencies", "usd")],
            )
            .await?;

        let usd = prices
            .get(&coin.id)
            .and_then(|p| p.get("usd"))
            .and_then(|p| p.as_f64())
            .ok_or_else(|| self.failed(format!("price data for {token} is unavailable")))?;

        tracing::debug!(coin = %coin.id, usd, "Fetched crypto price");
        Ok(CapabilityOutput::Structured(serde_json::json!({
            "token": token,
            "coin_id": coin.id,
            "usd": usd,
        })))
    }
}
