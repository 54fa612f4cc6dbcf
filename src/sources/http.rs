//! A generic JSON-over-HTTP price source. Concrete exchange connectors
//! are out of scope; this adapter is parameterized by a symbol mapping
//! and a pair of JSON pointers so it can front any REST endpoint that
//! returns a price (and optionally a volume) as a JSON number.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;

use crate::error::SourceError;
use crate::model::{Observation, Pair};

use super::PriceSource;

pub struct HttpSource {
    name: String,
    client: Client,
    base_url: String,
    symbol_map: HashMap<Pair, String>,
    price_pointer: String,
    volume_pointer: Option<String>,
}

impl HttpSource {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        symbol_map: HashMap<Pair, String>,
        price_pointer: impl Into<String>,
        volume_pointer: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: base_url.into(),
            symbol_map,
            price_pointer: price_pointer.into(),
            volume_pointer,
        }
    }
}

#[async_trait]
impl PriceSource for HttpSource {
    async fn fetch(&self, pair: &Pair) -> Result<Observation, SourceError> {
        let symbol = self
            .symbol_map
            .get(pair)
            .ok_or_else(|| SourceError::Unsupported(pair.clone()))?;

        let url = format!("{}/{symbol}", self.base_url.trim_end_matches('/'));
        let response = self.client.get(&url).send().await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SourceError::RateLimited(format!("{} rate limited", self.name)));
        }
        let response = response
            .error_for_status()
            .map_err(|e| SourceError::NetworkError(e.to_string()))?;

        let body: serde_json::Value = response.json().await?;

        let price = body
            .pointer(&self.price_pointer)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| SourceError::ParseError(format!("missing price at {}", self.price_pointer)))?;

        let volume = self
            .volume_pointer
            .as_deref()
            .and_then(|pointer| body.pointer(pointer))
            .and_then(|v| v.as_f64());

        let price = Decimal::try_from(price)
            .map_err(|e| SourceError::ParseError(format!("price out of range: {e}")))?;
        let volume = volume.and_then(|v| Decimal::try_from(v).ok());

        Ok(Observation::new(price, volume, self.name.clone(), 1.0))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
