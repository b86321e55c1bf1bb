// src/market.rs
use crate::error::MarketError;
use crate::models::{normalize_symbol, Currency};
use async_trait::async_trait;
use log::{debug, error, warn};
use reqwest::{Client, RequestBuilder, Response};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;

/// Source of live currency quotes.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// The top currencies by market cap, priced in USD.
    async fn fetch_top(&self) -> Result<Vec<Currency>, MarketError>;

    async fn find_by_symbol(&self, symbol: &str) -> Result<Currency, MarketError>;
}

/// Symbol -> price for the top currencies. Empty when the provider is unreachable,
/// so every symbol reads as unpriced.
pub async fn current_prices(market: &dyn MarketData) -> HashMap<String, Decimal> {
    match market.fetch_top().await {
        Ok(currencies) => currencies.into_iter().map(|c| (c.symbol, c.price)).collect(),
        Err(e) => {
            warn!("Price lookup failed, continuing without prices: {}", e);
            HashMap::new()
        }
    }
}

#[derive(Deserialize)]
struct MarketEntry {
    symbol: String,
    name: String,
    current_price: Option<f64>,
}

#[derive(Deserialize)]
struct CoinListEntry {
    id: String,
    symbol: String,
}

#[derive(Deserialize)]
struct CoinDetail {
    symbol: String,
    name: String,
    market_data: CoinMarketData,
}

#[derive(Deserialize)]
struct CoinMarketData {
    current_price: HashMap<String, f64>,
}

pub struct CoinGeckoClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    top_n: u32,
}

impl CoinGeckoClient {
    pub fn new(client: Client, base_url: &str, api_key: Option<String>, top_n: u32) -> Self {
        let base_url = format!("{}/", base_url.trim_end_matches('/'));
        CoinGeckoClient {
            client,
            base_url,
            api_key,
            top_n,
        }
    }

    fn get(&self, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);
        let request = self
            .client
            .get(url)
            .header("accept", "application/json");
        match &self.api_key {
            Some(key) => request.header("x-cg-demo-api-key", key),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, MarketError> {
        let response = request.send().await.map_err(|e| {
            error!("HTTP request failed: {}", e);
            MarketError::from(e)
        })?;
        if !response.status().is_success() {
            error!(
                "Failed to fetch data from provider: HTTP {}",
                response.status()
            );
            return Err(MarketError::UpstreamRequestFailed {
                message: format!("HTTP {}", response.status()),
                status: Some(response.status().as_u16()),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl MarketData for CoinGeckoClient {
    async fn fetch_top(&self) -> Result<Vec<Currency>, MarketError> {
        let per_page = self.top_n.to_string();
        let request = self
            .get("coins/markets")
            .query(&[("vs_currency", "USD"), ("per_page", per_page.as_str())]);
        let entries: Vec<MarketEntry> = self.send(request).await?.json().await?;
        Ok(entries.into_iter().filter_map(market_entry_to_currency).collect())
    }

    async fn find_by_symbol(&self, symbol: &str) -> Result<Currency, MarketError> {
        let wanted =
            normalize_symbol(symbol).ok_or_else(|| MarketError::InvalidSymbol(symbol.to_string()))?;

        let coins: Vec<CoinListEntry> = self.send(self.get("coins/list")).await?.json().await?;
        let id = find_coin_id(&coins, &wanted)
            .ok_or_else(|| MarketError::CurrencyNotFound(wanted.clone()))?;

        let detail: CoinDetail = self
            .send(self.get(&format!("coins/{}", id)))
            .await?
            .json()
            .await?;
        detail_to_currency(detail)
    }
}

fn market_entry_to_currency(entry: MarketEntry) -> Option<Currency> {
    let price = entry.current_price.and_then(Decimal::from_f64);
    match price {
        Some(price) => Some(Currency {
            symbol: entry.symbol.to_uppercase(),
            name: entry.name,
            price,
        }),
        None => {
            debug!("Skipping {} without a usable price", entry.symbol);
            None
        }
    }
}

fn find_coin_id<'a>(coins: &'a [CoinListEntry], symbol: &str) -> Option<&'a str> {
    let lower = symbol.to_lowercase();
    coins
        .iter()
        .find(|coin| coin.symbol == lower)
        .map(|coin| coin.id.as_str())
}

fn detail_to_currency(detail: CoinDetail) -> Result<Currency, MarketError> {
    let price = detail
        .market_data
        .current_price
        .get("usd")
        .copied()
        .and_then(Decimal::from_f64)
        .ok_or_else(|| MarketError::upstream(format!("no USD price for {}", detail.symbol)))?;
    Ok(Currency {
        symbol: detail.symbol.to_uppercase(),
        name: detail.name,
        price,
    })
}
