// src/main.rs
mod api;
mod config;
mod db;
mod error;
mod ledger;
mod market;
#[cfg(test)]
mod memory_store;
mod models;
mod views;
mod wallet;

use crate::api::AppState;
use crate::config::Config;
use crate::db::{ScyllaStore, Store};
use crate::market::CoinGeckoClient;
use crate::wallet::WalletService;
use env_logger::Builder;
use log::{error, info, LevelFilter};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    let config = Config::from_env();
    Builder::new()
        .filter_level(
            config
                .as_ref()
                .map(|c| c.log_level)
                .unwrap_or(LevelFilter::Info),
        )
        .format_timestamp_secs()
        .parse_default_env()
        .init();
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return;
        }
    };

    // Initialize database connection
    let store: Arc<dyn Store> =
        match ScyllaStore::init(&config.scylla_node, &config.keyspace).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!("Failed to initialize database: {}", e);
                return;
            }
        };
    info!("Connected to database...");

    let client = match Client::builder().timeout(Duration::from_secs(10)).build() {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build HTTP client: {}", e);
            return;
        }
    };
    let market = Arc::new(CoinGeckoClient::new(
        client,
        &config.market_url,
        config.market_api_key.clone(),
        config.market_top_n,
    ));
    let service = Arc::new(WalletService::new(market, store));

    let users = service.users();
    let prepared = if config.reset_user {
        users
            .reset(&config.username, &config.password, config.opening_balance)
            .await
    } else {
        users
            .ensure(&config.username, &config.password, config.opening_balance)
            .await
    };
    match prepared {
        Ok(user) => info!(
            "Trading as {} with a balance of {}",
            user.username, user.balance
        ),
        Err(e) => {
            error!("Failed to prepare user {}: {}", config.username, e);
            return;
        }
    }

    info!("Starting the crypto wallet application...");
    let api = api::routes(AppState::new(service, config.username.clone()));

    info!("Server running on http://{}", config.bind_addr);
    warp::serve(api).run(config.bind_addr).await;
}
