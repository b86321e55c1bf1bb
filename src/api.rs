// src/api.rs
use crate::error::AppError;
use crate::models::{SearchForm, TradeForm, TradeOrder};
use crate::views;
use crate::wallet::WalletService;
use log::{error, info};
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

/// Everything a handler needs: the service and the account it acts for.
#[derive(Clone)]
pub struct AppState {
    service: Arc<WalletService>,
    username: Arc<String>,
}

impl AppState {
    pub fn new(service: Arc<WalletService>, username: String) -> Self {
        AppState {
            service,
            username: Arc::new(username),
        }
    }
}

pub fn routes(state: AppState) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    let index = warp::path!("index")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(index_handler);

    let show = warp::path!("currencies" / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(show_handler);

    let search = warp::path!("currency" / "search")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(warp::body::form())
        .and_then(search_handler);

    let buy = warp::path!("currency" / "buy")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(warp::body::form())
        .and_then(buy_handler);

    let sell = warp::path!("wallets")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(warp::body::form())
        .and_then(sell_handler);

    let wallet = warp::path!("wallets")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(wallet_handler);

    let transactions = warp::path!("transactions")
        .and(warp::get())
        .and(with_state(state))
        .and_then(transactions_handler);

    index
        .or(show)
        .or(search)
        .or(buy)
        .or(sell)
        .or(wallet)
        .or(transactions)
        .recover(handle_rejection)
}

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn reject(e: AppError) -> Rejection {
    warp::reject::custom(e)
}

async fn index_handler(state: AppState) -> Result<impl Reply, Rejection> {
    match state.service.top_currencies().await {
        Ok(currencies) => {
            info!("Listed {} currencies.", currencies.len());
            Ok(warp::reply::html(views::index(&currencies)))
        }
        Err(e) => {
            error!("Failed to list currencies: {}", e);
            Err(reject(e))
        }
    }
}

async fn show_currency(state: &AppState, symbol: &str) -> Result<impl Reply, Rejection> {
    match state.service.find_currency(symbol).await {
        Ok(currency) => Ok(warp::reply::html(views::currency(&currency))),
        Err(e) => {
            error!("Failed to find currency '{}': {}", symbol, e);
            Err(reject(e))
        }
    }
}

async fn show_handler(symbol: String, state: AppState) -> Result<impl Reply, Rejection> {
    show_currency(&state, &symbol).await
}

async fn search_handler(state: AppState, form: SearchForm) -> Result<impl Reply, Rejection> {
    let symbol = form.symbol.unwrap_or_default();
    show_currency(&state, &symbol).await
}

async fn buy_handler(state: AppState, form: TradeForm) -> Result<impl Reply, Rejection> {
    let order = TradeOrder::try_from(form).map_err(reject)?;
    let user = state
        .service
        .user_by_name(&state.username)
        .await
        .map_err(reject)?;

    match state.service.buy(&user.id, &order).await {
        Ok(outcome) => {
            if outcome.is_executed() {
                info!("Buy request settled: {}", outcome);
            } else {
                info!("Buy request declined: {}", outcome);
            }
            Ok(warp::reply::html(views::success(&outcome.to_string())))
        }
        Err(e) => {
            error!("Failed to buy {}: {}", order.symbol(), e);
            Err(reject(e))
        }
    }
}

async fn sell_handler(state: AppState, form: TradeForm) -> Result<impl Reply, Rejection> {
    let order = TradeOrder::try_from(form).map_err(reject)?;
    let user = state
        .service
        .user_by_name(&state.username)
        .await
        .map_err(reject)?;

    match state.service.sell(&user.id, &order).await {
        Ok(outcome) => {
            if outcome.is_executed() {
                info!("Sell request settled: {}", outcome);
            } else {
                info!("Sell request declined: {}", outcome);
            }
            Ok(warp::reply::html(views::success(&outcome.to_string())))
        }
        Err(e) => {
            error!("Failed to sell {}: {}", order.symbol(), e);
            Err(reject(e))
        }
    }
}

async fn wallet_handler(state: AppState) -> Result<impl Reply, Rejection> {
    let user = state
        .service
        .user_by_name(&state.username)
        .await
        .map_err(reject)?;

    match state.service.display(&user.id).await {
        Ok(portfolio) => Ok(warp::reply::html(views::portfolio(&portfolio))),
        Err(e) => {
            error!("Failed to display wallet: {}", e);
            Err(reject(e))
        }
    }
}

async fn transactions_handler(state: AppState) -> Result<impl Reply, Rejection> {
    let user = state
        .service
        .user_by_name(&state.username)
        .await
        .map_err(reject)?;

    match state.service.history(&user.id).await {
        Ok(records) => Ok(warp::reply::html(views::history(&records))),
        Err(e) => {
            error!("Failed to load transactions: {}", e);
            Err(reject(e))
        }
    }
}

/// Renders every rejection as the error view with a matching status.
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if let Some(e) = err.find::<AppError>() {
        (e.status(), e.to_string())
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "404 Not Found".to_string())
    } else if err.find::<warp::body::BodyDeserializeError>().is_some()
        || err.find::<warp::reject::UnsupportedMediaType>().is_some()
    {
        // A matched route with a bad body also carries the 405s of its siblings.
        (StatusCode::BAD_REQUEST, AppError::InvalidInput.to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            "405 Method Not Allowed".to_string(),
        )
    } else {
        error!("Unhandled rejection: {:?}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal Server Error".to_string(),
        )
    };

    Ok(warp::reply::with_status(
        warp::reply::html(views::error(&message)),
        status,
    ))
}
