//! Current token prices from the DefiLlama coins API

use anyhow::Result;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;

use yield_core::chain::retry;
use yield_core::{RetryPolicy, YieldError};

use crate::constants;

/// Lowercased token address to USD price
pub type PriceMap = HashMap<String, f64>;

/// DefiLlama `prices/current` response
#[derive(Debug, Deserialize)]
struct CurrentPricesResponse {
    coins: HashMap<String, CoinPrice>,
}

#[derive(Debug, Deserialize)]
struct CoinPrice {
    price: f64,
}

/// Fetch current USD prices for Ethereum mainnet tokens.
///
/// Every failed attempt (rate limiting included) is retried under `policy`.
pub async fn fetch_current_prices(
    api_base: &str,
    tokens: &[&str],
    policy: &RetryPolicy,
) -> Result<PriceMap> {
    if tokens.is_empty() {
        return Ok(PriceMap::new());
    }

    let client = reqwest::Client::new();
    let coins = tokens
        .iter()
        .map(|t| format!("ethereum:{t}"))
        .collect::<Vec<_>>()
        .join(",");
    let url = format!(
        "{}/prices/current/{}?searchWidth={}",
        api_base.trim_end_matches('/'),
        coins,
        constants::DEFILLAMA_SEARCH_WIDTH
    );

    let (client, url) = (&client, &url);
    let data = retry(policy, "DefiLlama prices", move || async move {
        let response = client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(YieldError::Rpc("DefiLlama rate limited (429)".to_string()));
        }
        if !status.is_success() {
            return Err(YieldError::Rpc(format!("DefiLlama API returned status: {status}")));
        }
        Ok::<_, YieldError>(response.json::<CurrentPricesResponse>().await?)
    })
    .await?;

    Ok(prices_from_response(data, tokens))
}

/// USD price of a single token
pub async fn fetch_price(api_base: &str, token: &str, policy: &RetryPolicy) -> Result<f64> {
    let prices = fetch_current_prices(api_base, &[token], policy).await?;
    prices
        .get(&token.to_lowercase())
        .copied()
        .ok_or_else(|| anyhow::anyhow!("DefiLlama has no price for {}", token))
}

/// Match response keys back to the requested tokens regardless of address case
fn prices_from_response(response: CurrentPricesResponse, tokens: &[&str]) -> PriceMap {
    let by_address: HashMap<String, f64> = response
        .coins
        .into_iter()
        .map(|(key, coin)| {
            let address = key.trim_start_matches("ethereum:").to_lowercase();
            (address, coin.price)
        })
        .collect();

    tokens
        .iter()
        .filter_map(|t| {
            let address = t.to_lowercase();
            by_address.get(&address).map(|p| (address, *p))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[test]
    fn test_prices_match_any_case() {
        let response: CurrentPricesResponse = serde_json::from_str(
            r#"{
                "coins": {
                    "ethereum:0xd533a949740bb3306d119cc777fa900ba034cd52": {
                        "decimals": 18,
                        "symbol": "CRV",
                        "price": 0.3112,
                        "timestamp": 1760000000,
                        "confidence": 0.99
                    }
                }
            }"#,
        )
        .unwrap();

        let prices = prices_from_response(response, &[constants::CRV_TOKEN, "0xdead"]);
        assert_eq!(prices.len(), 1);
        assert_eq!(prices[&constants::CRV_TOKEN.to_lowercase()], 0.3112);
    }

    #[test]
    fn test_empty_response() {
        let response: CurrentPricesResponse = serde_json::from_str(r#"{"coins": {}}"#).unwrap();
        assert!(prices_from_response(response, &[constants::CRV_TOKEN]).is_empty());
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(0),
        }
    }

    /// Local stand-in for the coins API that rate limits the first `limited` requests
    async fn spawn_llama(limited: u32) -> (String, Arc<AtomicU32>) {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/prices/current/{coins}",
            get(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < limited {
                        return (StatusCode::TOO_MANY_REQUESTS, "slow down").into_response();
                    }
                    Json(serde_json::json!({
                        "coins": {
                            "ethereum:0xd533a949740bb3306d119cc777fa900ba034cd52": {"price": 0.42}
                        }
                    }))
                    .into_response()
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), hits)
    }

    #[tokio::test]
    async fn test_rate_limited_fetch_is_retried() {
        let (base, hits) = spawn_llama(2).await;
        let price = fetch_price(&base, constants::CRV_TOKEN, &fast_policy(4))
            .await
            .unwrap();
        assert_eq!(price, 0.42);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_budget_comes_from_policy() {
        let (base, hits) = spawn_llama(10).await;
        let err = fetch_price(&base, constants::CRV_TOKEN, &fast_policy(2))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<YieldError>(),
            Some(YieldError::TransientReadFailure { attempts: 2, .. })
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
