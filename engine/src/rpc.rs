/// JSON-RPC client for Ethereum-compatible nodes
///
/// Covers the eth_* methods the signer needs plus the provider extensions
/// (alchemy_*) backing token balances, token metadata, and transfer history.
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::DateTime;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::chain::{Address, TransactionRecord};
use crate::errors::{WalletError, WalletResult};

/// How often a pending receipt is re-polled
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(4);
/// Give up waiting for a confirmation after this many polls
const RECEIPT_POLL_LIMIT: u32 = 30;

/// An ERC-20 balance as reported by the provider, in raw base units
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBalance {
    pub contract_address: String,
    pub balance: u128,
}

/// ERC-20 descriptor fields fetched per contract
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenMetadata {
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub decimals: Option<u8>,
}

/// Read/submit access to the active network.
///
/// The engine is generic over this so tests can run against an in-memory
/// fake instead of a live endpoint.
#[allow(async_fn_in_trait)]
pub trait NetworkClient {
    async fn get_balance(&self, address: &Address) -> WalletResult<u128>;
    async fn get_transaction_count(&self, address: &Address) -> WalletResult<u64>;
    async fn gas_price(&self) -> WalletResult<u128>;
    /// Submit a signed raw transaction, returning the transaction hash
    async fn send_raw_transaction(&self, raw: &[u8]) -> WalletResult<String>;
    /// Execute a read-only contract call, returning the raw return data
    async fn call(&self, to: &Address, data: &[u8]) -> WalletResult<Vec<u8>>;
    /// Poll until the transaction is mined, returning its block number
    async fn await_confirmation(&self, tx_hash: &str) -> WalletResult<u64>;
    async fn get_token_balances(&self, address: &Address) -> WalletResult<Vec<TokenBalance>>;
    async fn get_token_metadata(&self, contract: &str) -> WalletResult<TokenMetadata>;
    async fn get_transaction_history(
        &self,
        address: &Address,
        limit: usize,
    ) -> WalletResult<Vec<TransactionRecord>>;
}

/// HTTP JSON-RPC client
pub struct JsonRpcClient {
    client: Client,
    endpoint: String,
    next_id: AtomicU64,
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<T: Serialize> {
    jsonrpc: String,
    method: String,
    params: T,
    id: u64,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)] // fields are populated via serde; not all are read by all call sites
struct JsonRpcResponse<T> {
    jsonrpc: String,
    result: Option<T>,
    error: Option<JsonRpcError>,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

impl JsonRpcClient {
    pub fn new(endpoint: String) -> WalletResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                WalletError::NetworkError(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(JsonRpcClient {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn rpc_call<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> WalletResult<T> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    log::warn!("{} timed out against {}", method, self.endpoint);
                    WalletError::ConnectionTimeout
                } else {
                    WalletError::NetworkError(format!("HTTP request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            return Err(WalletError::NetworkError(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        let rpc_response: JsonRpcResponse<T> = response.json().await.map_err(|e| {
            WalletError::InvalidResponse(format!("Failed to parse response: {}", e))
        })?;

        if let Some(error) = rpc_response.error {
            return Err(WalletError::NetworkRejection(format!(
                "RPC error {}: {}",
                error.code, error.message
            )));
        }

        rpc_response
            .result
            .ok_or_else(|| WalletError::InvalidResponse("No result in RPC response".to_string()))
    }

    async fn asset_transfers(
        &self,
        address: &Address,
        incoming: bool,
        limit: usize,
    ) -> WalletResult<Vec<TransactionRecord>> {
        let direction_key = if incoming { "toAddress" } else { "fromAddress" };
        let params = serde_json::json!([{
            "fromBlock": "0x0",
            direction_key: address.to_hex(),
            "category": ["external", "erc20"],
            "withMetadata": true,
            "order": "desc",
            "maxCount": format!("0x{:x}", limit),
        }]);

        let result: serde_json::Value = self.rpc_call("alchemy_getAssetTransfers", params).await?;
        let transfers = result
            .get("transfers")
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                WalletError::InvalidResponse("Malformed asset transfer response".to_string())
            })?;

        let mut records = Vec::with_capacity(transfers.len());
        for transfer in transfers {
            records.push(parse_transfer(transfer)?);
        }
        Ok(records)
    }
}

impl NetworkClient for JsonRpcClient {
    async fn get_balance(&self, address: &Address) -> WalletResult<u128> {
        let params = serde_json::json!([address.to_hex(), "latest"]);
        let quantity: String = self.rpc_call("eth_getBalance", params).await?;
        quantity_to_u128(&quantity)
    }

    async fn get_transaction_count(&self, address: &Address) -> WalletResult<u64> {
        // "pending" so queued transactions are counted against the nonce
        let params = serde_json::json!([address.to_hex(), "pending"]);
        let quantity: String = self.rpc_call("eth_getTransactionCount", params).await?;
        Ok(quantity_to_u128(&quantity)? as u64)
    }

    async fn gas_price(&self) -> WalletResult<u128> {
        let quantity: String = self
            .rpc_call("eth_gasPrice", serde_json::json!([]))
            .await?;
        quantity_to_u128(&quantity)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> WalletResult<String> {
        let params = serde_json::json!([format!("0x{}", hex::encode(raw))]);
        let tx_hash: String = self.rpc_call("eth_sendRawTransaction", params).await?;
        Ok(tx_hash)
    }

    async fn call(&self, to: &Address, data: &[u8]) -> WalletResult<Vec<u8>> {
        let params = serde_json::json!([
            { "to": to.to_hex(), "data": format!("0x{}", hex::encode(data)) },
            "latest"
        ]);
        let output: String = self.rpc_call("eth_call", params).await?;
        hex::decode(output.trim_start_matches("0x"))
            .map_err(|_| WalletError::InvalidResponse("Non-hex eth_call output".to_string()))
    }

    async fn await_confirmation(&self, tx_hash: &str) -> WalletResult<u64> {
        for _ in 0..RECEIPT_POLL_LIMIT {
            let params = serde_json::json!([tx_hash]);
            let receipt: Option<serde_json::Value> =
                self.rpc_call("eth_getTransactionReceipt", params).await?;

            if let Some(receipt) = receipt {
                let status = receipt.get("status").and_then(|v| v.as_str());
                if status == Some("0x0") {
                    return Err(WalletError::NetworkRejection(format!(
                        "Transaction {} reverted",
                        tx_hash
                    )));
                }
                let block = receipt
                    .get("blockNumber")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        WalletError::InvalidResponse("Receipt missing block number".to_string())
                    })?;
                return Ok(quantity_to_u128(block)? as u64);
            }

            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }

        log::warn!("Transaction {} not confirmed in time", tx_hash);
        Err(WalletError::ConnectionTimeout)
    }

    async fn get_token_balances(&self, address: &Address) -> WalletResult<Vec<TokenBalance>> {
        let params = serde_json::json!([address.to_hex(), "erc20"]);
        let result: serde_json::Value = self.rpc_call("alchemy_getTokenBalances", params).await?;

        let entries = result
            .get("tokenBalances")
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                WalletError::InvalidResponse("Malformed token balance response".to_string())
            })?;

        let mut balances = Vec::new();
        for entry in entries {
            let contract = entry
                .get("contractAddress")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    WalletError::InvalidResponse("Token balance missing contract".to_string())
                })?;
            // Providers report empty holdings as 0x0 or null
            let Some(raw) = entry.get("tokenBalance").and_then(|v| v.as_str()) else {
                continue;
            };
            let balance = quantity_to_u128(raw)?;
            if balance == 0 {
                continue;
            }
            balances.push(TokenBalance {
                contract_address: contract.to_lowercase(),
                balance,
            });
        }
        Ok(balances)
    }

    async fn get_token_metadata(&self, contract: &str) -> WalletResult<TokenMetadata> {
        let params = serde_json::json!([contract]);
        self.rpc_call("alchemy_getTokenMetadata", params).await
    }

    async fn get_transaction_history(
        &self,
        address: &Address,
        limit: usize,
    ) -> WalletResult<Vec<TransactionRecord>> {
        let outgoing = self.asset_transfers(address, false, limit).await?;
        let incoming = self.asset_transfers(address, true, limit).await?;

        let mut merged: Vec<TransactionRecord> = outgoing.into_iter().chain(incoming).collect();
        merged.sort_by(|a, b| {
            b.block_number
                .cmp(&a.block_number)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
        });
        merged.dedup_by(|a, b| a.hash == b.hash);
        merged.truncate(limit);
        Ok(merged)
    }
}

fn parse_transfer(transfer: &serde_json::Value) -> WalletResult<TransactionRecord> {
    let field = |key: &str| -> WalletResult<String> {
        transfer
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                WalletError::InvalidResponse(format!("Transfer missing field: {}", key))
            })
    };

    let raw_value = transfer
        .get("rawContract")
        .and_then(|c| c.get("value"))
        .and_then(|v| v.as_str())
        .map(quantity_to_u128)
        .transpose()?
        .unwrap_or(0);

    let block_number = transfer
        .get("blockNum")
        .and_then(|v| v.as_str())
        .map(quantity_to_u128)
        .transpose()?
        .map(|n| n as u64);

    let timestamp = transfer
        .get("metadata")
        .and_then(|m| m.get("blockTimestamp"))
        .and_then(|v| v.as_str())
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|dt| dt.timestamp() as u64)
        .unwrap_or(0);

    Ok(TransactionRecord {
        hash: field("hash")?,
        from: field("from")?,
        to: field("to")?,
        value: raw_value.to_string(),
        timestamp,
        block_number,
    })
}

/// Parse a 0x-prefixed hex quantity
pub fn quantity_to_u128(quantity: &str) -> WalletResult<u128> {
    let stripped = quantity
        .strip_prefix("0x")
        .ok_or_else(|| WalletError::InvalidResponse(format!("Invalid quantity: {}", quantity)))?;
    if stripped.is_empty() {
        return Err(WalletError::InvalidResponse(
            "Empty hex quantity".to_string(),
        ));
    }
    u128::from_str_radix(stripped, 16)
        .map_err(|_| WalletError::InvalidResponse(format!("Invalid quantity: {}", quantity)))
}
