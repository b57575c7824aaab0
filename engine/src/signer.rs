/// Transaction construction, signing, and submission
///
/// Builds legacy RLP transactions with EIP-155 replay protection, signs
/// them with the session's account key, and tracks the single in-flight
/// send alongside the last submission error.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::chain::{Address, Amount, Asset};
use crate::errors::{WalletError, WalletResult};
use crate::keys::{keccak256, AccountKey};
use crate::network::NetworkConfig;
use crate::rpc::{quantity_to_u128, NetworkClient};
use crate::session::WalletSession;
use crate::typed_data;
use crate::validation::InputValidator;

/// Fixed gas for a plain value transfer
const NATIVE_TRANSFER_GAS: u64 = 21_000;
/// Conservative ceiling for an ERC-20 transfer call
const TOKEN_TRANSFER_GAS: u64 = 100_000;

/// transfer(address,uint256)
const ERC20_TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

/// A legacy transaction ready for signing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: Address,
    pub value: u128,
    pub data: Vec<u8>,
    pub chain_id: u64,
}

impl Transaction {
    /// RLP payload hashed for signing: the six transaction fields followed
    /// by `(chain_id, 0, 0)` per EIP-155
    pub fn signing_payload(&self) -> Vec<u8> {
        rlp_list(&[
            rlp_uint(self.nonce as u128),
            rlp_uint(self.gas_price),
            rlp_uint(self.gas_limit as u128),
            rlp_bytes(self.to.as_bytes()),
            rlp_uint(self.value),
            rlp_bytes(&self.data),
            rlp_uint(self.chain_id as u128),
            rlp_uint(0),
            rlp_uint(0),
        ])
    }

    /// RLP encoding of the signed transaction
    pub fn raw_signed(&self, v: u64, r: &[u8], s: &[u8]) -> Vec<u8> {
        rlp_list(&[
            rlp_uint(self.nonce as u128),
            rlp_uint(self.gas_price),
            rlp_uint(self.gas_limit as u128),
            rlp_bytes(self.to.as_bytes()),
            rlp_uint(self.value),
            rlp_bytes(&self.data),
            rlp_uint(v as u128),
            rlp_bytes(trim_leading_zeros(r)),
            rlp_bytes(trim_leading_zeros(s)),
        ])
    }
}

/// Sign a transaction, returning the broadcast-ready raw bytes.
///
/// The recovery parameter is folded into `v = chain_id * 2 + 35 + rec_id`.
pub fn sign_transaction(key: &AccountKey, tx: &Transaction) -> WalletResult<Vec<u8>> {
    let digest = keccak256(&tx.signing_payload());
    let (signature, recovery_id) = key.sign_digest(&digest)?;

    let v = tx.chain_id * 2 + 35 + recovery_id.to_byte() as u64;
    let bytes = signature.to_bytes();
    Ok(tx.raw_signed(v, &bytes[..32], &bytes[32..]))
}

/// ABI-encoded calldata for `transfer(address,uint256)`
pub fn erc20_transfer_calldata(recipient: &Address, amount: u128) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + 32 + 32);
    data.extend_from_slice(&ERC20_TRANSFER_SELECTOR);
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(recipient.as_bytes());
    data.extend_from_slice(&[0u8; 16]);
    data.extend_from_slice(&amount.to_be_bytes());
    data
}

/// Drives outbound transfers for the unlocked wallet.
///
/// At most one send is in flight at a time; the most recent submission
/// failure is kept verbatim until the next send or an explicit clear.
pub struct TransactionSigner {
    session: Arc<WalletSession>,
    validator: InputValidator,
    sending: AtomicBool,
    last_error: Mutex<Option<String>>,
}

/// Clears the in-flight flag on every exit path
struct SendPermit<'a>(&'a AtomicBool);

impl Drop for SendPermit<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl TransactionSigner {
    pub fn new(session: Arc<WalletSession>) -> WalletResult<Self> {
        Ok(TransactionSigner {
            session,
            validator: InputValidator::new()?,
            sending: AtomicBool::new(false),
            last_error: Mutex::new(None),
        })
    }

    pub fn is_sending(&self) -> bool {
        self.sending.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    pub fn clear_last_error(&self) {
        *self.last_error.lock() = None;
    }

    /// Send `amount` of `asset` to `recipient` on the active network.
    ///
    /// Native assets move as plain value transfers; token assets become
    /// ERC-20 transfer calls against the asset's contract.
    pub async fn send<C: NetworkClient>(
        &self,
        client: &C,
        network: &NetworkConfig,
        recipient: &str,
        amount: &str,
        asset: &Asset,
    ) -> WalletResult<String> {
        if self
            .sending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(WalletError::ValidationError(
                "A transaction is already being sent".to_string(),
            ));
        }
        let _permit = SendPermit(&self.sending);
        *self.last_error.lock() = None;

        let result = self
            .send_inner(client, network, recipient, amount, asset)
            .await;
        if let Err(ref err) = result {
            *self.last_error.lock() = Some(err.to_string());
            log::warn!("Transaction send failed: {}", err);
        }
        result
    }

    async fn send_inner<C: NetworkClient>(
        &self,
        client: &C,
        network: &NetworkConfig,
        recipient: &str,
        amount: &str,
        asset: &Asset,
    ) -> WalletResult<String> {
        let record = self.session.record();
        if !record.has_backed_up {
            return Err(WalletError::ValidationError(
                "Backup must be verified before sending".to_string(),
            ));
        }
        if !record.is_unlocked {
            return Err(WalletError::AuthFailure);
        }
        let from = record
            .address
            .ok_or_else(|| WalletError::NotFound("No wallet exists".to_string()))?;

        self.validator.validate_address(recipient)?;
        self.validator.validate_amount(amount)?;
        let recipient = Address::from_string(recipient)?;
        let amount = Amount::from_decimal_str(amount, asset.decimals)?;
        if amount.is_zero() {
            return Err(WalletError::InvalidAmount(
                "Amount must be greater than zero".to_string(),
            ));
        }

        let nonce = client.get_transaction_count(&from).await?;
        let gas_price = client.gas_price().await?;
        let native_balance = client.get_balance(&from).await?;

        let tx = if asset.is_native() {
            let gas_cost = gas_price.saturating_mul(NATIVE_TRANSFER_GAS as u128);
            let total = amount
                .base_units()
                .checked_add(gas_cost)
                .ok_or_else(|| WalletError::InvalidAmount("Amount overflow".to_string()))?;
            if total > native_balance {
                return Err(WalletError::InsufficientFunds(format!(
                    "Balance {} is below amount plus gas {}",
                    native_balance, total
                )));
            }

            Transaction {
                nonce,
                gas_price,
                gas_limit: NATIVE_TRANSFER_GAS,
                to: recipient,
                value: amount.base_units(),
                data: Vec::new(),
                chain_id: network.chain_id,
            }
        } else {
            let contract = asset.contract_address.as_deref().ok_or_else(|| {
                WalletError::ValidationError("Token asset has no contract address".to_string())
            })?;
            let contract = Address::from_string(contract)?;

            let held = Amount::from_decimal_str(&asset.balance, asset.decimals)?;
            if amount.base_units() > held.base_units() {
                return Err(WalletError::InsufficientFunds(format!(
                    "Token balance {} is below requested {}",
                    asset.balance, amount
                )));
            }
            let gas_cost = gas_price.saturating_mul(TOKEN_TRANSFER_GAS as u128);
            if gas_cost > native_balance {
                return Err(WalletError::InsufficientFunds(
                    "Insufficient native balance for gas".to_string(),
                ));
            }

            Transaction {
                nonce,
                gas_price,
                gas_limit: TOKEN_TRANSFER_GAS,
                to: contract,
                value: 0,
                data: erc20_transfer_calldata(&recipient, amount.base_units()),
                chain_id: network.chain_id,
            }
        };

        let raw = self.session.with_phrase(|phrase| {
            let key = AccountKey::from_phrase(phrase)?;
            sign_transaction(&key, &tx)
        })?;

        let hash = client.send_raw_transaction(&raw).await?;
        log::info!("Transaction submitted: {}", hash);

        // Resolve only once the transaction is actually included; a reverted
        // or never-mined transaction surfaces here instead of succeeding
        let block = client.await_confirmation(&hash).await?;
        log::info!("Transaction {} confirmed in block {}", hash, block);
        Ok(hash)
    }

    /// EIP-191 personal_sign: accepts a 0x-hex or plain UTF-8 payload
    pub fn sign_personal(&self, message: &str) -> WalletResult<String> {
        let bytes = decode_message_param(message);
        let signature = self.session.with_phrase(|phrase| {
            let key = AccountKey::from_phrase(phrase)?;
            key.sign_personal_message(&bytes)
        })?;
        Ok(format!("0x{}", hex::encode(signature)))
    }

    /// eth_signTypedData over the dApp-supplied JSON envelope
    pub fn sign_typed(&self, typed: &Value) -> WalletResult<String> {
        let digest = typed_data::hash_typed_data(typed)?;
        let signature = self.session.with_phrase(|phrase| {
            let key = AccountKey::from_phrase(phrase)?;
            key.sign_digest_compact(&digest)
        })?;
        Ok(format!("0x{}", hex::encode(signature)))
    }

    /// Sign a dApp transaction request without broadcasting it
    pub async fn sign_request_transaction<C: NetworkClient>(
        &self,
        client: &C,
        chain_id: u64,
        params: &Value,
    ) -> WalletResult<Vec<u8>> {
        let tx = self.request_to_transaction(client, chain_id, params).await?;
        self.session.with_phrase(|phrase| {
            let key = AccountKey::from_phrase(phrase)?;
            sign_transaction(&key, &tx)
        })
    }

    /// Sign and broadcast a dApp transaction request, returning the hash
    pub async fn send_request_transaction<C: NetworkClient>(
        &self,
        client: &C,
        chain_id: u64,
        params: &Value,
    ) -> WalletResult<String> {
        let raw = self.sign_request_transaction(client, chain_id, params).await?;
        client.send_raw_transaction(&raw).await
    }

    /// Build a transaction from eth_sendTransaction-style request params,
    /// filling nonce and gas price from the network when absent
    async fn request_to_transaction<C: NetworkClient>(
        &self,
        client: &C,
        chain_id: u64,
        params: &Value,
    ) -> WalletResult<Transaction> {
        let record = self.session.record();
        let from = record
            .address
            .ok_or_else(|| WalletError::NotFound("No wallet exists".to_string()))?;

        let to = params
            .get("to")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                WalletError::ValidationError("Transaction request missing 'to'".to_string())
            })?;
        self.validator.validate_address(to)?;
        let to = Address::from_string(to)?;

        let value = optional_quantity(params, "value")?.unwrap_or(0);
        let data = match params.get("data").and_then(Value::as_str) {
            Some(data) => hex::decode(data.trim_start_matches("0x")).map_err(|_| {
                WalletError::ValidationError("Non-hex transaction data".to_string())
            })?,
            None => Vec::new(),
        };

        let gas_limit = match optional_quantity(params, "gas")? {
            Some(gas) => gas as u64,
            None if data.is_empty() => NATIVE_TRANSFER_GAS,
            None => TOKEN_TRANSFER_GAS,
        };
        let gas_price = match optional_quantity(params, "gasPrice")? {
            Some(price) => price,
            None => client.gas_price().await?,
        };
        let nonce = match optional_quantity(params, "nonce")? {
            Some(nonce) => nonce as u64,
            None => client.get_transaction_count(&from).await?,
        };

        Ok(Transaction {
            nonce,
            gas_price,
            gas_limit,
            to,
            value,
            data,
            chain_id,
        })
    }
}

fn optional_quantity(params: &Value, key: &str) -> WalletResult<Option<u128>> {
    match params.get(key).and_then(Value::as_str) {
        Some(quantity) => Ok(Some(quantity_to_u128(quantity)?)),
        None => Ok(None),
    }
}

fn decode_message_param(message: &str) -> Vec<u8> {
    if let Some(stripped) = message.strip_prefix("0x") {
        if let Ok(bytes) = hex::decode(stripped) {
            return bytes;
        }
    }
    message.as_bytes().to_vec()
}

fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

// Minimal RLP encoding, enough for legacy transactions

fn rlp_bytes(payload: &[u8]) -> Vec<u8> {
    if payload.len() == 1 && payload[0] < 0x80 {
        return payload.to_vec();
    }
    let mut out = rlp_length_prefix(payload.len(), 0x80);
    out.extend_from_slice(payload);
    out
}

fn rlp_uint(value: u128) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    rlp_bytes(trim_leading_zeros(&bytes))
}

fn rlp_list(items: &[Vec<u8>]) -> Vec<u8> {
    let payload_len: usize = items.iter().map(Vec::len).sum();
    let mut out = rlp_length_prefix(payload_len, 0xC0);
    for item in items {
        out.extend_from_slice(item);
    }
    out
}

fn rlp_length_prefix(len: usize, offset: u8) -> Vec<u8> {
    if len <= 55 {
        return vec![offset + len as u8];
    }
    let len_bytes = len.to_be_bytes();
    let trimmed = trim_leading_zeros(&len_bytes);
    let mut out = vec![offset + 55 + trimmed.len() as u8];
    out.extend_from_slice(trimmed);
    out
}
