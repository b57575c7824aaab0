/// Presentation-boundary DTOs
///
/// Everything crossing out of the engine is serialized with camelCase
/// wire names; hosts never see internal types directly.
use serde::{Deserialize, Serialize};

use crate::session::WalletRecord;

/// Observable wallet state for the host UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletStatus {
    /// EIP-55 checksummed address, absent until a wallet exists
    pub address: Option<String>,
    pub is_created: bool,
    pub is_unlocked: bool,
    pub needs_backup: bool,
    pub has_backed_up: bool,
}

impl From<WalletRecord> for WalletStatus {
    fn from(record: WalletRecord) -> Self {
        WalletStatus {
            address: record.address.map(|a| a.to_checksum_string()),
            is_created: record.is_created,
            is_unlocked: record.is_unlocked,
            needs_backup: record.needs_backup,
            has_backed_up: record.has_backed_up,
        }
    }
}

/// Word positions (zero-based, ascending) the user must confirm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupChallenge {
    pub positions: Vec<usize>,
}

/// One answered challenge position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupAnswer {
    pub position: usize,
    pub word: String,
}

/// Native balance of the active network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSnapshot {
    pub symbol: String,
    /// Decimal display string, full precision
    pub balance: String,
    pub network: String,
}

/// A transfer as requested by the host UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub recipient: String,
    pub amount: String,
    /// Contract address of the token to move; absent for the native asset
    pub contract_address: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Address;

    #[test]
    fn test_status_wire_shape() {
        let record = WalletRecord {
            address: Some(
                Address::from_string("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap(),
            ),
            is_created: true,
            is_unlocked: false,
            needs_backup: true,
            has_backed_up: false,
        };
        let status = WalletStatus::from(record);
        let value = serde_json::to_value(&status).unwrap();

        assert_eq!(
            value["address"],
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"
        );
        assert_eq!(value["isCreated"], true);
        assert_eq!(value["needsBackup"], true);
        assert_eq!(value["hasBackedUp"], false);
    }

    #[test]
    fn test_status_without_wallet() {
        let status = WalletStatus::from(WalletRecord::default());
        let value = serde_json::to_value(&status).unwrap();
        assert!(value["address"].is_null());
        assert_eq!(value["isUnlocked"], false);
    }

    #[test]
    fn test_transfer_request_parsing() {
        let request: TransferRequest = serde_json::from_str(
            r#"{"recipient":"0x1111111111111111111111111111111111111111","amount":"1.5","contractAddress":null}"#,
        )
        .unwrap();
        assert_eq!(request.amount, "1.5");
        assert!(request.contract_address.is_none());
    }
}
