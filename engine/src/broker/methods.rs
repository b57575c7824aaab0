use std::fmt;
use std::str::FromStr;

use crate::errors::WalletError;

/// The closed set of signing methods a paired application may request.
///
/// Anything outside this set is rejected at parse time; there is no
/// string-keyed dispatch behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestMethod {
    EthSign,
    PersonalSign,
    EthSignTypedData,
    EthSignTypedDataV4,
    EthSendTransaction,
    EthSignTransaction,
}

impl RequestMethod {
    pub const ALL: [RequestMethod; 6] = [
        RequestMethod::EthSign,
        RequestMethod::PersonalSign,
        RequestMethod::EthSignTypedData,
        RequestMethod::EthSignTypedDataV4,
        RequestMethod::EthSendTransaction,
        RequestMethod::EthSignTransaction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestMethod::EthSign => "eth_sign",
            RequestMethod::PersonalSign => "personal_sign",
            RequestMethod::EthSignTypedData => "eth_signTypedData",
            RequestMethod::EthSignTypedDataV4 => "eth_signTypedData_v4",
            RequestMethod::EthSendTransaction => "eth_sendTransaction",
            RequestMethod::EthSignTransaction => "eth_signTransaction",
        }
    }

    /// The method names advertised in a session grant
    pub fn allowed_names() -> Vec<String> {
        Self::ALL.iter().map(|m| m.as_str().to_string()).collect()
    }
}

impl FromStr for RequestMethod {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| WalletError::UnsupportedMethod(s.to_string()))
    }
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_all_methods() {
        for method in RequestMethod::ALL {
            assert_eq!(method.as_str().parse::<RequestMethod>().unwrap(), method);
        }
    }

    #[test]
    fn test_unknown_methods_rejected() {
        for name in ["eth_getBalance", "wallet_addEthereumChain", "", "ETH_SIGN"] {
            let err = name.parse::<RequestMethod>().unwrap_err();
            assert!(matches!(err, WalletError::UnsupportedMethod(_)));
        }
    }

    #[test]
    fn test_allowed_names_inventory() {
        let names = RequestMethod::allowed_names();
        assert_eq!(names.len(), 6);
        assert!(names.contains(&"personal_sign".to_string()));
        assert!(names.contains(&"eth_signTypedData_v4".to_string()));
    }
}
