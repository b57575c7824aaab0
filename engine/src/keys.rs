/// Key derivation and signing primitives
///
/// Derives the wallet's account key from a BIP-39 phrase through the
/// standard EVM derivation path and produces recoverable secp256k1
/// signatures over Keccak-256 digests.
use crate::chain::Address;
use crate::errors::{WalletError, WalletResult};
use bip32::{DerivationPath, XPrv};
use k256::ecdsa::{RecoveryId, Signature, SigningKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use sha3::{Digest, Keccak256};
use zeroize::Zeroize;

/// Account derivation path (first external account)
const DERIVATION_PATH: &str = "m/44'/60'/0'/0/0";

/// Generate a BIP-39 phrase with the given word count (12 or 24)
pub fn generate_phrase(word_count: u32) -> WalletResult<String> {
    use bip39::Mnemonic;
    use rand::{rngs::OsRng, RngCore};

    let entropy_bits = match word_count {
        12 => 128,
        24 => 256,
        _ => {
            return Err(WalletError::ValidationError(
                "Phrase must be 12 or 24 words".to_string(),
            ))
        }
    };

    let mut entropy = vec![0u8; entropy_bits / 8];
    let mut rng = OsRng;
    rng.try_fill_bytes(&mut entropy)
        .map_err(|e| WalletError::CryptoError(format!("Failed to generate entropy: {}", e)))?;

    let mnemonic = Mnemonic::from_entropy(&entropy)
        .map_err(|e| WalletError::CryptoError(format!("Failed to create mnemonic: {}", e)))?;
    entropy.zeroize();

    Ok(mnemonic.to_string())
}

/// Validate a BIP-39 phrase: word count and checksum
pub fn validate_phrase(phrase: &str) -> WalletResult<()> {
    use bip39::{Language, Mnemonic};

    let word_count = phrase.split_whitespace().count();
    if word_count != 12 && word_count != 24 {
        return Err(WalletError::ValidationError(
            "Phrase must be 12 or 24 words".to_string(),
        ));
    }

    Mnemonic::parse_in_normalized(Language::English, phrase)
        .map_err(|e| WalletError::ValidationError(format!("Invalid mnemonic: {}", e)))?;

    Ok(())
}

/// Keccak-256 convenience wrapper
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut output = [0u8; 32];
    output.copy_from_slice(&Keccak256::digest(data));
    output
}

/// The signing key for the wallet's single account
///
/// Derived transiently from the unlocked phrase for the duration of a
/// signing call; never stored.
pub struct AccountKey {
    signing_key: SigningKey,
    address: Address,
}

impl AccountKey {
    /// Derive the account key from a validated phrase
    pub fn from_phrase(phrase: &str) -> WalletResult<Self> {
        use bip39::{Language, Mnemonic};

        let mnemonic = Mnemonic::parse_in_normalized(Language::English, phrase)
            .map_err(|e| WalletError::CryptoError(format!("Invalid mnemonic: {}", e)))?;

        let mut seed = mnemonic.to_seed("");
        let path: DerivationPath = DERIVATION_PATH
            .parse()
            .map_err(|e| WalletError::CryptoError(format!("Invalid derivation path: {}", e)))?;
        let derived = XPrv::derive_from_path(&seed, &path)
            .map_err(|e| WalletError::InvalidKey(format!("Key derivation failed: {}", e)));
        seed.zeroize();

        let signing_key = derived?.private_key().clone();
        let address = address_for(&signing_key)?;

        Ok(AccountKey {
            signing_key,
            address,
        })
    }

    /// The account address (Keccak-256 of the uncompressed public key)
    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign a 32-byte digest, returning the signature and recovery id
    pub fn sign_digest(&self, digest: &[u8; 32]) -> WalletResult<(Signature, RecoveryId)> {
        self.signing_key
            .sign_prehash_recoverable(digest)
            .map_err(|e| WalletError::SignatureError(format!("Signing failed: {}", e)))
    }

    /// Sign a 32-byte digest into the 65-byte r‖s‖v wire form (v = 27 or 28)
    pub fn sign_digest_compact(&self, digest: &[u8; 32]) -> WalletResult<Vec<u8>> {
        let (signature, recovery_id) = self.sign_digest(digest)?;

        let mut out = Vec::with_capacity(65);
        out.extend_from_slice(&signature.to_bytes());
        out.push(27 + recovery_id.to_byte());
        Ok(out)
    }

    /// Sign a message with the EIP-191 personal-message prefix
    pub fn sign_personal_message(&self, message: &[u8]) -> WalletResult<Vec<u8>> {
        let digest = personal_message_digest(message);
        self.sign_digest_compact(&digest)
    }
}

impl std::fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountKey")
            .field("address", &self.address)
            .field("signing_key", &"<redacted>")
            .finish()
    }
}

/// EIP-191 digest: keccak256("\x19Ethereum Signed Message:\n{len}" ‖ message)
pub fn personal_message_digest(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(format!("\x19Ethereum Signed Message:\n{}", message.len()).as_bytes());
    hasher.update(message);

    let mut output = [0u8; 32];
    output.copy_from_slice(&hasher.finalize());
    output
}

fn address_for(signing_key: &SigningKey) -> WalletResult<Address> {
    let encoded = signing_key.verifying_key().to_encoded_point(false);
    let bytes = encoded.as_bytes();
    if bytes.len() != 65 {
        return Err(WalletError::InvalidKey(
            "Unexpected public key encoding".to_string(),
        ));
    }

    // Skip the 0x04 uncompressed-point prefix, keep the last 20 hash bytes
    let hash = keccak256(&bytes[1..]);
    Address::from_bytes(&hash[12..])
}
