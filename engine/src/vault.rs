use std::num::NonZeroU32;

use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey};
use ring::pbkdf2;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::errors::{WalletError, WalletResult};

/// Latest payload version; anything older is migrated forward on unlock.
pub const LATEST_VERSION: u8 = 2;

const KDF_ARGON2ID: &str = "argon2id";
const PBKDF2_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;
const IV_LEN: usize = 12;
const KEY_LEN: usize = 32;
const ARGON_M_COST_KIB: u32 = 65_536;
const ARGON_T_COST: u32 = 3;
const ARGON_P_COST: u32 = 2;

/// An encrypted secret phrase at rest.
///
/// V1 payloads derive the key with PBKDF2-HMAC-SHA256 and rely on the
/// AES-GCM tag alone. V2 payloads derive with Argon2id and additionally
/// carry a content digest over plaintext+salt so silent corruption is
/// caught even after a successful authenticated decryption. A payload is
/// immutable once written; migration replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedPayload {
    pub cipher_base64: String,
    pub iv_base64: String,
    pub salt_base64: String,
    pub version: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kdf: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
}

impl EncryptedPayload {
    fn uses_argon2id(&self) -> bool {
        self.kdf.as_deref() == Some(KDF_ARGON2ID) || self.version >= 2
    }
}

/// Encrypt a phrase under the latest scheme (V2: Argon2id + AES-256-GCM).
pub fn encrypt(plaintext: &str, password: &SecretString) -> WalletResult<EncryptedPayload> {
    let mut rng = OsRng;
    let mut salt = [0u8; SALT_LEN];
    rng.fill_bytes(&mut salt);
    let mut iv = [0u8; IV_LEN];
    rng.fill_bytes(&mut iv);

    let key = derive_key_argon2id(password, &salt)?;
    let cipher = seal(&key, iv, plaintext.as_bytes())?;
    let integrity = integrity_digest(plaintext.as_bytes(), &salt);

    Ok(EncryptedPayload {
        cipher_base64: BASE64.encode(cipher),
        iv_base64: BASE64.encode(iv),
        salt_base64: BASE64.encode(salt),
        version: LATEST_VERSION,
        kdf: Some(KDF_ARGON2ID.to_string()),
        integrity: Some(integrity),
    })
}

/// Encrypt under the legacy V1 scheme (PBKDF2 + AES-256-GCM, no digest).
///
/// New wallets never write V1; this exists so migration tooling and tests
/// can produce payloads in the legacy format.
pub fn encrypt_v1(plaintext: &str, password: &SecretString) -> WalletResult<EncryptedPayload> {
    let mut rng = OsRng;
    let mut salt = [0u8; SALT_LEN];
    rng.fill_bytes(&mut salt);
    let mut iv = [0u8; IV_LEN];
    rng.fill_bytes(&mut iv);

    let key = derive_key_pbkdf2(password, &salt);
    let cipher = seal(&key, iv, plaintext.as_bytes())?;

    Ok(EncryptedPayload {
        cipher_base64: BASE64.encode(cipher),
        iv_base64: BASE64.encode(iv),
        salt_base64: BASE64.encode(salt),
        version: 1,
        kdf: None,
        integrity: None,
    })
}

/// Decrypt a payload of either version.
///
/// A wrong password surfaces as `AuthFailure` with one fixed message for
/// both schemes; the caller cannot tell a bad credential from corrupt
/// ciphertext. The V2 digest check runs only after the AEAD open
/// succeeded, so `IntegrityError` cannot be triggered by a wrong password.
pub fn decrypt(
    payload: &EncryptedPayload,
    password: &SecretString,
) -> WalletResult<Zeroizing<String>> {
    let salt = decode_field(&payload.salt_base64, "salt")?;
    let iv_bytes = decode_field(&payload.iv_base64, "iv")?;
    let cipher = decode_field(&payload.cipher_base64, "cipher")?;

    if iv_bytes.len() != IV_LEN {
        return Err(WalletError::ValidationError(
            "Malformed payload iv".to_string(),
        ));
    }
    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(&iv_bytes);

    let key = if payload.uses_argon2id() {
        derive_key_argon2id(password, &salt)?
    } else {
        derive_key_pbkdf2(password, &salt)
    };

    let plaintext = open(&key, iv, &cipher)?;
    let text = String::from_utf8(plaintext.to_vec()).map_err(|_| WalletError::AuthFailure)?;

    if payload.uses_argon2id() {
        let expected = payload.integrity.as_deref().ok_or_else(|| {
            WalletError::IntegrityError("Payload is missing its integrity digest".to_string())
        })?;
        let actual = integrity_digest(text.as_bytes(), &salt);
        if actual != expected {
            return Err(WalletError::IntegrityError(
                "Payload digest does not match its contents".to_string(),
            ));
        }
    }

    Ok(Zeroizing::new(text))
}

/// True iff the payload predates the latest scheme.
pub fn needs_migration(payload: &EncryptedPayload) -> bool {
    payload.version < LATEST_VERSION
}

/// Re-encrypt an old payload under the latest scheme and the same password.
///
/// The vault is storage-agnostic: the caller persists the returned payload
/// and only then discards the old one.
pub fn migrate(
    payload: &EncryptedPayload,
    password: &SecretString,
) -> WalletResult<EncryptedPayload> {
    let plaintext = decrypt(payload, password)?;
    let migrated = encrypt(&plaintext, password)?;
    log::info!(
        "Vault payload migrated from version {} to {}",
        payload.version,
        migrated.version
    );
    Ok(migrated)
}

fn derive_key_argon2id(
    password: &SecretString,
    salt: &[u8],
) -> WalletResult<Zeroizing<[u8; KEY_LEN]>> {
    let params = Params::new(ARGON_M_COST_KIB, ARGON_T_COST, ARGON_P_COST, Some(KEY_LEN))
        .map_err(|e| WalletError::CryptoError(format!("Invalid Argon2 params: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(password.expose_secret().as_bytes(), salt, key.as_mut())
        .map_err(|e| WalletError::CryptoError(format!("KDF failed: {e}")))?;
    Ok(key)
}

fn derive_key_pbkdf2(password: &SecretString, salt: &[u8]) -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    let iterations = NonZeroU32::new(PBKDF2_ITERATIONS).expect("iteration count is non-zero");
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        salt,
        password.expose_secret().as_bytes(),
        key.as_mut(),
    );
    key
}

fn seal(key: &Zeroizing<[u8; KEY_LEN]>, iv: [u8; IV_LEN], plaintext: &[u8]) -> WalletResult<Vec<u8>> {
    let unbound_key = UnboundKey::new(&aead::AES_256_GCM, key.as_ref())
        .map_err(|e| WalletError::CryptoError(format!("Invalid encryption key: {e}")))?;
    let key = LessSafeKey::new(unbound_key);
    let nonce = Nonce::assume_unique_for_key(iv);

    let mut in_out = plaintext.to_vec();
    key.seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| WalletError::CryptoError("Encryption failure".to_string()))?;
    Ok(in_out)
}

fn open(
    key: &Zeroizing<[u8; KEY_LEN]>,
    iv: [u8; IV_LEN],
    ciphertext: &[u8],
) -> WalletResult<Zeroizing<Vec<u8>>> {
    let unbound_key = UnboundKey::new(&aead::AES_256_GCM, key.as_ref())
        .map_err(|e| WalletError::CryptoError(format!("Invalid encryption key: {e}")))?;
    let key = LessSafeKey::new(unbound_key);
    let nonce = Nonce::assume_unique_for_key(iv);

    if ciphertext.len() < aead::AES_256_GCM.tag_len() {
        return Err(WalletError::AuthFailure);
    }

    let mut in_out = Zeroizing::new(ciphertext.to_vec());
    let plaintext_len = key
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| WalletError::AuthFailure)?
        .len();
    in_out.truncate(plaintext_len);
    Ok(in_out)
}

/// base64(SHA-256(plaintext ‖ salt)), matching the stored V2 digest.
fn integrity_digest(plaintext: &[u8], salt: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plaintext);
    hasher.update(salt);
    BASE64.encode(hasher.finalize())
}

fn decode_field(value: &str, field: &str) -> WalletResult<Vec<u8>> {
    BASE64
        .decode(value)
        .map_err(|_| WalletError::ValidationError(format!("Malformed payload {field}")))
}
