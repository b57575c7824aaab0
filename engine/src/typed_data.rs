/// EIP-712 typed structured data hashing
///
/// Computes the digest signed for eth_signTypedData requests from the
/// dApp-supplied JSON: `keccak256(0x19 0x01 ‖ domainSeparator ‖
/// hashStruct(primaryType, message))`.
use std::collections::BTreeSet;

use serde_json::Value;

use crate::errors::{WalletError, WalletResult};
use crate::keys::keccak256;

/// Hash a full typed-data request as supplied over the pairing channel.
///
/// Expects the standard envelope: `types` (including `EIP712Domain`),
/// `primaryType`, `domain`, and `message`.
pub fn hash_typed_data(typed: &Value) -> WalletResult<[u8; 32]> {
    let types = typed
        .get("types")
        .and_then(Value::as_object)
        .ok_or_else(|| invalid("missing types"))?;
    let primary_type = typed
        .get("primaryType")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("missing primaryType"))?;
    let domain = typed.get("domain").ok_or_else(|| invalid("missing domain"))?;
    let message = typed
        .get("message")
        .ok_or_else(|| invalid("missing message"))?;

    let types = Value::Object(types.clone());
    let domain_separator = hash_struct(&types, "EIP712Domain", domain)?;
    let message_hash = hash_struct(&types, primary_type, message)?;

    let mut preimage = Vec::with_capacity(2 + 32 + 32);
    preimage.extend_from_slice(&[0x19, 0x01]);
    preimage.extend_from_slice(&domain_separator);
    preimage.extend_from_slice(&message_hash);
    Ok(keccak256(&preimage))
}

/// `keccak256(typeHash ‖ encodeData(value))` for one struct instance
fn hash_struct(types: &Value, type_name: &str, value: &Value) -> WalletResult<[u8; 32]> {
    let mut encoded = Vec::new();
    encoded.extend_from_slice(&type_hash(types, type_name)?);

    for (field_name, field_type) in struct_fields(types, type_name)? {
        let field_value = value.get(&field_name).ok_or_else(|| {
            invalid(&format!("{} missing field {}", type_name, field_name))
        })?;
        encoded.extend_from_slice(&encode_value(types, &field_type, field_value)?);
    }

    Ok(keccak256(&encoded))
}

/// Encode one field into its 32-byte word
fn encode_value(types: &Value, field_type: &str, value: &Value) -> WalletResult<[u8; 32]> {
    // Arrays hash the concatenation of their encoded elements
    if let Some((element_type, _)) = field_type
        .strip_suffix(']')
        .and_then(|t| t.rsplit_once('['))
    {
        let elements = value
            .as_array()
            .ok_or_else(|| invalid(&format!("expected array for {}", field_type)))?;
        let mut encoded = Vec::with_capacity(elements.len() * 32);
        for element in elements {
            encoded.extend_from_slice(&encode_value(types, element_type, element)?);
        }
        return Ok(keccak256(&encoded));
    }

    if is_struct_type(types, field_type) {
        return hash_struct(types, field_type, value);
    }

    match field_type {
        "string" => {
            let s = value
                .as_str()
                .ok_or_else(|| invalid("expected string value"))?;
            Ok(keccak256(s.as_bytes()))
        }
        "bytes" => {
            let bytes = decode_hex(value)?;
            Ok(keccak256(&bytes))
        }
        "address" => {
            let bytes = decode_hex(value)?;
            if bytes.len() != 20 {
                return Err(invalid("address must be 20 bytes"));
            }
            let mut word = [0u8; 32];
            word[12..].copy_from_slice(&bytes);
            Ok(word)
        }
        "bool" => {
            let b = value.as_bool().ok_or_else(|| invalid("expected bool"))?;
            let mut word = [0u8; 32];
            word[31] = b as u8;
            Ok(word)
        }
        t if t.starts_with("bytes") => {
            let width: usize = t[5..]
                .parse()
                .map_err(|_| invalid(&format!("unknown type {}", t)))?;
            let bytes = decode_hex(value)?;
            if width == 0 || width > 32 || bytes.len() != width {
                return Err(invalid(&format!("bad fixed bytes for {}", t)));
            }
            let mut word = [0u8; 32];
            word[..width].copy_from_slice(&bytes);
            Ok(word)
        }
        t if t.starts_with("uint") || t.starts_with("int") => encode_integer(value),
        t => Err(invalid(&format!("unknown type {}", t))),
    }
}

/// Big-endian 32-byte encoding for integer fields.
///
/// Accepts JSON numbers, decimal strings, and 0x-hex strings; negative
/// values are two's-complement sign-extended.
fn encode_integer(value: &Value) -> WalletResult<[u8; 32]> {
    if let Some(s) = value.as_str() {
        if let Some(stripped) = s.strip_prefix("0x") {
            let padded = if stripped.len() % 2 == 1 {
                format!("0{}", stripped)
            } else {
                stripped.to_string()
            };
            let bytes =
                hex::decode(&padded).map_err(|_| invalid("non-hex integer value"))?;
            if bytes.len() > 32 {
                return Err(invalid("integer wider than 256 bits"));
            }
            let mut word = [0u8; 32];
            word[32 - bytes.len()..].copy_from_slice(&bytes);
            return Ok(word);
        }
        let n: i128 = s.parse().map_err(|_| invalid("non-numeric integer value"))?;
        return Ok(i128_word(n));
    }

    if let Some(n) = value.as_u64() {
        return Ok(i128_word(n as i128));
    }
    if let Some(n) = value.as_i64() {
        return Ok(i128_word(n as i128));
    }
    Err(invalid("expected integer value"))
}

fn i128_word(n: i128) -> [u8; 32] {
    let fill = if n < 0 { 0xFF } else { 0x00 };
    let mut word = [fill; 32];
    word[16..].copy_from_slice(&n.to_be_bytes());
    word
}

/// `keccak256(encodeType(typeName))`, with referenced struct types
/// appended in alphabetical order per the EIP-712 encoding rules.
fn type_hash(types: &Value, type_name: &str) -> WalletResult<[u8; 32]> {
    let mut dependencies = BTreeSet::new();
    collect_dependencies(types, type_name, &mut dependencies)?;
    dependencies.remove(type_name);

    let mut encoded = encode_single_type(types, type_name)?;
    for dependency in dependencies {
        encoded.push_str(&encode_single_type(types, &dependency)?);
    }
    Ok(keccak256(encoded.as_bytes()))
}

fn encode_single_type(types: &Value, type_name: &str) -> WalletResult<String> {
    let fields = struct_fields(types, type_name)?;
    let joined: Vec<String> = fields
        .iter()
        .map(|(name, ty)| format!("{} {}", ty, name))
        .collect();
    Ok(format!("{}({})", type_name, joined.join(",")))
}

fn collect_dependencies(
    types: &Value,
    type_name: &str,
    found: &mut BTreeSet<String>,
) -> WalletResult<()> {
    if !found.insert(type_name.to_string()) {
        return Ok(());
    }
    for (_, field_type) in struct_fields(types, type_name)? {
        let base = field_type
            .split('[')
            .next()
            .unwrap_or(&field_type)
            .to_string();
        if is_struct_type(types, &base) {
            collect_dependencies(types, &base, found)?;
        }
    }
    Ok(())
}

fn struct_fields(types: &Value, type_name: &str) -> WalletResult<Vec<(String, String)>> {
    let fields = types
        .get(type_name)
        .and_then(Value::as_array)
        .ok_or_else(|| invalid(&format!("unknown struct type {}", type_name)))?;

    fields
        .iter()
        .map(|field| {
            let name = field
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid("field missing name"))?;
            let ty = field
                .get("type")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid("field missing type"))?;
            Ok((name.to_string(), ty.to_string()))
        })
        .collect()
}

fn is_struct_type(types: &Value, type_name: &str) -> bool {
    types.get(type_name).is_some()
}

fn decode_hex(value: &Value) -> WalletResult<Vec<u8>> {
    let s = value
        .as_str()
        .ok_or_else(|| invalid("expected hex string"))?;
    hex::decode(s.trim_start_matches("0x")).map_err(|_| invalid("non-hex value"))
}

fn invalid(detail: &str) -> WalletError {
    WalletError::ValidationError(format!("Invalid typed data: {}", detail))
}
