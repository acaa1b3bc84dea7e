//! Contract call encoding and result decoding
//!
//! Only the handful of view methods the readers need are ever encoded, so we
//! stay on ethabi's free functions instead of loading full contract ABIs.

use ethabi::{Address, ParamType, Token, Uint};

use crate::error::{Result, YieldError};

/// Wei-style fixed point used by every tracked vault and pool
pub const WAD_DECIMALS: u32 = 18;

/// Build calldata: 4-byte selector followed by the encoded arguments
pub fn encode_call(name: &str, params: &[ParamType], args: &[Token]) -> Vec<u8> {
    let mut data = ethabi::short_signature(name, params).to_vec();
    data.extend(ethabi::encode(args));
    data
}

/// First four bytes of calldata
pub fn selector_of(data: &[u8]) -> Option<[u8; 4]> {
    data.get(..4).and_then(|s| s.try_into().ok())
}

/// Decode a call result into tokens
pub fn decode_output(method: &str, types: &[ParamType], data: &[u8]) -> Result<Vec<Token>> {
    if data.is_empty() {
        // eth_call against an address without code returns 0x
        return Err(YieldError::Reverted {
            method: method.to_string(),
            message: "empty return data".to_string(),
        });
    }
    ethabi::decode(types, data).map_err(|e| YieldError::decode(method, e))
}

/// Decode a single uint256 return value
pub fn decode_uint(method: &str, data: &[u8]) -> Result<Uint> {
    let tokens = decode_output(method, &[ParamType::Uint(256)], data)?;
    uint_at(method, &tokens, 0)
}

/// Pull the uint at `index` out of a decoded tuple
pub fn uint_at(method: &str, tokens: &[Token], index: usize) -> Result<Uint> {
    tokens
        .get(index)
        .cloned()
        .and_then(Token::into_uint)
        .ok_or_else(|| YieldError::decode(method, format!("no uint at position {index}")))
}

/// Lossy conversion for display/rate math
pub fn uint_to_f64(value: Uint) -> f64 {
    value.to_string().parse().unwrap_or(f64::MAX)
}

/// Fixed-point integer to float, e.g. `scale(1.5e18, 18) == 1.5`
pub fn scale(value: Uint, decimals: u32) -> f64 {
    uint_to_f64(value) / 10f64.powi(decimals as i32)
}

/// Whole token units to fixed point
pub fn units(amount: u64, decimals: u32) -> Uint {
    Uint::from(amount) * Uint::exp10(decimals as usize)
}

/// Parse a 0x-prefixed (or bare) 20-byte hex address
pub fn parse_address(s: &str) -> Result<Address> {
    let trimmed = s.trim();
    let stripped = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let bytes = hex::decode(stripped).map_err(|_| YieldError::InvalidAddress(s.to_string()))?;
    if bytes.len() != 20 {
        return Err(YieldError::InvalidAddress(s.to_string()));
    }
    Ok(Address::from_slice(&bytes))
}

/// Full lowercase 0x form (Display on H160 abbreviates)
pub fn format_address(address: &Address) -> String {
    format!("0x{}", hex::encode(address.as_bytes()))
}
