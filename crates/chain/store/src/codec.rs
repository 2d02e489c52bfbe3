//! Conversions between chain types and SQLite column values.

use alloy_primitives::{Address, B256, I256, U256};
use rusqlite::types::Type;
use rusqlite::Row;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreResult;

pub(crate) fn b256_from_row(bytes: &[u8], col: usize) -> rusqlite::Result<B256> {
    if bytes.len() != 32 {
        return Err(rusqlite::Error::FromSqlConversionFailure(
            col,
            Type::Blob,
            format!("expected 32 bytes for B256, got {}", bytes.len()).into(),
        ));
    }
    Ok(B256::from_slice(bytes))
}

pub(crate) fn address_from_row(bytes: &[u8], col: usize) -> rusqlite::Result<Address> {
    if bytes.len() != 20 {
        return Err(rusqlite::Error::FromSqlConversionFailure(
            col,
            Type::Blob,
            format!("expected 20 bytes for Address, got {}", bytes.len()).into(),
        ));
    }
    Ok(Address::from_slice(bytes))
}

pub(crate) fn u256_from_row(bytes: &[u8], col: usize) -> rusqlite::Result<U256> {
    U256::try_from_be_slice(bytes).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            col,
            Type::Blob,
            format!("expected at most 32 bytes for U256, got {}", bytes.len()).into(),
        )
    })
}

/// Signed values are stored as their two's complement 256-bit word.
pub(crate) fn i256_from_row(bytes: &[u8], col: usize) -> rusqlite::Result<I256> {
    u256_from_row(bytes, col).map(I256::from_raw)
}

pub(crate) fn u256_bytes(value: U256) -> [u8; 32] {
    value.to_be_bytes()
}

pub(crate) fn i256_bytes(value: I256) -> [u8; 32] {
    value.into_raw().to_be_bytes()
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> StoreResult<String> {
    Ok(serde_json::to_string(value)?)
}

/// Decode the JSON `body` column at `col`.
pub(crate) fn json_column<T: DeserializeOwned>(row: &Row<'_>, col: usize) -> rusqlite::Result<T> {
    let body: String = row.get(col)?;
    serde_json::from_str(&body)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(col, Type::Text, Box::new(e)))
}

pub(crate) fn b256_column(row: &Row<'_>, col: usize) -> rusqlite::Result<B256> {
    let bytes: Vec<u8> = row.get(col)?;
    b256_from_row(&bytes, col)
}

pub(crate) fn address_column(row: &Row<'_>, col: usize) -> rusqlite::Result<Address> {
    let bytes: Vec<u8> = row.get(col)?;
    address_from_row(&bytes, col)
}

pub(crate) fn u256_column(row: &Row<'_>, col: usize) -> rusqlite::Result<U256> {
    let bytes: Vec<u8> = row.get(col)?;
    u256_from_row(&bytes, col)
}

pub(crate) fn i256_column(row: &Row<'_>, col: usize) -> rusqlite::Result<I256> {
    let bytes: Vec<u8> = row.get(col)?;
    i256_from_row(&bytes, col)
}

pub(crate) fn u64_column(row: &Row<'_>, col: usize) -> rusqlite::Result<u64> {
    let value: i64 = row.get(col)?;
    Ok(value as u64)
}

pub(crate) fn u32_column(row: &Row<'_>, col: usize) -> rusqlite::Result<u32> {
    let value: i64 = row.get(col)?;
    Ok(value as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_delta_round_trips_through_blob() {
        let delta = I256::try_from(-42i64).unwrap_or_default();
        let bytes = i256_bytes(delta);
        assert_eq!(i256_from_row(&bytes, 0).ok(), Some(delta));
    }

    #[test]
    fn test_wrong_length_hash_is_conversion_failure() {
        let err = b256_from_row(&[1, 2, 3], 4).unwrap_err();
        assert!(matches!(
            err,
            rusqlite::Error::FromSqlConversionFailure(4, Type::Blob, _)
        ));
    }
}
