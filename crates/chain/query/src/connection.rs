//! Connection-shaped results: nodes, a total count and page info.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::hex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::QueryError;

const CURSOR_LEN: usize = 12;

/// Opaque position of a node: block number plus an index within the block
/// (transaction index, log index, or zero for blocks).
///
/// Rendered as `0x` followed by 24 hex digits.
///
/// Cursors are output only. Pages are requested by offset; the cursors mark
/// the edges of a returned page so a client can tell whether the next page
/// continues where the previous one ended or the chain moved in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cursor {
    pub block_number: u64,
    pub index: u32,
}

impl Cursor {
    pub const fn new(block_number: u64, index: u32) -> Self {
        Self {
            block_number,
            index,
        }
    }

    pub const fn block(block_number: u64) -> Self {
        Self::new(block_number, 0)
    }

    pub fn encode(&self) -> String {
        let mut bytes = [0u8; CURSOR_LEN];
        let (block, index) = bytes.split_at_mut(8);
        block.copy_from_slice(&self.block_number.to_be_bytes());
        index.copy_from_slice(&self.index.to_be_bytes());
        hex::encode_prefixed(bytes)
    }

    pub fn decode(cursor: &str) -> Result<Self, QueryError> {
        let invalid = || QueryError::InvalidInput(format!("malformed cursor: {cursor}"));
        let bytes = hex::decode(cursor).map_err(|_| invalid())?;
        let bytes: [u8; CURSOR_LEN] = bytes.try_into().map_err(|_| invalid())?;
        let (block, index) = bytes.split_at(8);
        Ok(Self {
            block_number: u64::from_be_bytes(block.try_into().map_err(|_| invalid())?),
            index: u32::from_be_bytes(index.try_into().map_err(|_| invalid())?),
        })
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Cursor {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl Serialize for Cursor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for Cursor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Number of nodes across all pages.
///
/// `exact` is false when the count only covers the part of the range that
/// was scanned (the scan was clamped to the maximum block span). Consumers
/// must present such a value as a lower bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalCount {
    pub value: u64,
    pub exact: bool,
}

impl TotalCount {
    pub const fn exact(value: u64) -> Self {
        Self { value, exact: true }
    }

    pub const fn lower_bound(value: u64) -> Self {
        Self {
            value,
            exact: false,
        }
    }
}

/// Page flags plus the cursors of the first and last node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub start_cursor: Option<Cursor>,
    pub end_cursor: Option<Cursor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection<T> {
    pub nodes: Vec<T>,
    pub total_count: TotalCount,
    pub page_info: PageInfo,
}

impl<T> Connection<T> {
    /// A page past the end of the result set.
    pub fn empty(total_count: TotalCount, has_previous_page: bool) -> Self {
        Self {
            nodes: Vec::new(),
            total_count,
            page_info: PageInfo {
                has_previous_page,
                ..PageInfo::default()
            },
        }
    }

    /// Build a page, deriving start and end cursors from the nodes.
    pub fn new(
        nodes: Vec<T>,
        total_count: TotalCount,
        has_next_page: bool,
        has_previous_page: bool,
        cursor_of: impl Fn(&T) -> Cursor,
    ) -> Self {
        let start_cursor = nodes.first().map(&cursor_of);
        let end_cursor = nodes.last().map(&cursor_of);
        Self {
            nodes,
            total_count,
            page_info: PageInfo {
                has_next_page,
                has_previous_page,
                start_cursor,
                end_cursor,
            },
        }
    }

    /// Slice `offset..offset + limit` out of a fully collected result set.
    pub fn from_collected(
        mut collected: Vec<T>,
        total_count: TotalCount,
        offset: u64,
        limit: u64,
        cursor_of: impl Fn(&T) -> Cursor,
    ) -> Self {
        let len = collected.len() as u64;
        let start = offset.min(len) as usize;
        let end = offset.saturating_add(limit).min(len) as usize;
        let nodes: Vec<T> = collected.drain(start..end).collect();
        let has_next_page = (end as u64) < len;
        Self::new(nodes, total_count, has_next_page, offset > 0, cursor_of)
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Connection<U> {
        Connection {
            nodes: self.nodes.into_iter().map(f).collect(),
            total_count: self.total_count,
            page_info: self.page_info,
        }
    }
}

#[cfg(test)]
#[allow(clippy::indexing_slicing, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_encoding() {
        let cursor = Cursor::new(0x0102, 3);
        let encoded = cursor.encode();
        assert_eq!(encoded, "0x000000000000010200000003");
        assert_eq!(encoded.parse::<Cursor>().unwrap(), cursor);
    }

    #[test]
    fn test_malformed_cursor_rejected() {
        for bad in ["", "0x", "0x1234", "not-hex", "0x00000000000001020000000300"] {
            assert!(
                matches!(Cursor::decode(bad), Err(QueryError::InvalidInput(_))),
                "accepted {bad}"
            );
        }
    }

    #[test]
    fn test_cursor_serde_as_string() {
        let json = serde_json::to_string(&Cursor::block(5)).unwrap();
        assert_eq!(json, "\"0x000000000000000500000000\"");
        let back: Cursor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Cursor::block(5));
    }

    #[test]
    fn test_from_collected_slices_and_flags() {
        let items: Vec<u64> = (0..25).collect();

        let first = Connection::from_collected(
            items.clone(),
            TotalCount::exact(25),
            0,
            10,
            |n| Cursor::block(*n),
        );
        assert_eq!(first.nodes, (0..10).collect::<Vec<_>>());
        assert!(first.page_info.has_next_page);
        assert!(!first.page_info.has_previous_page);
        assert_eq!(first.page_info.start_cursor, Some(Cursor::block(0)));
        assert_eq!(first.page_info.end_cursor, Some(Cursor::block(9)));

        let last = Connection::from_collected(
            items.clone(),
            TotalCount::exact(25),
            20,
            10,
            |n| Cursor::block(*n),
        );
        assert_eq!(last.nodes.len(), 5);
        assert!(!last.page_info.has_next_page);
        assert!(last.page_info.has_previous_page);

        let past = Connection::from_collected(items, TotalCount::exact(25), 40, 10, |n| {
            Cursor::block(*n)
        });
        assert!(past.nodes.is_empty());
        assert_eq!(past.page_info.start_cursor, None);
    }

    #[test]
    fn test_connection_serializes_camel_case() {
        let connection = Connection::new(
            vec![1u64],
            TotalCount::lower_bound(1),
            false,
            false,
            |n| Cursor::block(*n),
        );
        let json = serde_json::to_value(&connection).unwrap();
        assert_eq!(json["totalCount"]["exact"], false);
        assert_eq!(json["pageInfo"]["hasNextPage"], false);
        assert_eq!(
            json["pageInfo"]["startCursor"],
            "0x000000000000000100000000"
        );
    }
}
