//! Block window arithmetic for the two pagination regimes.
//!
//! - **Reverse** (no explicit range): newest first, counted back from the
//!   latest indexed height.
//! - **Forward** (explicit `[number_from, number_to]`): oldest first within
//!   the range.
//!
//! The regime must be decided from the filter as the caller supplied it.
//! [`BlockRangeFilter::with_defaults`] fills in the missing bounds and would
//! make every filter look explicit.

use std::ops::RangeInclusive;

use serde::Deserialize;

use crate::error::{QueryError, QueryResult};

/// Which pagination regime a query runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regime {
    Reverse,
    Forward,
}

/// Heights selected for one page, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockWindow {
    pub start_block: u64,
    pub end_block: u64,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

impl BlockWindow {
    pub fn heights(&self) -> RangeInclusive<u64> {
        self.start_block..=self.end_block
    }

    pub fn block_count(&self) -> u64 {
        self.end_block - self.start_block + 1
    }
}

/// Latest-first window.
///
/// `end = latest - offset`, `start = max(0, end - limit + 1)`. `None` when
/// `offset > latest` or `limit == 0`.
pub fn reverse_window(latest: u64, offset: u64, limit: u64) -> Option<BlockWindow> {
    if offset > latest || limit == 0 {
        return None;
    }
    let end_block = latest - offset;
    let start_block = end_block.saturating_sub(limit - 1);
    Some(BlockWindow {
        start_block,
        end_block,
        has_next_page: start_block > 0,
        has_previous_page: offset > 0,
    })
}

/// Window over an explicit `[from, to]` range.
///
/// `start = from + offset`, `end = min(start + limit - 1, to)`. `None` when
/// `offset` is past the end of the range, `from > to` or `limit == 0`.
pub fn forward_window(from: u64, to: u64, offset: u64, limit: u64) -> Option<BlockWindow> {
    if from > to || limit == 0 {
        return None;
    }
    let range_size = (to - from).saturating_add(1);
    if offset >= range_size {
        return None;
    }
    let start_block = from + offset;
    let end_block = start_block.saturating_add(limit - 1).min(to);
    Some(BlockWindow {
        start_block,
        end_block,
        has_next_page: end_block < to,
        has_previous_page: offset > 0,
    })
}

/// Optional block-height bounds supplied by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlockRangeFilter {
    #[serde(default)]
    pub number_from: Option<u64>,
    #[serde(default)]
    pub number_to: Option<u64>,
}

impl BlockRangeFilter {
    pub const fn unbounded() -> Self {
        Self {
            number_from: None,
            number_to: None,
        }
    }

    pub const fn between(number_from: u64, number_to: u64) -> Self {
        Self {
            number_from: Some(number_from),
            number_to: Some(number_to),
        }
    }

    pub const fn is_explicit(&self) -> bool {
        self.number_from.is_some() || self.number_to.is_some()
    }

    /// Must be called before [`Self::with_defaults`].
    pub const fn regime(&self) -> Regime {
        if self.is_explicit() {
            Regime::Forward
        } else {
            Regime::Reverse
        }
    }

    /// Fill missing bounds with `[0, latest]`.
    pub fn with_defaults(self, latest: u64) -> Self {
        Self {
            number_from: Some(self.number_from.unwrap_or(0)),
            number_to: Some(self.number_to.unwrap_or(latest)),
        }
    }

    pub fn validate(&self) -> QueryResult<()> {
        if let (Some(from), Some(to)) = (self.number_from, self.number_to) {
            if from > to {
                return Err(QueryError::InvalidInput(format!(
                    "number_from {from} is greater than number_to {to}"
                )));
            }
        }
        Ok(())
    }

    /// Bounds after defaulting; `(0, latest)` for an unbounded filter.
    pub fn bounds(&self, latest: u64) -> (u64, u64) {
        (
            self.number_from.unwrap_or(0),
            self.number_to.unwrap_or(latest),
        )
    }
}

/// Offset/limit requested by the caller. A missing limit takes the
/// configured default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PageRequest {
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub limit: Option<u64>,
}

impl PageRequest {
    pub const fn new(offset: u64, limit: u64) -> Self {
        Self {
            offset,
            limit: Some(limit),
        }
    }

    pub const fn first(limit: u64) -> Self {
        Self::new(0, limit)
    }

    /// Effective `(offset, limit)`. A zero limit is rejected; larger limits
    /// are capped at `max_limit`.
    pub fn resolve(&self, default_limit: u64, max_limit: u64) -> QueryResult<(u64, u64)> {
        let limit = self.limit.unwrap_or(default_limit);
        if limit == 0 {
            return Err(QueryError::InvalidInput(
                "limit must be at least 1".to_string(),
            ));
        }
        Ok((self.offset, limit.min(max_limit)))
    }
}
