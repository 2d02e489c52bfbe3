//! Subscription filters.

use std::collections::BTreeSet;

use alloy_primitives::{Address, B256};
use serde::Deserialize;

use crate::event::{EventKind, IndexedEvent};

/// One topic position of a log filter.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TopicFilter {
    Single(B256),
    /// Any of the listed topics (OR).
    Multiple(Vec<B256>),
}

impl TopicFilter {
    fn matches(&self, topic: Option<&B256>) -> bool {
        match self {
            Self::Single(expected) => topic == Some(expected),
            Self::Multiple(options) => topic.is_some_and(|t| options.contains(t)),
        }
    }
}

/// Which events a subscription receives.
///
/// All present criteria must hold. An empty kind set accepts every kind.
/// Topic filters only constrain log events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubscriptionFilter {
    #[serde(default)]
    pub kinds: BTreeSet<EventKind>,
    #[serde(default)]
    pub addresses: Option<BTreeSet<Address>>,
    /// Positional topic filters; `None` entries are wildcards.
    #[serde(default)]
    pub topics: Option<Vec<Option<TopicFilter>>>,
}

impl SubscriptionFilter {
    /// Match every event.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn kinds(kinds: impl IntoIterator<Item = EventKind>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn with_addresses(mut self, addresses: impl IntoIterator<Item = Address>) -> Self {
        self.addresses = Some(addresses.into_iter().collect());
        self
    }

    pub fn with_topics(mut self, topics: Vec<Option<TopicFilter>>) -> Self {
        self.topics = Some(topics);
        self
    }

    pub fn matches(&self, event: &IndexedEvent) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind()) {
            return false;
        }

        if let Some(addresses) = &self.addresses {
            if !addresses.iter().any(|address| event.involves(address)) {
                return false;
            }
        }

        if let (Some(filters), IndexedEvent::Log(_)) = (&self.topics, event) {
            let topics = event.topics();
            for (position, filter) in filters.iter().enumerate() {
                if let Some(filter) = filter {
                    if !filter.matches(topics.get(position)) {
                        return false;
                    }
                }
            }
        }

        true
    }
}
