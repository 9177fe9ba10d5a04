//! Subscription Registry
//!
//! Reference counts for upstream channels. Any number of consumers may hold
//! a reference to the same channel while the exchange sees exactly one wire
//! subscription for it.
//!
//! # Design
//!
//! The registry is pure bookkeeping. It reports the 0→1 and 1→0 transitions
//! and leaves the wire side effect to its owner, which holds the registry
//! behind a mutex and sends the request while the lock is held.
//!
//! Entries are created on the first reference and removed when the count
//! returns to zero, so the registry never holds a zero-count entry.

use std::collections::{BTreeSet, HashMap};

use crate::domain::channel::{ChannelKey, DataKind};

// =============================================================================
// Errors
// =============================================================================

/// Errors raised by the registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No reference is held for this channel.
    #[error("no reference held for channel {0}")]
    UnknownReference(String),
}

// =============================================================================
// Reference Changes
// =============================================================================

/// Outcome of a reference count update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefChange {
    /// The count went 0→1; the channel must be subscribed upstream.
    FirstReference {
        /// Wire channel name.
        channel: String,
    },
    /// The count went 1→0; the channel must be unsubscribed upstream.
    LastReference {
        /// Wire channel name.
        channel: String,
    },
    /// The count changed without crossing zero.
    Retained {
        /// Wire channel name.
        channel: String,
        /// References remaining after the update.
        references: usize,
    },
}

impl RefChange {
    /// Wire channel name affected by the change.
    #[must_use]
    pub fn channel(&self) -> &str {
        match self {
            Self::FirstReference { channel }
            | Self::LastReference { channel }
            | Self::Retained { channel, .. } => channel,
        }
    }

    /// Whether the change requires a wire request.
    #[must_use]
    pub const fn is_transition(&self) -> bool {
        !matches!(self, Self::Retained { .. })
    }
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Debug)]
struct ChannelEntry {
    channel: String,
    references: usize,
    wire_subscribed: bool,
}

/// Reference-counted set of upstream channels.
///
/// # Example
///
/// ```rust
/// use binance_stream_client::domain::channel::ChannelKey;
/// use binance_stream_client::domain::subscription::{RefChange, SubscriptionRegistry};
///
/// let mut registry = SubscriptionRegistry::new();
/// let key = ChannelKey::trades("BTCUSDT", true);
///
/// // First consumer: subscribe upstream
/// assert!(matches!(registry.add_reference(&key), RefChange::FirstReference { .. }));
///
/// // Second consumer shares the wire subscription
/// assert!(matches!(registry.add_reference(&key), RefChange::Retained { references: 2, .. }));
///
/// registry.remove_reference(&key).unwrap();
///
/// // Last consumer leaves: unsubscribe upstream
/// assert_eq!(
///     registry.remove_reference(&key).unwrap(),
///     RefChange::LastReference { channel: "btcusdt@aggTrade".to_string() }
/// );
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: HashMap<ChannelKey, ChannelEntry>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a reference to a channel.
    pub fn add_reference(&mut self, key: &ChannelKey) -> RefChange {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.references += 1;
            return RefChange::Retained {
                channel: entry.channel.clone(),
                references: entry.references,
            };
        }

        let channel = key.channel_name();
        self.entries.insert(
            key.clone(),
            ChannelEntry {
                channel: channel.clone(),
                references: 1,
                wire_subscribed: false,
            },
        );
        RefChange::FirstReference { channel }
    }

    /// Remove a reference from a channel.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::UnknownReference` if no reference is held.
    /// The registry is left unchanged in that case.
    pub fn remove_reference(&mut self, key: &ChannelKey) -> Result<RefChange, RegistryError> {
        let Some(entry) = self.entries.get_mut(key) else {
            return Err(RegistryError::UnknownReference(key.channel_name()));
        };

        if entry.references > 1 {
            entry.references -= 1;
            return Ok(RefChange::Retained {
                channel: entry.channel.clone(),
                references: entry.references,
            });
        }

        let channel = self
            .entries
            .remove(key)
            .map_or_else(|| key.channel_name(), |entry| entry.channel);
        Ok(RefChange::LastReference { channel })
    }

    /// Every channel with at least one reference.
    #[must_use]
    pub fn snapshot_active_channels(&self) -> BTreeSet<String> {
        self.entries
            .values()
            .map(|entry| entry.channel.clone())
            .collect()
    }

    /// Current reference count for a channel.
    #[must_use]
    pub fn reference_count(&self, key: &ChannelKey) -> usize {
        self.entries.get(key).map_or(0, |entry| entry.references)
    }

    /// Whether the channel was last known to be subscribed on the wire.
    #[must_use]
    pub fn is_wire_subscribed(&self, key: &ChannelKey) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| entry.wire_subscribed)
    }

    /// Record the wire state of one channel.
    pub fn mark_wire_subscribed(&mut self, key: &ChannelKey, subscribed: bool) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.wire_subscribed = subscribed;
        }
    }

    /// Record the wire state of a channel by name.
    pub fn mark_channel_subscribed(&mut self, channel: &str, subscribed: bool) {
        if let Some(entry) = self
            .entries
            .values_mut()
            .find(|entry| entry.channel == channel)
        {
            entry.wire_subscribed = subscribed;
        }
    }

    /// Record the same wire state for every channel.
    pub fn mark_all_wire_subscribed(&mut self, subscribed: bool) {
        for entry in self.entries.values_mut() {
            entry.wire_subscribed = subscribed;
        }
    }

    /// Number of channels with at least one reference.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no channel is referenced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats::default();
        for (key, entry) in &self.entries {
            stats.channels += 1;
            stats.references += entry.references;
            if entry.wire_subscribed {
                stats.wire_subscribed += 1;
            }
            match key.kind() {
                DataKind::Orderbook => stats.orderbook_channels += 1,
                DataKind::Trades => stats.trade_channels += 1,
            }
        }
        stats
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RegistryStats {
    /// Channels with at least one reference.
    pub channels: usize,
    /// Sum of all reference counts.
    pub references: usize,
    /// Order book channels.
    pub orderbook_channels: usize,
    /// Trade channels.
    pub trade_channels: usize,
    /// Channels last known to be subscribed on the wire.
    pub wire_subscribed: usize,
}

// =============================================================================
// Tests
// =============================================================================
