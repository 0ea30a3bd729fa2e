use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Result};

use crate::model::observation::Observation;

pub const DEFAULT_HISTORY_CAPACITY: usize = 1_000;

/// Time-ordered, capacity-bounded price history for one symbol.
#[derive(Debug, Clone)]
pub struct ObservationHistory {
    capacity: usize,
    items: VecDeque<Observation>,
}

impl Default for ObservationHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl ObservationHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity),
        }
    }

    /// Append an observation, evicting the oldest when full.
    ///
    /// Returns `false` (and keeps the history unchanged) for invalid prices or
    /// timestamps older than the newest stored observation. Equal timestamps
    /// are accepted.
    pub fn push(&mut self, obs: Observation) -> bool {
        if !obs.is_valid() {
            return false;
        }
        if let Some(last) = self.items.back() {
            if obs.timestamp_ms < last.timestamp_ms {
                return false;
            }
        }
        self.items.push_back(obs);
        while self.items.len() > self.capacity {
            let _ = self.items.pop_front();
        }
        true
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&Observation> {
        self.items.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Observation> {
        self.items.iter()
    }

    pub fn to_vec(&self) -> Vec<Observation> {
        self.items.iter().cloned().collect()
    }
}

/// Shared handle to one symbol's history: many readers, one claimed writer.
#[derive(Debug, Clone)]
pub struct SharedHistory {
    symbol: String,
    inner: Arc<RwLock<ObservationHistory>>,
    writer_claimed: Arc<AtomicBool>,
}

impl SharedHistory {
    pub fn new(symbol: &str, capacity: usize) -> Self {
        Self {
            symbol: symbol.trim().to_ascii_uppercase(),
            inner: Arc::new(RwLock::new(ObservationHistory::with_capacity(capacity))),
            writer_claimed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Claim the single append slot. Fails while another writer is alive.
    pub fn claim_writer(&self) -> Result<HistoryWriter> {
        if self
            .writer_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(anyhow!(
                "history for {} already has an active writer",
                self.symbol
            ));
        }
        Ok(HistoryWriter {
            history: self.clone(),
        })
    }

    /// Immutable copy of the current contents.
    pub fn snapshot(&self) -> Result<Vec<Observation>> {
        let guard = self
            .inner
            .read()
            .map_err(|_| anyhow!("history lock poisoned for {}", self.symbol))?;
        Ok(guard.to_vec())
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive append capability for a [`SharedHistory`]; released on drop.
#[derive(Debug)]
pub struct HistoryWriter {
    history: SharedHistory,
}

impl HistoryWriter {
    pub fn append(&self, obs: Observation) -> Result<bool> {
        let mut guard = self
            .history
            .inner
            .write()
            .map_err(|_| anyhow!("history lock poisoned for {}", self.history.symbol))?;
        Ok(guard.push(obs))
    }

    pub fn symbol(&self) -> &str {
        self.history.symbol()
    }
}

impl Drop for HistoryWriter {
    fn drop(&mut self) {
        self.history.writer_claimed.store(false, Ordering::Release);
    }
}
