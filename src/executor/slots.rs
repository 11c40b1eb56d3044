//! Per-market order slots

use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// One slot per market; held while a submission is in flight or an order rests
#[derive(Debug, Default)]
pub struct Slots {
    /// condition id -> resting order, `None` while submitting
    held: Mutex<HashMap<String, Option<Uuid>>>,
}

impl Slots {
    /// Take the slot for a market; `None` if already held
    pub fn try_acquire(&self, condition_id: &str) -> Option<SlotGuard<'_>> {
        let mut held = self.held.lock().ok()?;
        if held.contains_key(condition_id) {
            return None;
        }
        held.insert(condition_id.to_string(), None);
        Some(SlotGuard {
            slots: self,
            condition_id: condition_id.to_string(),
            armed: true,
        })
    }

    /// Mark the slot as held by a resting order
    pub fn hold(&self, condition_id: &str, order_id: Uuid) {
        if let Ok(mut held) = self.held.lock() {
            held.insert(condition_id.to_string(), Some(order_id));
        }
    }

    pub fn release(&self, condition_id: &str) -> bool {
        self.held
            .lock()
            .map(|mut held| held.remove(condition_id).is_some())
            .unwrap_or(false)
    }

    /// Held by a submission that has not been acknowledged yet
    pub fn is_submitting(&self, condition_id: &str) -> bool {
        self.held
            .lock()
            .map(|held| matches!(held.get(condition_id), Some(None)))
            .unwrap_or(false)
    }

    /// Markets with a submission in flight
    pub fn submitting(&self) -> Vec<String> {
        self.held
            .lock()
            .map(|held| {
                held.iter()
                    .filter(|(_, order)| order.is_none())
                    .map(|(condition_id, _)| condition_id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_held(&self, condition_id: &str) -> bool {
        self.held
            .lock()
            .map(|held| held.contains_key(condition_id))
            .unwrap_or(false)
    }
}

/// Releases its slot on drop unless handed to a resting order
pub struct SlotGuard<'a> {
    slots: &'a Slots,
    condition_id: String,
    armed: bool,
}

impl SlotGuard<'_> {
    /// Keep the slot after the guard is gone; the sweep releases it
    pub fn keep_for(mut self, order_id: Uuid) {
        self.slots.hold(&self.condition_id, order_id);
        self.armed = false;
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.slots.release(&self.condition_id);
        }
    }
}
