//! In-memory market state shared by the processors

use std::collections::VecDeque;

use types::{Candle, Direction, Fvg, OrderBlock, Position};

/// Rolling market state for one symbol: bounded candle history, detected
/// patterns, and the single open position.
///
/// Shared as `Arc<parking_lot::RwLock<StateStore>>` and mutated only from
/// bus handlers, so writes are short and never held across awaits.
pub struct StateStore {
    capacity: usize,
    candles: VecDeque<Candle>,
    order_blocks: Vec<OrderBlock>,
    fvgs: Vec<Fvg>,
    position: Option<Position>,
}

impl StateStore {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "candle capacity must be positive");
        Self {
            capacity,
            candles: VecDeque::with_capacity(capacity),
            order_blocks: Vec::new(),
            fvgs: Vec::new(),
            position: None,
        }
    }

    /// Append a candle, evicting the oldest when the history is full.
    pub fn add_candle(&mut self, candle: Candle) {
        if self.candles.len() == self.capacity {
            self.candles.pop_front();
        }
        self.candles.push_back(candle);
    }

    pub fn candle_count(&self) -> usize {
        self.candles.len()
    }

    pub fn last_candle(&self) -> Option<&Candle> {
        self.candles.back()
    }

    /// The most recent `n` candles in chronological order.
    pub fn recent_candles(&self, n: usize) -> Vec<Candle> {
        let skip = self.candles.len().saturating_sub(n);
        self.candles.iter().skip(skip).cloned().collect()
    }

    pub fn add_order_block(&mut self, ob: OrderBlock) {
        self.order_blocks.push(ob);
    }

    pub fn add_fvg(&mut self, fvg: Fvg) {
        self.fvgs.push(fvg);
    }

    /// Valid order blocks, oldest first, optionally filtered by direction.
    pub fn valid_order_blocks(&self, direction: Option<Direction>) -> Vec<OrderBlock> {
        self.order_blocks
            .iter()
            .filter(|ob| ob.valid)
            .filter(|ob| direction.map_or(true, |d| ob.direction == d))
            .cloned()
            .collect()
    }

    /// Valid fair value gaps, oldest first, optionally filtered by direction.
    pub fn valid_fvgs(&self, direction: Option<Direction>) -> Vec<Fvg> {
        self.fvgs
            .iter()
            .filter(|fvg| fvg.valid)
            .filter(|fvg| direction.map_or(true, |d| fvg.direction == d))
            .cloned()
            .collect()
    }

    /// Count a price test of a stored zone. Returns the updated touch
    /// count, or `None` when the zone is no longer stored.
    pub fn record_touch(&mut self, zone: &OrderBlock) -> Option<u32> {
        self.order_blocks
            .iter_mut()
            .find(|ob| ob.detected_at == zone.detected_at && ob.direction == zone.direction)
            .map(|ob| {
                ob.touches += 1;
                ob.touches
            })
    }

    /// Drop patterns detected before the candle `max_age` closes back.
    ///
    /// No-op while the history is shorter than `max_age`, so early patterns
    /// are never purged prematurely.
    pub fn cleanup(&mut self, max_age: usize) {
        let len = self.candles.len();
        if len < max_age {
            return;
        }
        let Some(cutoff) = self.candles.get(len - max_age).map(|c| c.open_time) else {
            return;
        };
        self.order_blocks.retain(|ob| ob.detected_at >= cutoff);
        self.fvgs.retain(|fvg| fvg.detected_at >= cutoff);
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn has_position(&self) -> bool {
        self.position.is_some()
    }

    pub fn set_position(&mut self, position: Position) {
        self.position = Some(position);
    }

    pub fn take_position(&mut self) -> Option<Position> {
        self.position.take()
    }
}
