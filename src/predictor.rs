//! §4.L branch predictor: static not-taken is the mandatory baseline; `Config.enable_predictor`
//! turns on a 2-bit saturating-counter BHT plus a direct-mapped BTB, PC-indexed.
//!
//! No reference-crate analogue exists (the reference core has no pipeline to predict ahead of);
//! this is new code built to the shape SPEC_FULL.md §4.L describes, kept in the same plain-owned-
//! struct style as the rest of this crate's stage types.

const TABLE_BITS: u32 = 6;
const TABLE_SIZE: usize = 1 << TABLE_BITS;
const INDEX_MASK: u32 = (TABLE_SIZE as u32) - 1;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct Entry {
    tag: u32,
    target: u32,
    /// 2-bit saturating counter: 0,1 = predict not-taken; 2,3 = predict taken.
    counter: u8,
}

/// The outcome of a prediction, to compare against Execute's actual resolution.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Prediction {
    pub target: u32,
    pub taken: bool,
}

#[derive(Debug, Clone)]
pub struct Predictor {
    enabled: bool,
    table: Vec<Option<Entry>>,
}

impl Predictor {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            table: vec![None; TABLE_SIZE],
        }
    }

    fn index(pc: u32) -> usize {
        ((pc >> 2) & INDEX_MASK) as usize
    }

    /// Predict the next PC for a fetch from `pc`. With the predictor disabled, this always
    /// degenerates to the static not-taken baseline (`pc + 4`), matching §4.L exactly.
    pub fn predict(&self, pc: u32) -> Prediction {
        if !self.enabled {
            return Prediction {
                target: pc.wrapping_add(4),
                taken: false,
            };
        }
        match self.table[Self::index(pc)] {
            Some(entry) if entry.tag == pc && entry.counter >= 2 => Prediction {
                target: entry.target,
                taken: true,
            },
            _ => Prediction {
                target: pc.wrapping_add(4),
                taken: false,
            },
        }
    }

    /// Update the table with Execute's resolved outcome for a branch/jump fetched from `pc`.
    /// A no-op while the predictor is disabled.
    pub fn update(&mut self, pc: u32, taken: bool, target: u32) {
        if !self.enabled {
            return;
        }
        let index = Self::index(pc);
        let entry = self.table[index].filter(|e| e.tag == pc).unwrap_or(Entry {
            tag: pc,
            target,
            counter: 1,
        });
        let counter = if taken {
            entry.counter.saturating_add(1).min(3)
        } else {
            entry.counter.saturating_sub(1)
        };
        self.table[index] = Some(Entry {
            tag: pc,
            target: if taken { target } else { entry.target },
            counter,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_predictor_always_predicts_sequential() {
        let predictor = Predictor::new(false);
        let prediction = predictor.predict(0x8000_0000);
        assert_eq!(prediction.target, 0x8000_0004);
        assert!(!prediction.taken);
    }

    #[test]
    fn cold_entry_predicts_not_taken() {
        let predictor = Predictor::new(true);
        let prediction = predictor.predict(0x8000_0000);
        assert!(!prediction.taken);
    }

    #[test]
    fn repeated_taken_outcomes_saturate_to_taken_prediction() {
        let mut predictor = Predictor::new(true);
        predictor.update(0x8000_0000, true, 0x8000_0100);
        predictor.update(0x8000_0000, true, 0x8000_0100);
        let prediction = predictor.predict(0x8000_0000);
        assert!(prediction.taken);
        assert_eq!(prediction.target, 0x8000_0100);
    }

    #[test]
    fn repeated_not_taken_outcomes_keep_counter_at_floor() {
        let mut predictor = Predictor::new(true);
        predictor.update(0x8000_0000, true, 0x8000_0100);
        predictor.update(0x8000_0000, true, 0x8000_0100);
        predictor.update(0x8000_0000, false, 0x8000_0100);
        predictor.update(0x8000_0000, false, 0x8000_0100);
        predictor.update(0x8000_0000, false, 0x8000_0100);
        let prediction = predictor.predict(0x8000_0000);
        assert!(!prediction.taken);
    }

    #[test]
    fn different_pc_uses_distinct_entries() {
        let mut predictor = Predictor::new(true);
        predictor.update(0x8000_0000, true, 0x8000_0100);
        predictor.update(0x8000_0000, true, 0x8000_0100);
        let other = predictor.predict(0x8000_0004);
        assert!(!other.taken);
    }
}
