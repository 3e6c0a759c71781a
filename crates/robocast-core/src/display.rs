use serde::Serialize;

use crate::events::ParticipantId;

/// Maximum number of concurrent on-screen feeds.
pub const MAX_DISPLAYED: usize = 2;

/// Participants currently on screen plus the slot shown full-frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DisplaySet {
    pub entries: Vec<ParticipantId>,
    pub primary_index: usize,
}

impl DisplaySet {
    pub fn primary(&self) -> Option<ParticipantId> {
        self.entries.get(self.primary_index).copied()
    }

    pub fn secondary(&self) -> Option<ParticipantId> {
        if self.entries.len() < MAX_DISPLAYED {
            return None;
        }
        self.entries.get(1 - self.primary_index).copied()
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        self.entries.contains(&id)
    }
}

/// Keeps the bounded, ordered display set.
///
/// Pure state transitions: the same event sequence always yields the same
/// entries and primary index.
#[derive(Debug, Clone, Default)]
pub struct DisplaySetSelector {
    set: DisplaySet,
}

impl DisplaySetSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a participant whose video just became available.
    ///
    /// Returns `true` if it was added. Already-displayed ids and offers while
    /// the set is full are ignored.
    pub fn on_video_available(&mut self, id: ParticipantId) -> bool {
        if self.set.contains(id) || self.set.entries.len() >= MAX_DISPLAYED {
            return false;
        }
        self.set.entries.push(id);
        true
    }

    pub fn on_video_unavailable(&mut self, id: ParticipantId) -> bool {
        self.remove(id)
    }

    pub fn on_participant_left(&mut self, id: ParticipantId) -> bool {
        self.remove(id)
    }

    /// Flip primary and secondary. No-op with fewer than two entries.
    pub fn swap_primary(&mut self) -> bool {
        if self.set.entries.len() < MAX_DISPLAYED {
            return false;
        }
        self.set.primary_index = 1 - self.set.primary_index;
        true
    }

    /// Point the primary slot at `id` without reordering entries.
    pub fn promote(&mut self, id: ParticipantId) -> bool {
        match self.set.entries.iter().position(|e| *e == id) {
            Some(idx) if idx != self.set.primary_index => {
                self.set.primary_index = idx;
                true
            }
            _ => false,
        }
    }

    /// Put a newly elected host in the primary slot.
    ///
    /// A host that is not displayed while the set is full takes over the
    /// non-primary entry; the displaced participant keeps its video and is
    /// eligible for backfill later.
    pub fn admit_host(&mut self, id: ParticipantId) -> bool {
        let mut changed = false;
        if !self.set.contains(id) {
            changed = true;
            if !self.on_video_available(id) {
                let slot = 1 - self.primary_index();
                if let Some(entry) = self.set.entries.get_mut(slot) {
                    *entry = id;
                }
            }
        }
        self.promote(id) || changed
    }

    pub fn display_set(&self) -> &DisplaySet {
        &self.set
    }

    pub fn primary_index(&self) -> usize {
        if self.set.entries.len() < MAX_DISPLAYED {
            0
        } else {
            self.set.primary_index
        }
    }

    pub fn is_full(&self) -> bool {
        self.set.entries.len() >= MAX_DISPLAYED
    }

    pub fn clear(&mut self) {
        self.set = DisplaySet::default();
    }

    fn remove(&mut self, id: ParticipantId) -> bool {
        let Some(idx) = self.set.entries.iter().position(|e| *e == id) else {
            return false;
        };
        self.set.entries.remove(idx);
        if idx == self.set.primary_index || self.set.entries.len() < MAX_DISPLAYED {
            self.set.primary_index = 0;
        } else if idx < self.set.primary_index {
            self.set.primary_index -= 1;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> ParticipantId {
        ParticipantId(n)
    }

    #[test]
    fn appends_until_full_then_ignores() {
        let mut sel = DisplaySetSelector::new();
        assert!(sel.on_video_available(id(1)));
        assert!(sel.on_video_available(id(2)));
        assert!(!sel.on_video_available(id(3)));
        assert_eq!(sel.display_set().entries, vec![id(1), id(2)]);
    }

    #[test]
    fn duplicate_offer_is_noop() {
        let mut sel = DisplaySetSelector::new();
        sel.on_video_available(id(1));
        assert!(!sel.on_video_available(id(1)));
        assert_eq!(sel.display_set().entries, vec![id(1)]);
    }

    #[test]
    fn swap_twice_restores_primary_and_keeps_order() {
        let mut sel = DisplaySetSelector::new();
        sel.on_video_available(id(1));
        sel.on_video_available(id(2));

        assert!(sel.swap_primary());
        assert_eq!(sel.primary_index(), 1);
        assert_eq!(sel.display_set().entries, vec![id(1), id(2)]);
        assert_eq!(sel.display_set().primary(), Some(id(2)));
        assert_eq!(sel.display_set().secondary(), Some(id(1)));

        assert!(sel.swap_primary());
        assert_eq!(sel.primary_index(), 0);
    }

    #[test]
    fn swap_with_single_entry_is_noop() {
        let mut sel = DisplaySetSelector::new();
        assert!(!sel.swap_primary());
        sel.on_video_available(id(1));
        assert!(!sel.swap_primary());
        assert_eq!(sel.primary_index(), 0);
    }

    #[test]
    fn removing_primary_resets_index() {
        let mut sel = DisplaySetSelector::new();
        sel.on_video_available(id(1));
        sel.on_video_available(id(2));
        sel.swap_primary();
        assert!(sel.on_video_unavailable(id(2)));
        assert_eq!(sel.display_set().entries, vec![id(1)]);
        assert_eq!(sel.primary_index(), 0);
    }

    #[test]
    fn removing_secondary_compacts() {
        let mut sel = DisplaySetSelector::new();
        sel.on_video_available(id(1));
        sel.on_video_available(id(2));
        sel.swap_primary();
        assert!(sel.on_participant_left(id(1)));
        assert_eq!(sel.display_set().entries, vec![id(2)]);
        assert_eq!(sel.display_set().primary(), Some(id(2)));
    }

    #[test]
    fn promote_moves_primary_without_reordering() {
        let mut sel = DisplaySetSelector::new();
        sel.on_video_available(id(1));
        sel.on_video_available(id(2));
        assert!(sel.promote(id(2)));
        assert_eq!(sel.display_set().entries, vec![id(1), id(2)]);
        assert_eq!(sel.primary_index(), 1);
        assert!(!sel.promote(id(2)));
        assert!(!sel.promote(id(7)));
    }

    #[test]
    fn host_takes_over_secondary_when_full() {
        let mut sel = DisplaySetSelector::new();
        sel.on_video_available(id(1));
        sel.on_video_available(id(2));

        assert!(sel.admit_host(id(3)));
        assert_eq!(sel.display_set().entries, vec![id(1), id(3)]);
        assert_eq!(sel.display_set().primary(), Some(id(3)));
        assert_eq!(sel.display_set().secondary(), Some(id(1)));
    }

    #[test]
    fn host_already_primary_is_unchanged() {
        let mut sel = DisplaySetSelector::new();
        sel.on_video_available(id(1));
        sel.on_video_available(id(2));
        assert!(!sel.admit_host(id(1)));
        assert!(sel.admit_host(id(2)));
        assert_eq!(sel.primary_index(), 1);
        assert_eq!(sel.display_set().entries, vec![id(1), id(2)]);
    }

    #[test]
    fn host_fills_free_slot() {
        let mut sel = DisplaySetSelector::new();
        sel.on_video_available(id(1));
        assert!(sel.admit_host(id(4)));
        assert_eq!(sel.display_set().entries, vec![id(1), id(4)]);
        assert_eq!(sel.primary_index(), 1);
    }

    #[derive(Clone, Copy, Debug)]
    enum Op {
        Available(u64),
        Unavailable(u64),
        Left(u64),
        Swap,
        Promote(u64),
        AdmitHost(u64),
    }

    fn random_ops(seed: u64, n: usize) -> Vec<Op> {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                let who = rng.gen_range(1..6);
                match rng.gen_range(0..6) {
                    0 => Op::Available(who),
                    1 => Op::Unavailable(who),
                    2 => Op::Left(who),
                    3 => Op::Swap,
                    4 => Op::AdmitHost(who),
                    _ => Op::Promote(who),
                }
            })
            .collect()
    }

    fn replay(ops: &[Op]) -> Vec<DisplaySet> {
        let mut sel = DisplaySetSelector::new();
        ops.iter()
            .map(|op| {
                match *op {
                    Op::Available(n) => sel.on_video_available(id(n)),
                    Op::Unavailable(n) => sel.on_video_unavailable(id(n)),
                    Op::Left(n) => sel.on_participant_left(id(n)),
                    Op::Swap => sel.swap_primary(),
                    Op::Promote(n) => sel.promote(id(n)),
                    Op::AdmitHost(n) => sel.admit_host(id(n)),
                };
                let mut set = sel.display_set().clone();
                set.primary_index = sel.primary_index();
                set
            })
            .collect()
    }

    #[test]
    fn replay_is_deterministic_and_bounded() {
        for seed in 0..20 {
            let ops = random_ops(seed, 200);
            let first = replay(&ops);
            let second = replay(&ops);
            assert_eq!(first, second, "seed {seed}");
            for set in &first {
                assert!(set.entries.len() <= MAX_DISPLAYED);
                assert!(set.entries.is_empty() || set.primary_index < set.entries.len());
            }
        }
    }

    #[test]
    fn removing_unknown_is_noop() {
        let mut sel = DisplaySetSelector::new();
        sel.on_video_available(id(1));
        assert!(!sel.on_video_unavailable(id(5)));
        assert_eq!(sel.display_set().entries, vec![id(1)]);
    }
}
