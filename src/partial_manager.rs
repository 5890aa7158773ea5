//! The partial allocator: reserves, pre-empts and releases partial slots.

use crate::poly::PolyState;
use crate::synth::{ReportEvent, Synth};

/// Pool bookkeeping: free stacks and the reservation table.
pub struct PartialManager {
    inactive_partials: Vec<usize>,
    free_polys: Vec<usize>,
    reserve: [u8; 9],
}

impl PartialManager {
    pub fn new(partial_count: usize) -> PartialManager {
        PartialManager {
            // The stack allocates low slot numbers first.
            inactive_partials: (0..partial_count).rev().collect(),
            free_polys: (0..partial_count).rev().collect(),
            reserve: [0; 9],
        }
    }

    pub fn free_partial_count(&self) -> usize {
        self.inactive_partials.len()
    }

    pub fn alloc_partial(&mut self) -> Option<usize> {
        self.inactive_partials.pop()
    }

    /// Return a deactivated partial to the pool.
    pub fn partial_deactivated(&mut self, partial_index: usize) {
        self.inactive_partials.push(partial_index);
    }

    pub fn assign_poly(&mut self) -> Option<usize> {
        self.free_polys.pop()
    }

    pub fn poly_freed(&mut self, poly_index: usize) {
        self.free_polys.push(poly_index);
    }

    /// Install the reservation table and return the number of partials it
    /// accounts for.
    pub fn set_reserve(&mut self, reserve: [u8; 9]) -> u32 {
        self.reserve = reserve;
        reserve.iter().map(|&r| u32::from(r)).sum()
    }

    pub fn reserve(&self, part_num: usize) -> usize {
        usize::from(self.reserve[part_num])
    }
}

/// Parts in abort-priority order down to `min_part` inclusive: 7..0, with -1
/// standing for the rhythm part, which has the highest priority.
fn parts_by_priority(min_part: i32) -> impl Iterator<Item = usize> {
    (min_part..=7).rev().map(|p| if p < 0 { 8 } else { p as usize })
}

impl Synth {
    pub(crate) fn part_active_partial_count(&self, part_num: usize) -> usize {
        self.parts[part_num]
            .active_polys()
            .iter()
            .map(|&poly| self.polys[poly].active_partial_count())
            .sum()
    }

    fn part_active_non_releasing_partial_count(&self, part_num: usize) -> usize {
        self.parts[part_num]
            .active_polys()
            .iter()
            .filter(|&&poly| self.polys[poly].state() != PolyState::Releasing)
            .map(|&poly| self.polys[poly].active_partial_count())
            .sum()
    }

    fn part_exceeds_reserve(&self, part_num: usize) -> bool {
        self.part_active_partial_count(part_num) > self.partial_manager.reserve(part_num)
    }

    /// Begin aborting a poly: all of its partials get a maximum-rate closing
    /// ramp, and MIDI processing is held back until they die.
    pub(crate) fn abort_poly(&mut self, poly_index: usize) {
        let state = self.polys[poly_index].state();
        if state == PolyState::Inactive {
            return;
        }
        if state == PolyState::Playing || state == PolyState::Held {
            if let Some(part) = self.polys[poly_index].part() {
                self.report(ReportEvent::PlayingPolySilenced { part: part as u8 });
            }
        }
        self.polys[poly_index].start_decay();
        for partial_index in (*self.polys[poly_index].partials()).into_iter().flatten() {
            self.partials[partial_index].start_abort();
        }
        self.aborting_poly = Some(poly_index);
    }

    fn abort_first_poly_in_state(&mut self, part_num: usize, state: PolyState) -> bool {
        let poly = self.parts[part_num]
            .active_polys()
            .iter()
            .copied()
            .find(|&poly| self.polys[poly].state() == state);
        match poly {
            Some(poly) => {
                self.abort_poly(poly);
                true
            }
            None => false,
        }
    }

    /// Abort the part's first held poly, or failing that its first poly in
    /// any state.
    fn abort_first_poly_prefer_held(&mut self, part_num: usize) -> bool {
        if self.abort_first_poly_in_state(part_num, PolyState::Held) {
            return true;
        }
        let poly = self.parts[part_num].active_polys().first().copied();
        match poly {
            Some(poly) => {
                self.abort_poly(poly);
                true
            }
            None => false,
        }
    }

    fn abort_first_poly_on_part_prefer_releasing_then_held(&mut self, part_num: usize) -> bool {
        if self.abort_first_poly_in_state(part_num, PolyState::Releasing) {
            return true;
        }
        self.abort_first_poly_prefer_held(part_num)
    }

    /// Find the lowest-priority part exceeding its reservation with a
    /// releasing poly and kill that poly.
    fn abort_first_releasing_poly_where_reserve_exceeded(&mut self, min_part: i32) -> bool {
        let min_part = if min_part == 8 { -1 } else { min_part };
        for part_num in parts_by_priority(min_part) {
            if self.part_exceeds_reserve(part_num)
                && self.abort_first_poly_in_state(part_num, PolyState::Releasing)
            {
                return true;
            }
        }
        false
    }

    /// Find the lowest-priority part exceeding its reservation with any
    /// poly and kill its first held (else first) poly.
    fn abort_first_poly_prefer_held_where_reserve_exceeded(&mut self, min_part: i32) -> bool {
        let min_part = if min_part == 8 { -1 } else { min_part };
        for part_num in parts_by_priority(min_part) {
            if self.part_exceeds_reserve(part_num) && self.abort_first_poly_prefer_held(part_num) {
                return true;
            }
        }
        false
    }

    /// Old-generation variant: voice parts only, preferring releasing and
    /// then held polys on the first over-reserve part found.
    fn abort_first_poly_prefer_releasing_then_held_where_reserve_exceeded(
        &mut self,
        min_part: usize,
    ) -> bool {
        for part_num in (min_part..=7).rev() {
            if self.part_exceeds_reserve(part_num) {
                return self.abort_first_poly_on_part_prefer_releasing_then_held(part_num);
            }
        }
        false
    }

    /// Ensure that `needed` partials are free or about to be freed for a
    /// note on `part_num`. On false the note must be rejected.
    pub(crate) fn free_partials(&mut self, needed: usize, part_num: usize) -> bool {
        if self.control_rom.features().new_gen_note_cancellation {
            self.free_partials_new_gen(needed, part_num)
        } else {
            self.free_partials_old_gen(needed, part_num)
        }
    }

    fn free_partials_old_gen(&mut self, needed: usize, part_num: usize) -> bool {
        while self.aborting_poly.is_none() && self.partial_manager.free_partial_count() < needed {
            if self.part_active_non_releasing_partial_count(part_num) + needed
                > self.partial_manager.reserve(part_num)
            {
                // If priority is given to earlier polys, there is nothing
                // we can do.
                if self.mem.patch_temp(part_num).patch.assign_mode & 1 != 0 {
                    return false;
                }

                if needed <= self.partial_manager.reserve(part_num) {
                    // Within this part's reservation: only reclaim here.
                    self.abort_first_poly_on_part_prefer_releasing_then_held(part_num);
                    continue;
                }

                // Borrowing beyond the reserve: try parts of lesser
                // priority first. The hardware's behaviour for the rhythm
                // part here is undefined; all voice parts are traversed.
                if self.abort_first_poly_prefer_releasing_then_held_where_reserve_exceeded(
                    if part_num < 8 { part_num } else { 0 },
                ) {
                    continue;
                }

                if self.part_exceeds_reserve(8)
                    && self.abort_first_poly_on_part_prefer_releasing_then_held(8)
                {
                    continue;
                }

                // Alas, this one will be muted.
                return false;
            }

            // We will stay within the reserve; reclaim from other parts,
            // lowest priority first.
            if self.abort_first_poly_prefer_releasing_then_held_where_reserve_exceeded(0) {
                continue;
            }
            if self.part_exceeds_reserve(8)
                && self.abort_first_poly_on_part_prefer_releasing_then_held(8)
            {
                continue;
            }
            if self.abort_first_poly_on_part_prefer_releasing_then_held(part_num) {
                continue;
            }
            return false;
        }
        true
    }

    fn free_partials_new_gen(&mut self, needed: usize, part_num: usize) -> bool {
        // Matches the allocation order of the later control ROMs: parts are
        // swept 7..0 and then the rhythm part, least important first.
        if needed == 0 {
            return true;
        }
        if self.partial_manager.free_partial_count() >= needed {
            return true;
        }

        loop {
            if !self.abort_first_releasing_poly_where_reserve_exceeded(0) {
                break;
            }
            if self.aborting_poly.is_some()
                || self.partial_manager.free_partial_count() >= needed
            {
                return true;
            }
        }

        if self.part_active_non_releasing_partial_count(part_num) + needed
            > self.partial_manager.reserve(part_num)
        {
            // We would end up over-reserve with the new note.
            if self.mem.patch_temp(part_num).patch.assign_mode & 1 != 0 {
                // Priority is given to earlier polys, so just give up.
                return false;
            }
            // Only abort held polys on the target part and lower-priority
            // parts; releasing polys are left to finish on their own here.
            loop {
                if !self.abort_first_poly_prefer_held_where_reserve_exceeded(part_num as i32) {
                    break;
                }
                if self.aborting_poly.is_some()
                    || self.partial_manager.free_partial_count() >= needed
                {
                    return true;
                }
            }
            if needed > self.partial_manager.reserve(part_num) {
                return false;
            }
        } else {
            // Enough partials are reserved for this poly: sweep every part
            // including rhythm for over-reserve usage.
            loop {
                if !self.abort_first_poly_prefer_held_where_reserve_exceeded(-1) {
                    break;
                }
                if self.aborting_poly.is_some()
                    || self.partial_manager.free_partial_count() >= needed
                {
                    return true;
                }
            }
        }

        // Lastly, abort polys on the target part itself.
        loop {
            if !self.abort_first_poly_prefer_held(part_num) {
                break;
            }
            if self.aborting_poly.is_some()
                || self.partial_manager.free_partial_count() >= needed
            {
                return true;
            }
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_order_sweeps_voice_parts_before_rhythm() {
        let order: Vec<usize> = parts_by_priority(-1).collect();
        assert_eq!(order, vec![7, 6, 5, 4, 3, 2, 1, 0, 8]);
        let from_three: Vec<usize> = parts_by_priority(3).collect();
        assert_eq!(from_three, vec![7, 6, 5, 4, 3]);
    }

    #[test]
    fn free_stack_allocates_low_slots_first() {
        let mut manager = PartialManager::new(4);
        assert_eq!(manager.alloc_partial(), Some(0));
        assert_eq!(manager.alloc_partial(), Some(1));
        manager.partial_deactivated(0);
        assert_eq!(manager.alloc_partial(), Some(0));
        assert_eq!(manager.free_partial_count(), 2);
    }

    #[test]
    fn reserve_table_reports_its_sum() {
        let mut manager = PartialManager::new(32);
        let sum = manager.set_reserve([2, 6, 2, 2, 2, 2, 2, 2, 12]);
        assert_eq!(sum, 32);
        assert_eq!(manager.reserve(1), 6);
        assert_eq!(manager.reserve(8), 12);
    }
}
