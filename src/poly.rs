//! A poly: one sounding note event owning up to four partials.

/// Lifecycle of a poly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PolyState {
    /// Note-on received, key still down.
    Playing,
    /// Key released while the hold pedal was down.
    Held,
    /// Envelopes are decaying towards silence.
    Releasing,
    #[default]
    Inactive,
}

/// One note event. Links to its partials and owning part are pool indices;
/// the pools live in the synth.
#[derive(Clone, Debug, Default)]
pub struct Poly {
    state: PolyState,
    key: u8,
    velocity: u8,
    sustain: bool,
    partials: [Option<usize>; 4],
    active_partial_count: usize,
    part: Option<usize>,
}

impl Poly {
    /// Bind the poly to a part while it is loaned out of the free pool.
    pub fn set_part(&mut self, part: Option<usize>) {
        self.part = part;
    }

    pub fn part(&self) -> Option<usize> {
        self.part
    }

    /// Start the poly for a note. Partial back-links are indices into the
    /// synth's partial pool.
    pub fn reset(&mut self, key: u8, velocity: u8, sustain: bool, partials: [Option<usize>; 4]) {
        if self.is_active() {
            // The caller must never start a poly that still has partials.
            log::warn!("reset of an active poly on key {}", self.key);
        }
        self.state = PolyState::Playing;
        self.key = key;
        self.velocity = velocity;
        self.sustain = sustain;
        self.partials = partials;
        self.active_partial_count = partials.iter().flatten().count();
        if self.active_partial_count == 0 {
            self.state = PolyState::Inactive;
        }
    }

    /// Key release. Returns true if the poly state changed. With the hold
    /// pedal down a playing poly is parked in `Held` instead of releasing.
    pub fn note_off(&mut self, pedal_held: bool) -> bool {
        match (self.state, pedal_held) {
            (PolyState::Playing, true) => {
                self.state = PolyState::Held;
                true
            }
            (PolyState::Playing, false) | (PolyState::Held, false) => {
                self.state = PolyState::Releasing;
                true
            }
            _ => false,
        }
    }

    /// Hold pedal release: held polys start releasing.
    pub fn stop_pedal_hold(&mut self) -> bool {
        if self.state != PolyState::Held {
            return false;
        }
        self.state = PolyState::Releasing;
        true
    }

    /// Force the poly into its release phase regardless of pedal state.
    /// Returns true if it was not already releasing or dead.
    pub fn start_decay(&mut self) -> bool {
        if self.state == PolyState::Inactive || self.state == PolyState::Releasing {
            return false;
        }
        self.state = PolyState::Releasing;
        true
    }

    /// Called when one of the poly's partials deactivates. Returns true
    /// when that was the last one and the poly is finished.
    pub fn partial_deactivated(&mut self, partial_index: usize) -> bool {
        for slot in self.partials.iter_mut() {
            if *slot == Some(partial_index) {
                *slot = None;
                self.active_partial_count -= 1;
            }
        }
        if self.active_partial_count == 0 {
            self.state = PolyState::Inactive;
            return true;
        }
        false
    }

    pub fn state(&self) -> PolyState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state != PolyState::Inactive
    }

    pub fn key(&self) -> u8 {
        self.key
    }

    pub fn velocity(&self) -> u8 {
        self.velocity
    }

    pub fn can_sustain(&self) -> bool {
        self.sustain
    }

    pub fn partials(&self) -> &[Option<usize>; 4] {
        &self.partials
    }

    pub fn active_partial_count(&self) -> usize {
        self.active_partial_count
    }
}
