//! Held/sustained note bookkeeping under toggle-style sustain pedal handling.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightChange {
    On(u8, u8), // (midi number, velocity)
    Off(u8),
}

#[derive(Debug, Default)]
pub struct NoteTracker {
    held: BTreeMap<u8, u8>,
    sustained: BTreeMap<u8, u8>,
    pedal_engaged: bool,
}

impl NoteTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The input device sends note-on for both press and release, so each
    /// note-on toggles the key.
    pub fn note_on(&mut self, note: u8, velocity: u8) -> Option<LightChange> {
        if !self.pedal_engaged {
            if self.held.remove(&note).is_some() {
                return Some(LightChange::Off(note));
            }
            self.held.insert(note, velocity);
            return Some(LightChange::On(note, velocity));
        }

        // Under the pedal a release leaves the note ringing.
        if self.held.remove(&note).is_some() {
            return None;
        }
        // Re-striking a ringing note re-attacks it with the new velocity.
        self.held.insert(note, velocity);
        self.sustained.insert(note, velocity);
        Some(LightChange::On(note, velocity))
    }

    pub fn note_off(&mut self, note: u8) -> Option<LightChange> {
        self.held.remove(&note)?;
        if self.pedal_engaged {
            None
        } else {
            Some(LightChange::Off(note))
        }
    }

    /// Flips the pedal. Releasing it turns off every ringing note whose key is
    /// no longer down.
    pub fn pedal_toggle(&mut self) -> Vec<LightChange> {
        if !self.pedal_engaged {
            self.pedal_engaged = true;
            self.sustained = self.held.clone();
            return Vec::new();
        }

        self.pedal_engaged = false;
        let sustained = std::mem::take(&mut self.sustained);
        sustained
            .into_keys()
            .filter(|note| !self.held.contains_key(note))
            .map(LightChange::Off)
            .collect()
    }

    pub fn pedal_engaged(&self) -> bool {
        self.pedal_engaged
    }

    pub fn is_held(&self, note: u8) -> bool {
        self.held.contains_key(&note)
    }

    pub fn is_sustained(&self, note: u8) -> bool {
        self.sustained.contains_key(&note)
    }

    pub fn sustained_velocity(&self, note: u8) -> Option<u8> {
        self.sustained.get(&note).copied()
    }

    /// Number of distinct notes either held or ringing.
    pub fn union_len(&self) -> usize {
        self.held.len()
            + self
                .sustained
                .keys()
                .filter(|note| !self.held.contains_key(note))
                .count()
    }

    pub fn is_silent(&self) -> bool {
        self.held.is_empty() && self.sustained.is_empty()
    }
}
