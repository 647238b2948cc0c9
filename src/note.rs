use std::collections::VecDeque;

pub const SUSTAIN_CONTROLLER: u8 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteEvent {
    NoteOn(u8, u8),        // (midi number, velocity)
    NoteOff(u8),           // (midi number)
    ControlChange(u8, u8), // (controller number, value)
}

/// Decodes one raw MIDI message. Only channel 1 is listened to.
///
/// A note-on with velocity 0 stays a `NoteOn`: the keyboards this drives send
/// note-on for both press and release, and the tracker toggles on each one.
pub fn decode(message: &[u8]) -> Option<NoteEvent> {
    let &[status, data1, data2, ..] = message else {
        return None;
    };
    if data1 > 127 || data2 > 127 {
        return None;
    }

    match status {
        0x90 => Some(NoteEvent::NoteOn(data1, data2)),
        0x80 => Some(NoteEvent::NoteOff(data1)),
        0xB0 => Some(NoteEvent::ControlChange(data1, data2)),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayedNote {
    pub note: u8,
    pub velocity: u8,
}

/// Rolling record of the most recent note-ons. Telemetry only.
#[derive(Debug)]
pub struct NoteHistory {
    notes: VecDeque<PlayedNote>,
    capacity: usize,
}

impl NoteHistory {
    pub const DEFAULT_CAPACITY: usize = 32;

    pub fn new(capacity: usize) -> Self {
        Self {
            notes: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, note: u8, velocity: u8) {
        if self.capacity == 0 {
            return;
        }
        if self.notes.len() == self.capacity {
            self.notes.pop_front();
        }
        self.notes.push_back(PlayedNote { note, velocity });
    }

    /// Oldest first.
    pub fn recent(&self) -> impl Iterator<Item = &PlayedNote> {
        self.notes.iter()
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}

impl Default for NoteHistory {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
