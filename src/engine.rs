use log::{debug, info, trace, warn};
use std::collections::BTreeMap;
use tokio::sync::mpsc;

use crate::bulb::Ambient;
use crate::color::{ambient_color, ColorResolver};
use crate::config::{LightConfig, Settings};
use crate::led::{map_to_led, SegmentCommand};
use crate::note::{NoteEvent, NoteHistory, SUSTAIN_CONTROLLER};
use crate::tracker::{LightChange, NoteTracker};

/// Where segment commands go. Must not block for long.
pub trait SegmentSink {
    fn send(&mut self, command: SegmentCommand);
}

/// Where ambient (bulb) requests go. Must never wait on the bulbs.
pub trait AmbientSink {
    fn update(&mut self, ambient: Ambient);
}

/// Bulb brightness for `count` sounding notes, full at `max_notes`.
pub fn brightness(count: usize, max_notes: usize) -> u8 {
    if count == 0 {
        return 0;
    }
    if max_notes == 0 {
        return 255;
    }
    (255 * count / max_notes).min(255) as u8
}

pub struct Engine<S, A> {
    config: LightConfig,
    sustain_enabled: bool,
    max_notes: usize,
    tracker: NoteTracker,
    resolver: ColorResolver,
    // note -> LED index it was lit at
    lit: BTreeMap<u8, i32>,
    history: NoteHistory,
    last_ambient: Option<Ambient>,
    segments: S,
    ambient: A,
}

impl<S: SegmentSink, A: AmbientSink> Engine<S, A> {
    pub fn new(settings: &Settings, segments: S, ambient: A) -> Self {
        Self {
            config: settings.light_config(),
            sustain_enabled: settings.sustain,
            max_notes: settings.max_light_num_keys,
            tracker: NoteTracker::new(),
            resolver: ColorResolver::new(),
            lit: BTreeMap::new(),
            history: NoteHistory::default(),
            last_ambient: None,
            segments,
            ambient,
        }
    }

    /// Processes one event to completion. Bad events are logged and dropped.
    pub fn handle(&mut self, event: NoteEvent) {
        let changes: Vec<LightChange> = match event {
            NoteEvent::NoteOn(note, velocity) => {
                if !self.in_range(note) {
                    return;
                }
                self.tracker.note_on(note, velocity).into_iter().collect()
            }
            NoteEvent::NoteOff(note) => {
                if !self.in_range(note) {
                    return;
                }
                self.tracker.note_off(note).into_iter().collect()
            }
            NoteEvent::ControlChange(SUSTAIN_CONTROLLER, value) => {
                if !self.sustain_enabled {
                    trace!("Sustain disabled, ignoring pedal value {value}");
                    return;
                }
                let changes = self.tracker.pedal_toggle();
                debug!(
                    "Pedal {} (value {value})",
                    if self.tracker.pedal_engaged() { "engaged" } else { "released" }
                );
                changes
            }
            NoteEvent::ControlChange(controller, _) => {
                trace!("Ignoring controller {controller}");
                return;
            }
        };

        for change in changes {
            self.apply(change);
        }

        if self.tracker.is_silent() {
            self.clear_lit();
        }
        self.push_ambient();
    }

    /// Feeds events until every sender is gone.
    pub async fn run(mut self, mut events: mpsc::Receiver<NoteEvent>) -> Self {
        while let Some(event) = events.recv().await {
            self.handle(event);
        }
        info!("MIDI input closed, engine stopping");
        self
    }

    pub fn history(&self) -> &NoteHistory {
        &self.history
    }

    pub fn tracker(&self) -> &NoteTracker {
        &self.tracker
    }

    pub fn into_sinks(self) -> (S, A) {
        (self.segments, self.ambient)
    }

    fn in_range(&self, note: u8) -> bool {
        let ok = map_to_led(note, self.config.key_start, self.config.key_end, self.config.num_leds)
            .is_some();
        if !ok {
            warn!("Note out of range: {note}");
        }
        ok
    }

    fn apply(&mut self, change: LightChange) {
        match change {
            LightChange::On(note, velocity) => {
                let Some(led) = self.led_for(note) else {
                    return;
                };
                let color = self.resolver.resolve(&self.config, velocity, led);
                self.history.push(note, velocity);
                self.lit.insert(note, led);
                self.send(SegmentCommand::new(led, color, self.config.num_leds));
            }
            LightChange::Off(note) => {
                let led = self.lit.remove(&note).or_else(|| self.led_for(note));
                if let Some(led) = led {
                    self.send(SegmentCommand::off(led, self.config.num_leds));
                }
            }
        }
    }

    // Guard: once nothing is held or ringing, every LED must be dark.
    fn clear_lit(&mut self) {
        let leftover = std::mem::take(&mut self.lit);
        for (note, led) in leftover {
            debug!("Clearing stale LED for note {note}");
            self.send(SegmentCommand::off(led, self.config.num_leds));
        }
    }

    fn push_ambient(&mut self) {
        let count = self.tracker.union_len();
        let ambient = if count == 0 {
            Ambient::dark()
        } else {
            Ambient {
                color: ambient_color(&self.config),
                brightness: brightness(count, self.max_notes),
            }
        };
        if self.last_ambient == Some(ambient) {
            return;
        }
        debug!("Ambient {:?} at {}", ambient.color, ambient.brightness);
        self.last_ambient = Some(ambient);
        self.ambient.update(ambient);
    }

    fn led_for(&self, note: u8) -> Option<i32> {
        map_to_led(note, self.config.key_start, self.config.key_end, self.config.num_leds)
    }

    fn send(&mut self, command: SegmentCommand) {
        debug!("Segment {:?}", command);
        self.segments.send(command);
    }
}
