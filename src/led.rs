use serde_json::json;

pub type Rgb = [u8; 3];

pub const BLACK: Rgb = [0, 0, 0];

/// Maps a note to a strip position, or `None` when the note lies outside the
/// keyboard range. `key_start` may be above `key_end` for reversed strips.
///
/// Notes in the upper half of the strip land one LED further along than the
/// lower-half fold would put them.
pub fn map_to_led(note: u8, key_start: u8, key_end: u8, strip_len: usize) -> Option<i32> {
    let (low, high) = if key_start <= key_end {
        (key_start, key_end)
    } else {
        (key_end, key_start)
    };
    if !(low..=high).contains(&note) {
        return None;
    }

    let note = i32::from(note);
    let strip_len = strip_len as i32;
    let raw = strip_len - (note - i32::from(key_end)) * 2;
    // note > strip_len / 2, without truncating odd lengths
    if note * 2 > strip_len {
        Some(raw + 1)
    } else if raw > 0 {
        Some(raw)
    } else {
        Some(0)
    }
}

/// One update for the LED controller: lights `remaining` LEDs forward from
/// `start` in `color`, mirrored on the controller side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentCommand {
    pub start: i32,
    pub color: Rgb,
    pub remaining: i32,
}

impl SegmentCommand {
    pub fn new(led: i32, color: Rgb, strip_len: usize) -> Self {
        Self {
            start: led - 1,
            color,
            remaining: strip_len as i32 - led,
        }
    }

    pub fn off(led: i32, strip_len: usize) -> Self {
        Self::new(led, BLACK, strip_len)
    }

    pub fn is_off(&self) -> bool {
        self.color == BLACK
    }

    /// `{"seg":{"i":[start,[r,g,b],remaining]}}` plus a trailing newline.
    pub fn to_payload(&self) -> String {
        let body = json!({ "seg": { "i": [self.start, self.color, self.remaining] } });
        format!("{body}\n")
    }
}

/// Controller-wide power switch sent when a session starts or stops.
pub fn power_payload(on: bool) -> String {
    let body = if on {
        json!({ "state": { "on": true, "bri": 255 } })
    } else {
        json!({ "state": { "on": false } })
    };
    format!("{body}\n")
}
