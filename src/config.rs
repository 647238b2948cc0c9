use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::color::Mode;
use crate::error::{Error, Result};
use crate::led::Rgb;

/// On-disk settings, keyed the way the configuration form writes them.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub baud: u32,
    pub midi_start: u8,
    pub midi_end: u8,
    pub num_leds: usize,
    pub com_port: Option<String>,
    /// Substring of the MIDI input port name. First port when unset.
    pub midi_device: Option<String>,
    pub wiz_lights: Vec<String>,
    #[serde(rename = "RGB")]
    pub rgb: Rgb,
    #[serde(rename = "RGB2")]
    pub rgb2: Rgb,
    pub mode: Mode,
    /// Whether the sustain pedal is honoured at all.
    pub sustain: bool,
    /// Scale colors by strike velocity.
    pub velocity: bool,
    /// Note count at which the bulbs reach full brightness.
    pub max_light_num_keys: usize,
    pub write_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            baud: 921_600,
            midi_start: 100,
            midi_end: 28,
            num_leds: 144,
            com_port: None,
            midi_device: None,
            wiz_lights: Vec::new(),
            rgb: [255, 0, 0],
            rgb2: [255, 0, 0],
            mode: Mode::Solid,
            sustain: true,
            velocity: false,
            max_light_num_keys: 10,
            write_interval_ms: 10,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.num_leds == 0 {
            return Err(Error::Config("numLeds must be at least 1".to_string()));
        }
        if self.midi_start > 127 || self.midi_end > 127 {
            return Err(Error::Config(format!(
                "MIDI range {}..{} must be within 0 to 127",
                self.midi_start, self.midi_end
            )));
        }
        if self.max_light_num_keys == 0 {
            return Err(Error::Config(
                "maxLightNumKeys must be at least 1".to_string(),
            ));
        }
        if self.baud == 0 {
            return Err(Error::Config("baud must not be zero".to_string()));
        }
        Ok(())
    }

    pub fn light_config(&self) -> LightConfig {
        LightConfig {
            color_a: self.rgb,
            color_b: self.rgb2,
            mode: self.mode,
            velocity_sensitive: self.velocity,
            num_leds: self.num_leds,
            key_start: self.midi_start,
            key_end: self.midi_end,
        }
    }
}

/// Per-session snapshot the lighting decisions read from.
#[derive(Debug, Clone, PartialEq)]
pub struct LightConfig {
    pub color_a: Rgb,
    pub color_b: Rgb,
    pub mode: Mode,
    pub velocity_sensitive: bool,
    pub num_leds: usize,
    pub key_start: u8,
    pub key_end: u8,
}

pub fn load_settings(path: impl AsRef<Path>) -> Result<Settings> {
    let content = fs::read_to_string(path)?;
    let settings: Settings = serde_json::from_str(&content)?;
    settings.validate()?;
    Ok(settings)
}
