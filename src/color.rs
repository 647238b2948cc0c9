use serde::{Deserialize, Serialize};

use crate::config::LightConfig;
use crate::led::Rgb;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Mode {
    #[default]
    Solid,
    Alternating,
    Gradient,
    RainbowGradient,
}

#[derive(Debug, Default)]
pub struct ColorResolver {
    alternate: bool,
}

impl ColorResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Color for a freshly lit note. In alternating mode every call advances
    /// the flip-flop, starting with color A.
    pub fn resolve(&mut self, config: &LightConfig, velocity: u8, led: i32) -> Rgb {
        let base = match config.mode {
            Mode::Solid => config.color_a,
            Mode::Alternating => {
                let use_b = self.alternate;
                self.alternate = !self.alternate;
                if use_b {
                    config.color_b
                } else {
                    config.color_a
                }
            }
            Mode::Gradient => {
                gradient(config.color_a, config.color_b, position(led, config.num_leds))
            }
            Mode::RainbowGradient => rainbow(position(led, config.num_leds)),
        };

        let velocity = if config.velocity_sensitive { velocity } else { 127 };
        scale_by_velocity(base, velocity)
    }
}

/// Unscaled color the bulbs follow while anything is sounding.
pub fn ambient_color(config: &LightConfig) -> Rgb {
    match config.mode {
        Mode::Solid | Mode::Alternating => config.color_a,
        Mode::Gradient => gradient(config.color_a, config.color_b, 0.5),
        Mode::RainbowGradient => rainbow(0.5),
    }
}

/// Velocity 0 still keeps 100/255 of the color.
pub fn scale_by_velocity(color: Rgb, velocity: u8) -> Rgb {
    let velocity = f64::from(velocity.min(127));
    let level = 100.0 + velocity / 127.0 * 155.0;
    color.map(|c| ((level / 255.0) * f64::from(c)).round() as u8)
}

// 0.0 at the first LED, 1.0 at the last
fn position(led: i32, strip_len: usize) -> f64 {
    if strip_len <= 1 {
        return 0.0;
    }
    let span = (strip_len - 1) as f64;
    (f64::from(led - 1) / span).clamp(0.0, 1.0)
}

fn gradient(a: Rgb, b: Rgb, t: f64) -> Rgb {
    let mut out = [0; 3];
    for (i, channel) in out.iter_mut().enumerate() {
        let (from, to) = (f64::from(a[i]), f64::from(b[i]));
        *channel = (from + (to - from) * t).round() as u8;
    }
    out
}

fn rainbow(t: f64) -> Rgb {
    hsv_to_rgb(t * 360.0, 1.0, 1.0)
}

fn hsv_to_rgb(hue: f64, saturation: f64, value: f64) -> Rgb {
    let hue = hue.rem_euclid(360.0);
    let chroma = value * saturation;
    let x = chroma * (1.0 - ((hue / 60.0) % 2.0 - 1.0).abs());
    let m = value - chroma;
    let (r, g, b) = match hue {
        h if h < 60.0 => (chroma, x, 0.0),
        h if h < 120.0 => (x, chroma, 0.0),
        h if h < 180.0 => (0.0, chroma, x),
        h if h < 240.0 => (0.0, x, chroma),
        h if h < 300.0 => (x, 0.0, chroma),
        _ => (chroma, 0.0, x),
    };
    [r, g, b].map(|c| ((c + m) * 255.0).round() as u8)
}
