//! Ambient smart-bulb control.
//!
//! The engine only ever hands over finished `(color, brightness)` pairs. A
//! background task owns the bulbs, applies the newest pair it has seen, and
//! puts every bulb back the way it found it on shutdown.

use log::{debug, info, warn};
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::engine::AmbientSink;
use crate::error::{Error, Result};
use crate::led::{Rgb, BLACK};

pub const WIZ_PORT: u16 = 38899;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ambient {
    pub color: Rgb,
    pub brightness: u8,
}

impl Ambient {
    pub fn dark() -> Self {
        Self {
            color: BLACK,
            brightness: 0,
        }
    }

    /// Only black turns the bulbs off; a sounding note at brightness 0 still
    /// keeps them on.
    pub fn is_dark(&self) -> bool {
        self.color == BLACK
    }
}

/// What a bulb reports about itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulbState {
    pub on: bool,
    pub brightness: Option<u8>,
    /// r, g, b, cold white, warm white
    pub rgbww: Option<[u8; 5]>,
    pub color_temp: Option<u32>,
    pub ratio: Option<u8>,
    pub scene_id: Option<u32>,
}

pub trait Bulb: Send + 'static {
    fn name(&self) -> &str;

    fn turn_on(&mut self, rgbww: [u8; 5], brightness: u8) -> impl Future<Output = Result<()>> + Send;

    fn turn_off(&mut self) -> impl Future<Output = Result<()>> + Send;

    fn read_state(&mut self) -> impl Future<Output = Result<BulbState>> + Send;

    fn restore(&mut self, state: &BulbState) -> impl Future<Output = Result<()>> + Send;
}

/// WiZ bulb spoken to with JSON datagrams.
pub struct WizBulb {
    target: String,
    timeout: Duration,
}

impl WizBulb {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

    /// `host` may carry a port; the WiZ port is used otherwise.
    pub fn new(host: &str) -> Self {
        let target = if host.contains(':') {
            host.to_string()
        } else {
            format!("{host}:{WIZ_PORT}")
        };
        Self {
            target,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let body = json!({ "method": method, "params": params }).to_string();

        // Fresh socket per request so a late reply never answers the next one.
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(self.target.as_str()).await?;
        socket.send(body.as_bytes()).await?;

        let mut buf = [0u8; 1024];
        let len = timeout(self.timeout, socket.recv(&mut buf))
            .await
            .map_err(|_| Error::Timeout(format!("{method} from {}", self.target)))??;

        let reply: Value = serde_json::from_slice(&buf[..len])?;
        if let Some(error) = reply.get("error") {
            return Err(Error::Bulb {
                addr: self.target.clone(),
                reason: error.to_string(),
            });
        }
        Ok(reply.get("result").cloned().unwrap_or(Value::Null))
    }
}

impl Bulb for WizBulb {
    fn name(&self) -> &str {
        &self.target
    }

    async fn turn_on(&mut self, rgbww: [u8; 5], brightness: u8) -> Result<()> {
        self.request("setPilot", color_params(rgbww, brightness)).await?;
        Ok(())
    }

    async fn turn_off(&mut self) -> Result<()> {
        self.request("setPilot", json!({ "state": false })).await?;
        Ok(())
    }

    async fn read_state(&mut self) -> Result<BulbState> {
        let pilot = self.request("getPilot", json!({})).await?;
        Ok(state_from_pilot(&pilot))
    }

    async fn restore(&mut self, state: &BulbState) -> Result<()> {
        if !state.on {
            return self.turn_off().await;
        }
        self.request("setPilot", restore_params(state)).await?;
        Ok(())
    }
}

// The bulb accepts dimming 10..=100 percent.
fn to_dimming(brightness: u8) -> u8 {
    let percent = (f64::from(brightness) / 255.0 * 100.0).round() as u8;
    percent.max(10)
}

fn from_dimming(dimming: u64) -> u8 {
    (dimming.min(100) as f64 / 100.0 * 255.0).round() as u8
}

fn color_params(rgbww: [u8; 5], brightness: u8) -> Value {
    let [r, g, b, c, w] = rgbww;
    json!({
        "state": true,
        "r": r, "g": g, "b": b, "c": c, "w": w,
        "dimming": to_dimming(brightness),
    })
}

fn state_from_pilot(pilot: &Value) -> BulbState {
    let channel = |key: &str| pilot.get(key).and_then(Value::as_u64).map(|v| v.min(255) as u8);
    let rgbww = match (channel("r"), channel("g"), channel("b")) {
        (Some(r), Some(g), Some(b)) => Some([
            r,
            g,
            b,
            channel("c").unwrap_or(0),
            channel("w").unwrap_or(0),
        ]),
        _ => None,
    };
    BulbState {
        on: pilot.get("state").and_then(Value::as_bool).unwrap_or(false),
        brightness: pilot.get("dimming").and_then(Value::as_u64).map(from_dimming),
        rgbww,
        color_temp: pilot.get("temp").and_then(Value::as_u64).map(|t| t as u32),
        ratio: channel("ratio"),
        scene_id: pilot
            .get("sceneId")
            .and_then(Value::as_u64)
            .filter(|&id| id != 0)
            .map(|id| id as u32),
    }
}

fn restore_params(state: &BulbState) -> Value {
    let mut params = json!({ "state": true });
    if let Some(scene) = state.scene_id {
        params["sceneId"] = json!(scene);
    } else if let Some(temp) = state.color_temp {
        params["temp"] = json!(temp);
    } else if let Some([r, g, b, c, w]) = state.rgbww {
        params["r"] = json!(r);
        params["g"] = json!(g);
        params["b"] = json!(b);
        params["c"] = json!(c);
        params["w"] = json!(w);
    }
    if let Some(brightness) = state.brightness {
        params["dimming"] = json!(to_dimming(brightness));
    }
    if let Some(ratio) = state.ratio {
        params["ratio"] = json!(ratio);
    }
    params
}

/// The engine's side of the bulb channel. Sending never waits; a newer value
/// replaces one the worker has not picked up yet.
pub struct BulbHandle {
    tx: watch::Sender<Ambient>,
}

impl AmbientSink for BulbHandle {
    fn update(&mut self, ambient: Ambient) {
        self.tx.send_replace(ambient);
    }
}

#[derive(Debug)]
pub struct FinalState {
    pub bulb: String,
    pub state: Option<BulbState>,
}

pub struct BulbSynchronizer;

impl BulbSynchronizer {
    /// Starts the worker. Dropping the returned handle ends the session; the
    /// join handle then resolves once every bulb has been restored.
    pub fn spawn<B: Bulb>(bulbs: Vec<B>) -> (BulbHandle, JoinHandle<Vec<FinalState>>) {
        let (tx, rx) = watch::channel(Ambient::dark());
        let worker = tokio::spawn(run(bulbs, rx));
        (BulbHandle { tx }, worker)
    }
}

async fn run<B: Bulb>(mut bulbs: Vec<B>, mut rx: watch::Receiver<Ambient>) -> Vec<FinalState> {
    let mut cached = Vec::with_capacity(bulbs.len());
    for bulb in bulbs.iter_mut() {
        match bulb.read_state().await {
            Ok(state) => {
                debug!("Cached state of {}: {:?}", bulb.name(), state);
                cached.push(Some(state));
            }
            Err(e) => {
                warn!("Could not read {}: {e}", bulb.name());
                cached.push(None);
            }
        }
    }

    while rx.changed().await.is_ok() {
        let ambient = *rx.borrow_and_update();
        apply(&mut bulbs, ambient).await;
    }

    finalize(&mut bulbs, &cached).await
}

async fn apply<B: Bulb>(bulbs: &mut [B], ambient: Ambient) {
    for bulb in bulbs.iter_mut() {
        let result = if ambient.is_dark() {
            bulb.turn_off().await
        } else {
            let [r, g, b] = ambient.color;
            bulb.turn_on([r, g, b, 0, 0], ambient.brightness).await
        };
        if let Err(e) = result {
            warn!("Bulb {} update failed: {e}", bulb.name());
        }
    }
}

async fn finalize<B: Bulb>(bulbs: &mut [B], cached: &[Option<BulbState>]) -> Vec<FinalState> {
    let mut finals = Vec::with_capacity(bulbs.len());
    for (bulb, saved) in bulbs.iter_mut().zip(cached) {
        let state = match bulb.read_state().await {
            Ok(state) => Some(state),
            Err(e) => {
                warn!("Could not read back {}: {e}", bulb.name());
                None
            }
        };
        if let Some(saved) = saved {
            match bulb.restore(saved).await {
                Ok(()) => info!("Restored {}", bulb.name()),
                Err(e) => warn!("Could not restore {}: {e}", bulb.name()),
            }
        }
        finals.push(FinalState {
            bulb: bulb.name().to_string(),
            state,
        });
    }
    finals
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        On([u8; 5], u8),
        Off,
        Read,
        Restore(BulbState),
    }

    struct FakeBulb {
        name: String,
        calls: Arc<Mutex<Vec<Call>>>,
        state: BulbState,
        fail_updates: bool,
    }

    impl FakeBulb {
        fn new(name: &str) -> (Self, Arc<Mutex<Vec<Call>>>) {
            let calls = Arc::new(Mutex::new(Vec::new()));
            let bulb = Self {
                name: name.to_string(),
                calls: calls.clone(),
                state: BulbState {
                    on: true,
                    brightness: Some(128),
                    color_temp: Some(2700),
                    ..BulbState::default()
                },
                fail_updates: false,
            };
            (bulb, calls)
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl Bulb for FakeBulb {
        fn name(&self) -> &str {
            &self.name
        }

        async fn turn_on(&mut self, rgbww: [u8; 5], brightness: u8) -> Result<()> {
            self.record(Call::On(rgbww, brightness));
            if self.fail_updates {
                return Err(Error::Timeout(self.name.clone()));
            }
            Ok(())
        }

        async fn turn_off(&mut self) -> Result<()> {
            self.record(Call::Off);
            Ok(())
        }

        async fn read_state(&mut self) -> Result<BulbState> {
            self.record(Call::Read);
            Ok(self.state.clone())
        }

        async fn restore(&mut self, state: &BulbState) -> Result<()> {
            self.record(Call::Restore(state.clone()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn only_the_latest_request_is_applied() {
        let (bulb, calls) = FakeBulb::new("desk");
        let (mut handle, worker) = BulbSynchronizer::spawn(vec![bulb]);

        handle.update(Ambient { color: [255, 0, 0], brightness: 25 });
        handle.update(Ambient { color: [255, 0, 0], brightness: 51 });
        handle.update(Ambient { color: [255, 0, 0], brightness: 76 });
        drop(handle);

        let finals = worker.await.unwrap();
        let calls = calls.lock().unwrap().clone();
        let saved = finals[0].state.clone().unwrap();
        assert_eq!(
            calls,
            vec![
                Call::Read,
                Call::On([255, 0, 0, 0, 0], 76),
                Call::Read,
                Call::Restore(saved),
            ]
        );
        assert_eq!(finals[0].bulb, "desk");
    }

    #[tokio::test]
    async fn dark_request_turns_bulbs_off() {
        let (first, first_calls) = FakeBulb::new("a");
        let (second, second_calls) = FakeBulb::new("b");
        let (mut handle, worker) = BulbSynchronizer::spawn(vec![first, second]);

        handle.update(Ambient { color: [0, 0, 0], brightness: 0 });
        drop(handle);
        let finals = worker.await.unwrap();

        assert_eq!(finals.len(), 2);
        for calls in [first_calls, second_calls] {
            assert_eq!(calls.lock().unwrap()[1], Call::Off);
        }
    }

    #[tokio::test]
    async fn zero_brightness_with_color_keeps_bulbs_on() {
        let (bulb, calls) = FakeBulb::new("lamp");
        let (mut handle, worker) = BulbSynchronizer::spawn(vec![bulb]);

        handle.update(Ambient { color: [255, 0, 0], brightness: 0 });
        drop(handle);
        worker.await.unwrap();

        assert_eq!(calls.lock().unwrap()[1], Call::On([255, 0, 0, 0, 0], 0));
    }

    #[tokio::test]
    async fn failures_do_not_stop_the_worker() {
        let (mut bulb, calls) = FakeBulb::new("flaky");
        bulb.fail_updates = true;
        let (mut handle, worker) = BulbSynchronizer::spawn(vec![bulb]);

        handle.update(Ambient { color: [0, 255, 0], brightness: 200 });
        tokio::task::yield_now().await;
        handle.update(Ambient { color: [0, 0, 255], brightness: 100 });
        drop(handle);

        worker.await.unwrap();
        let calls = calls.lock().unwrap();
        assert!(calls.contains(&Call::On([0, 0, 255, 0, 0], 100)));
        assert!(matches!(calls.last(), Some(Call::Restore(_))));
    }

    #[test]
    fn brightness_maps_to_wiz_dimming() {
        assert_eq!(to_dimming(0), 10);
        assert_eq!(to_dimming(255), 100);
        assert_eq!(to_dimming(128), 50);
        assert_eq!(from_dimming(100), 255);
        assert_eq!(from_dimming(50), 128);
    }

    #[test]
    fn color_request_body() {
        let params = color_params([255, 10, 0, 0, 0], 255);
        assert_eq!(params["r"], 255);
        assert_eq!(params["g"], 10);
        assert_eq!(params["dimming"], 100);
        assert_eq!(params["state"], true);
    }

    #[test]
    fn parses_pilot_reply() {
        let pilot = json!({
            "mac": "a8bb50000000", "rssi": -61, "state": true, "sceneId": 0,
            "r": 255, "g": 40, "b": 0, "c": 0, "w": 12, "dimming": 50
        });
        let state = state_from_pilot(&pilot);
        assert!(state.on);
        assert_eq!(state.rgbww, Some([255, 40, 0, 0, 12]));
        assert_eq!(state.brightness, Some(128));
        assert_eq!(state.scene_id, None);
        assert_eq!(state.color_temp, None);
    }

    #[test]
    fn restore_prefers_scene_then_temperature() {
        let scene = BulbState {
            on: true,
            scene_id: Some(4),
            color_temp: Some(3000),
            brightness: Some(255),
            ..BulbState::default()
        };
        let params = restore_params(&scene);
        assert_eq!(params["sceneId"], 4);
        assert!(params.get("temp").is_none());
        assert_eq!(params["dimming"], 100);

        let warm = BulbState {
            on: true,
            color_temp: Some(2700),
            ratio: Some(50),
            ..BulbState::default()
        };
        let params = restore_params(&warm);
        assert_eq!(params["temp"], 2700);
        assert_eq!(params["ratio"], 50);
        assert!(params.get("r").is_none());
    }

    #[test]
    fn wiz_target_gets_default_port() {
        assert_eq!(WizBulb::new("192.168.1.40").name(), "192.168.1.40:38899");
        assert_eq!(WizBulb::new("10.0.0.2:5000").name(), "10.0.0.2:5000");
    }
}
