use clap::Parser;
use log::{debug, info, trace, warn};
use midir::{Ignore, MidiInput, MidiInputConnection};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

use piano_glow::bulb::{BulbSynchronizer, WizBulb};
use piano_glow::config::{load_settings, Settings};
use piano_glow::engine::Engine;
use piano_glow::led::power_payload;
use piano_glow::note::{decode, NoteEvent};
use piano_glow::serial::SerialLink;
use piano_glow::{Error, Result};

#[derive(Parser, Debug)]
#[clap(name = "piano-glow", version = env!("CARGO_PKG_VERSION"))]
struct Args {
    #[clap(short, long, default_value = "config.json", help = "JSON config file")]
    config: PathBuf,
}

fn start_midi_listener(
    device: Option<&str>,
    tx: mpsc::Sender<NoteEvent>,
) -> Result<MidiInputConnection<()>> {
    let mut midi_in = MidiInput::new("piano-glow")?;
    midi_in.ignore(Ignore::None);

    let ports = midi_in.ports();
    let port = ports
        .iter()
        .find(|p| match device {
            Some(wanted) => midi_in
                .port_name(p)
                .map(|name| name.contains(wanted))
                .unwrap_or(false),
            None => true,
        })
        .ok_or_else(|| Error::Midi(format!("No MIDI input port matching {device:?}")))?;

    let port_name = midi_in
        .port_name(port)
        .unwrap_or_else(|_| "<unknown>".to_string());
    info!("Connecting to MIDI device: {port_name}");

    let mut previous: Option<u64> = None;
    let connection = midi_in.connect(
        port,
        "piano-glow-in",
        move |stamp, message, _| {
            let delta = previous.map_or(0, |last| stamp.saturating_sub(last));
            previous = Some(stamp);
            trace!("+{delta}us {message:?}");

            match decode(message) {
                Some(event) => {
                    if tx.blocking_send(event).is_err() {
                        debug!("Engine stopped, dropping {event:?}");
                    }
                }
                None => debug!("Dropping malformed MIDI message {message:?}"),
            }
        },
        (),
    )?;

    println!("Listening for MIDI input from {port_name}...");
    Ok(connection)
}

fn read_settings(args: &Args) -> Result<Settings> {
    if args.config.exists() {
        return load_settings(&args.config);
    }
    warn!(
        "{} not found, using default settings",
        args.config.display()
    );
    let settings = Settings::default();
    settings.validate()?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let settings = read_settings(&args)?;

    let com_port = settings
        .com_port
        .as_deref()
        .ok_or_else(|| Error::Config("comPort is not set".to_string()))?;
    let serial = SerialLink::open(
        com_port,
        settings.baud,
        Duration::from_millis(settings.write_interval_ms),
    )?;
    serial.send_raw(power_payload(true));

    let bulbs: Vec<WizBulb> = settings.wiz_lights.iter().map(|ip| WizBulb::new(ip)).collect();
    info!("Driving {} bulb(s)", bulbs.len());
    let (bulb_handle, bulb_worker) = BulbSynchronizer::spawn(bulbs);

    // Channel for all the notes
    let (tx, rx) = mpsc::channel(100);
    let connection = start_midi_listener(settings.midi_device.as_deref(), tx)?;

    let engine = Engine::new(&settings, serial, bulb_handle);
    let engine_task = tokio::spawn(engine.run(rx));

    println!("Running. Press Control-C to exit.");
    tokio::signal::ctrl_c().await?;
    println!();

    // Closing the port drops the sender, which ends the engine loop.
    drop(connection);
    let engine = engine_task.await?;
    for played in engine.history().recent() {
        debug!("Recent note {} at velocity {}", played.note, played.velocity);
    }

    let (serial, bulb_handle) = engine.into_sinks();
    serial.send_raw(power_payload(false));
    tokio::task::spawn_blocking(move || serial.close()).await?;

    drop(bulb_handle);
    for last in bulb_worker.await? {
        info!("{} was {:?}", last.bulb, last.state);
    }

    println!("Exit.");
    Ok(())
}
