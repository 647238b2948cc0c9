use log::{debug, error, info, warn};
use serialport::{DataBits, SerialPort};
use std::io::Write;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::engine::SegmentSink;
use crate::error::Result;
use crate::led::SegmentCommand;

pub const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Keeps writes at least `interval` apart.
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn wait_time(&self, now: Instant) -> Duration {
        match self.last {
            Some(last) => self.interval.saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }

    /// Blocks until the next write may go out, then marks it sent.
    pub fn wait(&mut self) {
        let pause = self.wait_time(Instant::now());
        if !pause.is_zero() {
            thread::sleep(pause);
        }
        self.last = Some(Instant::now());
    }
}

/// Ordered, throttled writer for the LED controller. Payloads are queued and a
/// dedicated thread writes them one at a time, so callers never wait on the
/// port.
pub struct SerialLink<W> {
    tx: mpsc::UnboundedSender<String>,
    writer: JoinHandle<W>,
}

impl SerialLink<Box<dyn SerialPort>> {
    pub fn open(path: &str, baud: u32, interval: Duration) -> Result<Self> {
        let port = serialport::new(path, baud)
            .data_bits(DataBits::Eight)
            .timeout(READ_TIMEOUT)
            .open()?;
        info!("Opened {path} at {baud} baud");
        Ok(Self::spawn(port, interval))
    }
}

impl<W: Write + Send + 'static> SerialLink<W> {
    pub fn spawn(mut port: W, interval: Duration) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let writer = thread::spawn(move || {
            let mut throttle = Throttle::new(interval);
            while let Some(payload) = rx.blocking_recv() {
                throttle.wait();
                // A failed write is not retried; the next payload tries again.
                if let Err(e) = port.write_all(payload.as_bytes()).and_then(|_| port.flush()) {
                    warn!("Serial write failed: {e}");
                }
            }
            debug!("Serial writer drained");
            port
        });
        Self { tx, writer }
    }

    pub fn send_raw(&self, payload: String) {
        if self.tx.send(payload).is_err() {
            error!("Serial writer is gone, dropping payload");
        }
    }

    /// Stops accepting payloads, waits for the queue to drain and hands the
    /// port back.
    pub fn close(self) -> Option<W> {
        let Self { tx, writer } = self;
        drop(tx);
        match writer.join() {
            Ok(port) => Some(port),
            Err(_) => {
                error!("Serial writer panicked");
                None
            }
        }
    }
}

impl<W: Write + Send + 'static> SegmentSink for SerialLink<W> {
    fn send(&mut self, command: SegmentCommand) {
        self.send_raw(command.to_payload());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::led::power_payload;

    #[test]
    fn first_write_goes_out_immediately() {
        let throttle = Throttle::new(Duration::from_millis(10));
        assert_eq!(throttle.wait_time(Instant::now()), Duration::ZERO);
    }

    #[test]
    fn throttle_waits_out_the_remaining_interval() {
        let mut throttle = Throttle::new(Duration::from_millis(10));
        throttle.wait();
        let now = Instant::now();
        assert!(throttle.wait_time(now) <= Duration::from_millis(10));
        assert_eq!(
            throttle.wait_time(now + Duration::from_millis(25)),
            Duration::ZERO
        );
    }

    #[test]
    fn writes_in_order_and_spaced_out() {
        let mut link = SerialLink::spawn(Vec::new(), Duration::from_millis(10));
        let started = Instant::now();
        link.send_raw(power_payload(true));
        link.send(SegmentCommand::new(21, [255, 0, 0], 144));
        link.send(SegmentCommand::off(21, 144));

        let written = link.close().unwrap();
        assert!(started.elapsed() >= Duration::from_millis(20));
        let text = String::from_utf8(written).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "{\"state\":{\"bri\":255,\"on\":true}}",
                "{\"seg\":{\"i\":[20,[255,0,0],123]}}",
                "{\"seg\":{\"i\":[20,[0,0,0],123]}}",
            ]
        );
    }

    struct BrokenPort;

    impl Write for BrokenPort {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "unplugged"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_failures_do_not_stop_the_writer() {
        let mut link = SerialLink::spawn(BrokenPort, Duration::ZERO);
        link.send(SegmentCommand::off(1, 144));
        link.send(SegmentCommand::off(2, 144));
        assert!(link.close().is_some());
    }
}
