//! Serial line binding for the radio module.
//!
//! A blocking reader thread owns a cloned port handle and feeds raw reads to
//! the [`accumulate`](crate::accumulator::accumulate) task, which rebuilds
//! frame boundaries from inter-byte silence. Writes are followed by a short
//! turnaround pause before the module will accept more input.

use crate::accumulator::accumulate;
use crate::chunk::{chunk_channel, Chunk, ChunkReceiver, CHUNK_CHANNEL_CAPACITY};
use crate::error::TransportError;
use crate::transport::Transport;
use async_trait::async_trait;
use bytes::Bytes;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Line speed of TinyMesh modules
pub const DEFAULT_BAUD_RATE: u32 = 19_200;

/// Bits on the wire per byte for 8N1: start, eight data, stop
const BITS_PER_BYTE: f64 = 10.0;

/// Serial line timing
#[derive(Debug, Clone, PartialEq)]
pub struct SerialSettings {
    /// Line speed in baud
    pub baud_rate: u32,
    /// Quiet byte-times after which buffered input is flushed as one frame
    pub silence_bytes: u32,
    /// Byte-times to wait after each write
    pub turnaround_bytes: u32,
    /// How long a blocking read waits before rechecking for shutdown
    pub read_timeout: Duration,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            silence_bytes: 6,
            turnaround_bytes: 2,
            read_timeout: Duration::from_millis(50),
        }
    }
}

impl SerialSettings {
    /// Time to transmit one byte at the configured speed
    pub fn byte_time(&self) -> Duration {
        Duration::from_secs_f64(BITS_PER_BYTE / f64::from(self.baud_rate.max(1)))
    }

    /// Inter-byte silence that ends a frame
    pub fn silence_window(&self) -> Duration {
        self.byte_time() * self.silence_bytes
    }

    /// Pause after each write
    pub fn turnaround(&self) -> Duration {
        self.byte_time() * self.turnaround_bytes
    }
}

type SharedPort = Arc<Mutex<Box<dyn SerialPort>>>;

/// Serial transport at 8N1
pub struct SerialTransport {
    name: String,
    path: String,
    settings: SerialSettings,
    port: Option<SharedPort>,
    stop: Arc<AtomicBool>,
    accumulator: Option<JoinHandle<()>>,
    rx: Option<ChunkReceiver>,
}

impl SerialTransport {
    /// Create a transport for the device at `path`; nothing is opened until
    /// `connect`
    pub fn new(path: impl Into<String>, settings: SerialSettings) -> Self {
        let path = path.into();
        Self {
            name: format!("serial:{}", path),
            path,
            settings,
            port: None,
            stop: Arc::new(AtomicBool::new(false)),
            accumulator: None,
            rx: None,
        }
    }

    fn open_port(path: &str, settings: &SerialSettings) -> Result<Box<dyn SerialPort>, TransportError> {
        let port = serialport::new(path, settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(settings.read_timeout)
            .open()?;
        Ok(port)
    }

    fn teardown(&mut self) -> bool {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(task) = self.accumulator.take() {
            task.abort();
        }
        self.rx = None;
        self.port.take().is_some()
    }
}

/// Blocking read loop run on a dedicated thread
fn read_loop(
    mut port: Box<dyn SerialPort>,
    raw_tx: mpsc::Sender<io::Result<Bytes>>,
    stop: Arc<AtomicBool>,
    name: String,
) {
    let mut buf = [0u8; 256];

    while !stop.load(Ordering::SeqCst) {
        match port.read(&mut buf) {
            Ok(0) => {
                debug!("{}: zero-length read, treating as end of stream", name);
                break;
            }
            Ok(n) => {
                if raw_tx.blocking_send(Ok(Bytes::copy_from_slice(&buf[..n]))).is_err() {
                    break;
                }
            }
            Err(err) if matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::Interrupted) => {}
            Err(err) => {
                let _ = raw_tx.blocking_send(Err(err));
                break;
            }
        }
    }

    debug!("{}: reader thread exiting", name);
}

#[async_trait]
impl Transport for SerialTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.port.is_some() && self.rx.as_ref().is_some_and(|rx| !rx.is_finished())
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        self.teardown();

        let path = self.path.clone();
        let settings = self.settings.clone();
        let port = tokio::task::spawn_blocking(move || Self::open_port(&path, &settings)).await??;
        let reader_port = port.try_clone()?;

        let (tx, rx) = chunk_channel();
        let (raw_tx, raw_rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        let stop = Arc::new(AtomicBool::new(false));

        let thread_stop = Arc::clone(&stop);
        let thread_name = self.name.clone();
        std::thread::Builder::new()
            .name("guri-serial-reader".into())
            .spawn(move || read_loop(reader_port, raw_tx, thread_stop, thread_name))?;

        self.accumulator = Some(tokio::spawn(accumulate(
            raw_rx,
            tx,
            self.settings.silence_window(),
        )));
        self.stop = stop;
        self.port = Some(Arc::new(Mutex::new(port)));
        self.rx = Some(rx);

        info!(
            "{}: opened at {} baud (silence {:?}, turnaround {:?})",
            self.name,
            self.settings.baud_rate,
            self.settings.silence_window(),
            self.settings.turnaround()
        );
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // The reader thread notices the stop flag within one read timeout
        if self.teardown() {
            info!("{}: closed", self.name);
        }
        Ok(())
    }

    async fn write(
        &mut self,
        buf: &[u8],
        timeout: Option<Duration>,
    ) -> Result<usize, TransportError> {
        let port = self.port.clone().ok_or(TransportError::NotConnected)?;
        let data = buf.to_vec();

        let task = tokio::task::spawn_blocking(move || -> io::Result<usize> {
            let mut port = port
                .lock()
                .map_err(|_| io::Error::other("serial port lock poisoned"))?;
            port.write_all(&data)?;
            port.flush()?;
            Ok(data.len())
        });

        let written = match timeout {
            Some(limit) => tokio::time::timeout(limit, task)
                .await
                .map_err(|_| TransportError::Timeout(limit))???,
            None => task.await??,
        };

        tokio::time::sleep(self.settings.turnaround()).await;
        Ok(written)
    }

    async fn next_chunk(&mut self) -> Chunk {
        match self.rx.as_mut() {
            Some(rx) => rx.next().await,
            None => Chunk::EndOfStream,
        }
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        if self.teardown() {
            warn!("{}: dropped while open", self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timing_at_19200() {
        let settings = SerialSettings::default();
        let byte_time = settings.byte_time();

        // ~0.52 ms per byte, roughly 1.92 bytes/ms
        assert!(byte_time > Duration::from_micros(520));
        assert!(byte_time < Duration::from_micros(522));
        assert!(settings.silence_window() > Duration::from_micros(3_120));
        assert!(settings.silence_window() < Duration::from_micros(3_130));
        assert!(settings.turnaround() > Duration::from_micros(1_040));
        assert!(settings.turnaround() < Duration::from_micros(1_044));
    }

    #[test]
    fn test_timing_scales_with_baud() {
        let slow = SerialSettings {
            baud_rate: 9_600,
            ..Default::default()
        };
        let fast = SerialSettings::default();
        assert!(slow.silence_window() > fast.silence_window());
    }

    #[tokio::test]
    async fn test_connect_missing_device_fails() {
        let mut transport = SerialTransport::new("/dev/guri-does-not-exist", SerialSettings::default());
        assert!(transport.connect().await.is_err());
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.write(b"\xff", None).await,
            Err(TransportError::NotConnected)
        ));
        assert!(matches!(transport.next_chunk().await, Chunk::EndOfStream));
    }
}
