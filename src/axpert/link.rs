//! Request/response link to the inverter over a serial or HID raw device.
//!
//! Keeping the device handle open between exchanges matters: opening and
//! closing the port per command costs over a second on a Raspberry Pi,
//! while a query over an open handle completes in tens of milliseconds.

use crate::axpert::frame::{self, Validation};
use crate::prelude::*;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;
use tokio_serial::SerialPortBuilderExt;

/// Outcome classification for one exchange. Transport faults are retried;
/// the rest are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseKind {
    Ok,
    FailOpenFile,
    FailWriteFile,
    FailRecvTooShort,
    FailRecvCrc,
    DontUnderstand,
    Nak,
}

impl ResponseKind {
    pub fn is_transport_fault(&self) -> bool {
        matches!(
            self,
            ResponseKind::FailOpenFile
                | ResponseKind::FailWriteFile
                | ResponseKind::FailRecvTooShort
                | ResponseKind::FailRecvCrc
        )
    }

    pub fn describe(&self) -> &'static str {
        match self {
            ResponseKind::Ok => "OK",
            ResponseKind::FailOpenFile => "FailOpenFile",
            ResponseKind::FailWriteFile => "FailWriteFile",
            ResponseKind::FailRecvTooShort => "FailRecvTooShort",
            ResponseKind::FailRecvCrc => "FailRecvCRC",
            ResponseKind::DontUnderstand => "DontUnderstand",
            ResponseKind::Nak => "NAK",
        }
    }
}

impl std::fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.describe())
    }
}

enum DeviceStream {
    Serial(tokio_serial::SerialStream),
    Hid(tokio::fs::File),
}

impl DeviceStream {
    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            DeviceStream::Serial(s) => s.write_all(buf).await,
            DeviceStream::Hid(f) => f.write_all(buf).await,
        }
    }

    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            DeviceStream::Serial(s) => s.read(buf).await,
            DeviceStream::Hid(f) => f.read(buf).await,
        }
    }
}

const RETRY_SPACING: Duration = Duration::from_millis(100);
const USB_RESTART_MAX_BACKOFF_SECS: u64 = 256;
const USB_RESTART_FAIL_CEILING: u32 = 30;

pub struct Link {
    devices: Vec<String>,
    device_index: usize,
    stream: Option<DeviceStream>,
    pub recv_timeout: Duration,
    usb_restart_script: Option<String>,
    usb_restart_backoff_secs: u64,
    usb_restart_failures: u32,
    last_usb_restart: Option<Instant>,
}

impl Link {
    pub fn new(devices: Vec<String>, usb_restart_script: Option<String>) -> Self {
        assert!(!devices.is_empty(), "at least one inverter device required");
        Self {
            devices,
            device_index: 0,
            stream: None,
            recv_timeout: Duration::from_secs(2),
            usb_restart_script,
            usb_restart_backoff_secs: 1,
            usb_restart_failures: 0,
            last_usb_restart: None,
        }
    }

    pub fn device(&self) -> &str {
        &self.devices[self.device_index]
    }

    pub fn close(&mut self) {
        self.stream = None;
    }

    async fn open(&mut self) -> Result<(), ResponseKind> {
        self.close();
        let path = self.devices[self.device_index].clone();

        let opened: std::io::Result<DeviceStream> = if path.contains("ttyUSB") {
            // RS232-to-USB adapter: 9600 is flaky on these things, use 2400 8N1 raw
            tokio_serial::new(&path, 2400)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(tokio_serial::Parity::None)
                .stop_bits(tokio_serial::StopBits::One)
                .flow_control(tokio_serial::FlowControl::None)
                .open_native_async()
                .map(DeviceStream::Serial)
                .map_err(|e| {
                    let kind = match e.kind() {
                        tokio_serial::ErrorKind::Io(kind) => kind,
                        _ => ErrorKind::Other,
                    };
                    std::io::Error::new(kind, e.description)
                })
        } else {
            tokio::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .open(&path)
                .await
                .map(DeviceStream::Hid)
        };

        match opened {
            Ok(stream) => {
                self.stream = Some(stream);
                self.usb_restart_backoff_secs = 1;
                self.usb_restart_failures = 0;
                Ok(())
            }
            Err(e) => {
                error!("Unable to open inverter device '{}': {}", path, e);
                if e.kind() == ErrorKind::NotFound {
                    self.maybe_restart_usb().await;
                }
                // Round-robin to the next configured device for the next attempt.
                self.device_index = (self.device_index + 1) % self.devices.len();
                Err(ResponseKind::FailOpenFile)
            }
        }
    }

    /// The USB port can wedge hard enough that the device node disappears.
    /// Run the configured re-enumeration hook, with exponential backoff.
    async fn maybe_restart_usb(&mut self) {
        let Some(script) = self.usb_restart_script.clone() else {
            return;
        };
        if self.usb_restart_failures >= USB_RESTART_FAIL_CEILING {
            return;
        }
        if let Some(last) = self.last_usb_restart {
            if last.elapsed() < Duration::from_secs(self.usb_restart_backoff_secs) {
                return;
            }
        }
        warn!(
            "Inverter device missing, running USB restart hook '{}' (backoff {}s)",
            script, self.usb_restart_backoff_secs
        );
        match tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&script)
            .status()
            .await
        {
            Ok(status) if status.success() => {}
            Ok(status) => warn!("USB restart hook exited with {}", status),
            Err(e) => error!("Failed to run USB restart hook: {}", e),
        }
        self.last_usb_restart = Some(Instant::now());
        self.usb_restart_backoff_secs =
            (self.usb_restart_backoff_secs * 2).min(USB_RESTART_MAX_BACKOFF_SECS);
        self.usb_restart_failures += 1;
    }

    async fn send(&mut self, cmd: &str) -> Result<(), ResponseKind> {
        let msg = frame::frame(cmd.as_bytes());
        let stream = self.stream.as_mut().ok_or(ResponseKind::FailOpenFile)?;
        stream.write_all(&msg).await.map_err(|e| {
            error!("Write to inverter failed: {}", e);
            ResponseKind::FailWriteFile
        })
    }

    /// Read until the accumulated buffer is a valid frame, or the receive
    /// timeout elapses.
    async fn recv(&mut self) -> Result<String, ResponseKind> {
        let deadline = Instant::now() + self.recv_timeout;
        let stream = self.stream.as_mut().ok_or(ResponseKind::FailOpenFile)?;
        let mut accum: Vec<u8> = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, stream.read(&mut buf)).await {
                Ok(Ok(n)) if n > 0 => {
                    accum.extend_from_slice(&buf[..n]);
                    if let Validation::Valid(payload) = frame::validate(&accum) {
                        return Ok(String::from_utf8_lossy(&payload).into_owned());
                    }
                }
                Ok(Ok(_)) => tokio::time::sleep(Duration::from_micros(100)).await,
                Ok(Err(e)) => {
                    error!("Read from inverter failed: {}", e);
                    break;
                }
                Err(_) => break, // timeout
            }
        }
        match frame::validate(&accum) {
            Validation::TooShort => Err(ResponseKind::FailRecvTooShort),
            _ => {
                error!(
                    "Receive failed, accumulated {} bytes: [{}]",
                    accum.len(),
                    raw_to_printable(&accum)
                );
                Err(ResponseKind::FailRecvCrc)
            }
        }
    }

    /// One framed exchange with the inverter, with up to `max_retries`
    /// retries for transport faults. Protocol-level outcomes (`NAK`) are
    /// terminal. The `(ACK` sentinel is returned as-is; callers that issue
    /// state-change commands check for it.
    pub async fn execute_raw(
        &mut self,
        cmd: &str,
        max_retries: u32,
    ) -> Result<String, ResponseKind> {
        let mut last_fault = ResponseKind::FailOpenFile;
        for attempt in 0..=max_retries {
            if attempt > 0 {
                tokio::time::sleep(RETRY_SPACING).await;
            }

            if self.stream.is_none() {
                if let Err(kind) = self.open().await {
                    last_fault = kind;
                    continue;
                }
            }

            let fault = match self.send(cmd).await {
                Ok(()) => match self.recv().await {
                    Ok(payload) => {
                        if payload == "(NAK" {
                            warn!(
                                "NAK from inverter for '{}'. This usually means a CRC failure, \
                                 so something wrong with the COM port or baud rate",
                                cmd
                            );
                            return Err(ResponseKind::Nak);
                        }
                        return Ok(payload);
                    }
                    Err(kind) => kind,
                },
                Err(kind) => kind,
            };

            // Transport fault: drop the handle so the next attempt reopens.
            debug!("Exchange '{}' attempt {} failed: {}", cmd, attempt + 1, fault);
            self.close();
            last_fault = fault;
        }
        Err(last_fault)
    }

    /// Execute and run a typed parser over the payload.
    pub async fn execute_typed<T>(
        &mut self,
        cmd: &str,
        parse: impl Fn(&str) -> Result<T>,
        max_retries: u32,
    ) -> Result<T, ResponseKind> {
        let payload = self.execute_raw(cmd, max_retries).await?;
        match parse(&payload) {
            Ok(rec) => Ok(rec),
            Err(e) => {
                error!("Don't understand response to {}: {}", cmd, e);
                Err(ResponseKind::DontUnderstand)
            }
        }
    }
}

fn raw_to_printable(raw: &[u8]) -> String {
    let mut out = String::new();
    for &c in raw {
        if c.is_ascii_alphanumeric() {
            out.push(c as char);
        } else {
            out.push_str(&format!(".{:02X}", c));
        }
    }
    out
}
