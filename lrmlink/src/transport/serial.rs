//! Serial port transport backed by tokio-serial.

use crate::error::{Error, Result};
use crate::transport::Transport;
use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info, trace};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};

/// Default baud rate for LRM meters.
pub const DEFAULT_BAUD: u32 = 115200;

/// Read buffer size per chunk.
const READ_BUFFER_SIZE: usize = 512;

/// Serial transport for a meter attached over UART / USB-CDC.
pub struct SerialTransport {
    port_name: String,
    baud_rate: u32,
    stream: Option<SerialStream>,
}

impl SerialTransport {
    /// Create a transport for the given port at the default baud rate.
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate: DEFAULT_BAUD,
            stream: None,
        }
    }

    /// Set a custom baud rate.
    #[must_use]
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// The configured baud rate.
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn open(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        info!(
            "Opening serial port {} at {} baud",
            self.port_name, self.baud_rate
        );

        // 8N1, no flow control - the only mode the meter speaks
        let stream = tokio_serial::new(&self.port_name, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()?;

        self.stream = Some(stream);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            debug!("Closed serial port {}", self.port_name);
        }
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::Disconnected)?;

        stream.write_all(data).await.map_err(|e| {
            Error::Transport(format!("write to {} failed: {e}", self.port_name))
        })?;
        stream.flush().await.map_err(|e| {
            Error::Transport(format!("flush of {} failed: {e}", self.port_name))
        })?;

        trace!("Wrote {} bytes to {}", data.len(), self.port_name);
        Ok(())
    }

    async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        let stream = self.stream.as_mut().ok_or(Error::Disconnected)?;

        let mut buf = [0u8; READ_BUFFER_SIZE];
        match stream.read(&mut buf).await {
            // EOF - device went away
            Ok(0) => Err(Error::Transport(format!(
                "serial port {} closed by peer",
                self.port_name
            ))),
            Ok(n) => {
                trace!("Read {n} bytes from {}", self.port_name);
                Ok(Some(Bytes::copy_from_slice(&buf[..n])))
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(Error::Transport(format!(
                "read from {} failed: {e}",
                self.port_name
            ))),
        }
    }

    fn name(&self) -> &str {
        &self.port_name
    }
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("port", &self.port_name)
            .field("baud_rate", &self.baud_rate)
            .field("open", &self.stream.is_some())
            .finish()
    }
}
