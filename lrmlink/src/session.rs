//! Link session: connection state machine and request/response correlation.
//!
//! A [`LinkSession`] owns exactly one transport. Connecting performs the
//! identity handshake; once connected, a worker task takes the transport and
//! serves requests from the handle. At most one framed exchange is
//! outstanding at a time; a second request while one is pending is rejected
//! with [`Error::SessionBusy`] instead of silently replacing the first.
//!
//! Inbound bytes are appended to a reassembly buffer and drained through
//! [`decode_one`] in arrival order, so frames split across arbitrary chunk
//! boundaries reassemble identically to a single contiguous read.

use crate::device::DeviceIdentity;
use crate::error::{Error, Result};
use crate::protocol::{Command, decode_one, encode};
use crate::transport::Transport;
use bytes::{Bytes, BytesMut};
use log::{debug, info, trace, warn};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// Default deadline for a framed control exchange.
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Deadline for the identity handshake during connect.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Link session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No transport open.
    Disconnected,
    /// Transport opening in progress.
    Connecting,
    /// Identity request sent, waiting for the device to answer.
    AwaitingHandshake,
    /// Handshake accepted; exchanges may be issued.
    Connected,
}

/// A framed exchange waiting for its response.
struct PendingExchange {
    expect: Command,
    name: &'static str,
    reply: oneshot::Sender<Result<Bytes>>,
    deadline: Instant,
}

enum Request {
    Exchange {
        frame: Vec<u8>,
        expect: Command,
        name: &'static str,
        timeout: Duration,
        reply: oneshot::Sender<Result<Bytes>>,
    },
    WriteRaw {
        data: Vec<u8>,
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a connected meter.
///
/// Dropping the handle closes the channel to the worker, which tears the
/// session down and closes the transport.
#[derive(Debug)]
pub struct LinkSession {
    tx: mpsc::Sender<Request>,
    identity: DeviceIdentity,
}

impl LinkSession {
    /// Open the transport, perform the identity handshake, and start the
    /// session worker.
    ///
    /// Fails with [`Error::Handshake`] when the device does not answer
    /// within the handshake deadline or reports a model this library does
    /// not speak to; the transport is closed on every failure path.
    pub async fn connect<T: Transport + 'static>(mut transport: T) -> Result<Self> {
        debug!(
            "Connecting to {} (state: {:?})",
            transport.name(),
            LinkState::Connecting
        );
        transport.open().await?;

        let mut buffer = BytesMut::with_capacity(512);
        let identity = match handshake(&mut transport, &mut buffer).await {
            Ok(identity) => identity,
            Err(e) => {
                let _ = transport.close().await;
                return Err(e);
            },
        };

        info!(
            "Connected to {} (serial {}, fw {}) on {}",
            identity.model,
            identity.serial_number,
            identity.fw_version,
            transport.name()
        );

        let (tx, rx) = mpsc::channel(8);
        let worker = SessionWorker {
            transport,
            rx,
            buffer,
            pending: None,
        };
        tokio::spawn(worker.run());

        Ok(Self { tx, identity })
    }

    /// Identity reported by the device during the handshake.
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Current lifecycle state of the session.
    ///
    /// A live handle is `Connected`; once the worker has stopped (explicit
    /// disconnect or a fatal transport error) it reports `Disconnected`.
    /// The transient connect-time states never escape [`LinkSession::connect`].
    pub fn state(&self) -> LinkState {
        if self.tx.is_closed() {
            LinkState::Disconnected
        } else {
            LinkState::Connected
        }
    }

    /// Send a framed request and wait for the correlated response payload.
    ///
    /// `name` labels the exchange in timeouts and diagnostics. Rejected with
    /// [`Error::SessionBusy`] while another exchange is outstanding.
    pub async fn send_and_wait(
        &self,
        command: Command,
        payload: &[u8],
        name: &'static str,
        timeout: Duration,
    ) -> Result<Bytes> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Request::Exchange {
                frame: encode(command as u8, payload),
                expect: command,
                name,
                timeout,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::Disconnected)?;
        reply_rx.await.map_err(|_| Error::Disconnected)?
    }

    /// Write raw, unframed bytes through the session's transport.
    ///
    /// Used by firmware transfer; does not touch the pending-exchange slot.
    pub async fn write_raw(&self, data: Vec<u8>) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Request::WriteRaw {
                data,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::Disconnected)?;
        reply_rx.await.map_err(|_| Error::Disconnected)?
    }

    /// Tear the session down: reject any outstanding exchange, close the
    /// transport, and stop the worker.
    pub async fn disconnect(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Request::Disconnect { reply: reply_tx })
            .await
            .map_err(|_| Error::Disconnected)?;
        reply_rx.await.map_err(|_| Error::Disconnected)
    }
}

/// Send `IdentityGet` and wait for an acceptable identity frame.
///
/// Leftover bytes past the identity frame stay in `buffer` for the worker.
async fn handshake<T: Transport>(
    transport: &mut T,
    buffer: &mut BytesMut,
) -> Result<DeviceIdentity> {
    transport.write(&encode(Command::IdentityGet as u8, &[])).await?;
    debug!("Identity request sent (state: {:?})", LinkState::AwaitingHandshake);

    let wait = async {
        loop {
            if let Some(chunk) = transport.read_chunk().await? {
                buffer.extend_from_slice(&chunk);
            }

            while let Some((frame, consumed)) = decode_one(buffer) {
                let _ = buffer.split_to(consumed);

                if !frame.is_valid() {
                    warn!(
                        "Dropping corrupt frame during handshake (command {:#04x}, checksum {:#06x} != {:#06x})",
                        frame.command, frame.checksum, frame.computed
                    );
                    continue;
                }

                if frame.command != Command::IdentityGet as u8 {
                    debug!(
                        "Ignoring non-identity frame {:#04x} during handshake",
                        frame.command
                    );
                    continue;
                }

                let identity = DeviceIdentity::parse(&frame.payload)
                    .map_err(|e| Error::Handshake(format!("bad identity payload: {e}")))?;
                if !identity.is_accepted() {
                    return Err(Error::Handshake(format!(
                        "unsupported device model {} (family {:#06x}, type {:#06x})",
                        identity.model, identity.family, identity.device_type
                    )));
                }
                return Ok(identity);
            }
        }
    };

    match tokio::time::timeout(HANDSHAKE_TIMEOUT, wait).await {
        Ok(result) => result,
        Err(_) => Err(Error::Handshake(format!(
            "no identity response within {HANDSHAKE_TIMEOUT:?}"
        ))),
    }
}

/// The task that owns the transport for a connected session.
struct SessionWorker<T: Transport> {
    transport: T,
    rx: mpsc::Receiver<Request>,
    buffer: BytesMut,
    pending: Option<PendingExchange>,
}

impl<T: Transport> SessionWorker<T> {
    async fn run(mut self) {
        loop {
            let deadline = self.pending.as_ref().map(|p| p.deadline);

            tokio::select! {
                request = self.rx.recv() => {
                    match request {
                        Some(Request::Exchange { frame, expect, name, timeout, reply }) => {
                            self.handle_exchange(frame, expect, name, timeout, reply).await;
                        },
                        Some(Request::WriteRaw { data, reply }) => {
                            let _ = reply.send(self.transport.write(&data).await);
                        },
                        Some(Request::Disconnect { reply }) => {
                            self.teardown().await;
                            // Close the channel before replying so the handle
                            // observes the disconnected state immediately
                            self.rx.close();
                            let _ = reply.send(());
                            return;
                        },
                        // Handle dropped
                        None => {
                            self.teardown().await;
                            return;
                        },
                    }
                },
                chunk = self.transport.read_chunk() => {
                    match chunk {
                        Ok(Some(bytes)) => {
                            trace!("Session received {} bytes", bytes.len());
                            self.buffer.extend_from_slice(&bytes);
                            self.drain_frames();
                        },
                        Ok(None) => {},
                        Err(e) => {
                            warn!("Transport failed, tearing session down: {e}");
                            self.teardown().await;
                            return;
                        },
                    }
                },
                () = async {
                    match deadline {
                        Some(d) => tokio::time::sleep_until(d).await,
                        None => std::future::pending().await,
                    }
                } => {
                    if let Some(pending) = self.pending.take() {
                        debug!("Exchange {} timed out", pending.name);
                        let _ = pending.reply.send(Err(Error::Timeout {
                            command: pending.name,
                        }));
                    }
                },
            }
        }
    }

    async fn handle_exchange(
        &mut self,
        frame: Vec<u8>,
        expect: Command,
        name: &'static str,
        timeout: Duration,
        reply: oneshot::Sender<Result<Bytes>>,
    ) {
        if self.pending.is_some() {
            let _ = reply.send(Err(Error::SessionBusy));
            return;
        }

        if let Err(e) = self.transport.write(&frame).await {
            let _ = reply.send(Err(e));
            return;
        }

        trace!("Exchange {name} sent ({} bytes)", frame.len());
        self.pending = Some(PendingExchange {
            expect,
            name,
            reply,
            deadline: Instant::now() + timeout,
        });
    }

    /// Decode and dispatch every complete frame in the reassembly buffer.
    fn drain_frames(&mut self) {
        while let Some((frame, consumed)) = decode_one(&self.buffer) {
            let _ = self.buffer.split_to(consumed);

            if !frame.is_valid() {
                warn!(
                    "Dropping corrupt frame (command {:#04x}, checksum {:#06x} != {:#06x})",
                    frame.command, frame.checksum, frame.computed
                );
                continue;
            }

            match Command::from_byte(frame.command) {
                Some(Command::IdentityGet) => {
                    debug!("Unsolicited identity frame ({} bytes), ignoring", frame.payload.len());
                },
                Some(command) => match self.pending.take() {
                    Some(pending) if pending.expect == command => {
                        trace!(
                            "Exchange {} resolved ({} bytes)",
                            pending.name,
                            frame.payload.len()
                        );
                        let _ = pending.reply.send(Ok(frame.payload));
                    },
                    Some(pending) => {
                        debug!(
                            "Dropping {} frame while waiting for {}",
                            command.name(),
                            pending.name
                        );
                        self.pending = Some(pending);
                    },
                    None => {
                        debug!("Dropping unsolicited {} frame", command.name());
                    },
                },
                None => {
                    debug!("Dropping frame with unknown command {:#04x}", frame.command);
                },
            }
        }
    }

    async fn teardown(&mut self) {
        if let Some(pending) = self.pending.take() {
            let _ = pending.reply.send(Err(Error::Disconnected));
        }
        if let Err(e) = self.transport.close().await {
            debug!("Transport close during teardown failed: {e}");
        }
        debug!("Session worker stopped (state: {:?})", LinkState::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Scripted transport: returns queued chunks in order, then waits
    /// forever; records every write.
    struct MockTransport {
        chunks: VecDeque<Bytes>,
        writes: Arc<Mutex<Vec<Vec<u8>>>>,
        fail_writes: bool,
    }

    impl MockTransport {
        fn new(chunks: Vec<Bytes>) -> Self {
            Self {
                chunks: chunks.into(),
                writes: Arc::new(Mutex::new(Vec::new())),
                fail_writes: false,
            }
        }

        fn writes(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
            Arc::clone(&self.writes)
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn open(&mut self) -> Result<()> {
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }

        async fn write(&mut self, data: &[u8]) -> Result<()> {
            if self.fail_writes {
                return Err(Error::Transport("scripted write failure".into()));
            }
            self.writes.lock().unwrap().push(data.to_vec());
            Ok(())
        }

        async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
            match self.chunks.pop_front() {
                Some(chunk) => Ok(Some(chunk)),
                None => {
                    std::future::pending::<()>().await;
                    unreachable!()
                },
            }
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    /// Transport that feeds `initial` chunks first and releases the
    /// `on_result_request` chunks only after a result frame is written.
    struct GatedTransport {
        initial: VecDeque<Bytes>,
        on_result_request: VecDeque<Bytes>,
        armed: bool,
    }

    #[async_trait]
    impl Transport for GatedTransport {
        async fn open(&mut self) -> Result<()> {
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }

        async fn write(&mut self, data: &[u8]) -> Result<()> {
            if data.first() == Some(&(Command::ResultGet as u8)) {
                self.armed = true;
            }
            Ok(())
        }

        async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
            let next = self.initial.pop_front().or_else(|| {
                if self.armed {
                    self.on_result_request.pop_front()
                } else {
                    None
                }
            });
            match next {
                Some(chunk) => Ok(Some(chunk)),
                None => {
                    std::future::pending::<()>().await;
                    unreachable!()
                },
            }
        }

        fn name(&self) -> &str {
            "gated"
        }
    }

    /// Identity payload for an accepted LRM-02 (family 1, type 2).
    fn identity_payload() -> Vec<u8> {
        vec![
            0x01, 0x00, // family
            0x02, 0x00, // type
            0x39, 0x30, 0x00, 0x00, // serial 12345
            1, 2, 3, // hw
            4, 5, 6, // fw
        ]
    }

    fn identity_frame() -> Vec<u8> {
        encode(Command::IdentityGet as u8, &identity_payload())
    }

    #[tokio::test]
    async fn test_connect_handshake_success() {
        let transport = MockTransport::new(vec![Bytes::from(identity_frame())]);
        let writes = transport.writes();

        let session = LinkSession::connect(transport).await.unwrap();
        assert_eq!(session.identity().model, "LRM-02");
        assert_eq!(session.identity().serial_number, 12345);

        // Exactly one write so far: the identity request frame
        let recorded = writes.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0], encode(Command::IdentityGet as u8, &[]));
    }

    #[tokio::test]
    async fn test_connect_handshake_chunked_byte_at_a_time() {
        let chunks: Vec<Bytes> = identity_frame()
            .into_iter()
            .map(|b| Bytes::copy_from_slice(&[b]))
            .collect();
        let transport = MockTransport::new(chunks);

        let session = LinkSession::connect(transport).await.unwrap();
        assert_eq!(session.identity().model, "LRM-02");
    }

    #[tokio::test]
    async fn test_connect_rejects_unsupported_model() {
        let mut payload = identity_payload();
        payload[0] = 0x09; // family 0x0009, not in the model table
        let transport =
            MockTransport::new(vec![Bytes::from(encode(Command::IdentityGet as u8, &payload))]);

        let err = LinkSession::connect(transport).await.unwrap_err();
        assert!(matches!(err, Error::Handshake(_)), "got {err:?}");
        assert!(err.to_string().contains("unknown"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_times_out_without_response() {
        let transport = MockTransport::new(vec![]);
        let err = LinkSession::connect(transport).await.unwrap_err();
        assert!(matches!(err, Error::Handshake(_)), "got {err:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_exchange_rejected_while_busy() {
        let transport = MockTransport::new(vec![Bytes::from(identity_frame())]);
        let session = LinkSession::connect(transport).await.unwrap();

        let first = session.send_and_wait(
            Command::ResultGet,
            &[0x00],
            "GetMeasurementCount",
            Duration::from_millis(500),
        );
        let second = async {
            // Let the first request reach the worker before issuing ours
            tokio::time::sleep(Duration::from_millis(10)).await;
            session
                .send_and_wait(
                    Command::ResultGet,
                    &[0x00],
                    "GetMeasurementCount",
                    Duration::from_millis(500),
                )
                .await
        };

        let (first_result, second_result) = tokio::join!(first, second);
        assert!(matches!(second_result, Err(Error::SessionBusy)));
        // No response was scripted, so the first exchange times out
        assert!(matches!(
            first_result,
            Err(Error::Timeout { command: "GetMeasurementCount" })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mismatched_frame_does_not_resolve_exchange() {
        // An identity frame arrives while a ResultGet exchange is pending;
        // it must be ignored and the exchange must still time out.
        let transport = MockTransport::new(vec![
            Bytes::from(identity_frame()),
            Bytes::from(identity_frame()),
        ]);
        let session = LinkSession::connect(transport).await.unwrap();

        let err = session
            .send_and_wait(
                Command::ResultGet,
                &[0x00],
                "GetMeasurementCount",
                Duration::from_millis(200),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_frames_reassemble_across_odd_chunk_boundaries() {
        // Identity frame and a result response as one byte stream, delivered
        // in 3-byte chunks that straddle the frame boundary; the response's
        // final checksum byte arrives only after the request goes out.
        let mut stream = identity_frame();
        stream.extend_from_slice(&encode(Command::ResultGet as u8, &[0x2A, 0x00]));
        let cut = stream.len() - 1;

        let transport = GatedTransport {
            initial: stream[..cut].chunks(3).map(Bytes::copy_from_slice).collect(),
            on_result_request: VecDeque::from([Bytes::copy_from_slice(&stream[cut..])]),
            armed: false,
        };

        let session = LinkSession::connect(transport).await.unwrap();
        assert_eq!(session.identity().model, "LRM-02");

        let payload = session
            .send_and_wait(
                Command::ResultGet,
                &[0x00],
                "GetMeasurementCount",
                DEFAULT_EXCHANGE_TIMEOUT,
            )
            .await
            .unwrap();
        assert_eq!(&payload[..], &[0x2A, 0x00]);
    }

    #[tokio::test]
    async fn test_corrupt_frame_dropped_session_continues() {
        // A response with a bad checksum is discarded without failing the
        // exchange; the valid frame right behind it still resolves.
        let mut released = encode(Command::ResultGet as u8, &[0x09, 0x00]);
        let last = released.len() - 1;
        released[last] ^= 0xFF;
        released.extend_from_slice(&encode(Command::ResultGet as u8, &[0x07, 0x00]));

        let transport = GatedTransport {
            initial: VecDeque::from([Bytes::from(identity_frame())]),
            on_result_request: VecDeque::from([Bytes::from(released)]),
            armed: false,
        };

        let session = LinkSession::connect(transport).await.unwrap();
        let payload = session
            .send_and_wait(
                Command::ResultGet,
                &[0x00],
                "GetMeasurementCount",
                DEFAULT_EXCHANGE_TIMEOUT,
            )
            .await
            .unwrap();
        assert_eq!(&payload[..], &[0x07, 0x00]);
    }

    #[tokio::test]
    async fn test_state_tracks_session_lifecycle() {
        let transport = MockTransport::new(vec![Bytes::from(identity_frame())]);
        let session = LinkSession::connect(transport).await.unwrap();
        assert_eq!(session.state(), LinkState::Connected);

        session.disconnect().await.unwrap();
        assert_eq!(session.state(), LinkState::Disconnected);
    }

    #[tokio::test]
    async fn test_exchange_resolves_with_matching_response() {
        let response = encode(Command::ResultGet as u8, &[0x07, 0x00]);
        let transport = MockTransport::new(vec![
            Bytes::from(identity_frame()),
            Bytes::from(response),
        ]);
        let session = LinkSession::connect(transport).await.unwrap();

        let payload = session
            .send_and_wait(
                Command::ResultGet,
                &[0x00],
                "GetMeasurementCount",
                DEFAULT_EXCHANGE_TIMEOUT,
            )
            .await
            .unwrap();
        assert_eq!(&payload[..], &[0x07, 0x00]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_rejects_pending_exchange() {
        let transport = MockTransport::new(vec![Bytes::from(identity_frame())]);
        let session = LinkSession::connect(transport).await.unwrap();

        let exchange = session.send_and_wait(
            Command::ResultGet,
            &[0x00],
            "GetMeasurementCount",
            Duration::from_secs(10),
        );
        let teardown = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            session.disconnect().await
        };

        let (exchange_result, teardown_result) = tokio::join!(exchange, teardown);
        assert!(matches!(exchange_result, Err(Error::Disconnected)));
        teardown_result.unwrap();

        // The worker is gone; further requests fail cleanly
        let err = session
            .send_and_wait(Command::ResultGet, &[0x00], "GetMeasurementCount", DEFAULT_EXCHANGE_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Disconnected));
    }

    #[tokio::test]
    async fn test_write_raw_passes_through_unframed() {
        let transport = MockTransport::new(vec![Bytes::from(identity_frame())]);
        let writes = transport.writes();
        let session = LinkSession::connect(transport).await.unwrap();

        session.write_raw(vec![0xDE, 0xAD, 0xBE, 0xEF]).await.unwrap();

        let recorded = writes.lock().unwrap();
        assert_eq!(recorded.last().unwrap(), &vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }
}
