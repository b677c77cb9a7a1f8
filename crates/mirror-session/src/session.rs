//! Session lifecycle and the record worker loop.

use std::io::{self, Read};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use mirror_proto as proto;

use crate::clock::NetworkClock;
use crate::config::SessionConfig;
use crate::crypto::{MirrorKey, RecordCipher};
use crate::error::SessionError;
use crate::resolve;

/// Scratch size for draining payloads of uninterpreted record kinds.
const DRAIN_CHUNK: usize = 32 * 1024;

/// One ready-to-decode unit handed to the consumer.
#[derive(Debug)]
pub struct VideoUnit<'a> {
    pub data: &'a [u8],
    pub kind: proto::UnitKind,
    /// Presentation time in microseconds; zero for configuration units.
    pub pts_micros: u64,
}

/// Consumer of decoded units.
///
/// Called synchronously on the worker thread, in record-arrival order.
/// Implementations must not block indefinitely and must copy `unit.data` if
/// they keep it past the call.
pub trait VideoSink: Send {
    fn video_process(&mut self, clock: &NetworkClock, unit: VideoUnit<'_>);
}

/// Session lifecycle, guarded by one mutex; transitions are checked
/// centrally in [`MirrorSession::start`] and [`MirrorSession::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
}

struct Shared {
    state: Mutex<Lifecycle>,
    clock: Arc<NetworkClock>,
    sink: Mutex<Box<dyn VideoSink>>,
    cipher: Mutex<Option<Box<dyn RecordCipher>>>,
    config: SessionConfig,
    remote: IpAddr,
}

impl Shared {
    fn should_run(&self) -> bool {
        *self.state.lock().unwrap() == Lifecycle::Running
    }
}

/// The long-lived object for one mirrored connection.
///
/// Owns the listening socket (held by the worker while running), the decrypt
/// context, and the worker thread. [`start`](Self::start) binds an
/// ephemeral-port listener and returns the port for out-of-band
/// advertisement; [`stop`](Self::stop) signals the worker and joins it.
/// Dropping the session stops it.
pub struct MirrorSession {
    shared: Arc<Shared>,
    key: MirrorKey,
    worker: Option<JoinHandle<()>>,
    local_port: Option<u16>,
}

impl std::fmt::Debug for MirrorSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorSession")
            .field("local_port", &self.local_port)
            .finish_non_exhaustive()
    }
}

impl MirrorSession {
    /// Create a session from the negotiated key material and the peer's raw
    /// address bytes. No socket is bound until [`start`](Self::start).
    pub fn new(
        config: SessionConfig,
        remote: &[u8],
        aes_key: &[u8],
        ecdh_secret: &[u8],
        clock: Arc<NetworkClock>,
        sink: Box<dyn VideoSink>,
    ) -> Result<Self, SessionError> {
        let remote = resolve::resolve_remote(remote)?;
        tracing::debug!(remote = %remote, "session remote resolved");
        let key = MirrorKey::new(aes_key, ecdh_secret)?;

        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(Lifecycle::Idle),
                clock,
                sink: Mutex::new(sink),
                cipher: Mutex::new(None),
                config,
                remote,
            }),
            key,
            worker: None,
            local_port: None,
        })
    }

    /// Key the stream cipher once negotiation supplies the stream connection
    /// id. Must happen before the peer sends its first video record.
    pub fn init_stream_cipher(&self, connection_id: u64) {
        let cipher = self.key.stream_cipher(connection_id);
        *self.shared.cipher.lock().unwrap() = Some(Box::new(cipher));
    }

    /// Replace the record cipher (tests, alternative key schedules).
    pub fn set_cipher(&self, cipher: Box<dyn RecordCipher>) {
        *self.shared.cipher.lock().unwrap() = Some(cipher);
    }

    /// Bound data port, once started.
    pub fn local_port(&self) -> Option<u16> {
        self.local_port
    }

    /// True while the worker thread is alive and the session has not been
    /// asked to stop.
    pub fn is_running(&self) -> bool {
        self.shared.should_run() && self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Bind the listening socket and spawn the worker.
    ///
    /// Idempotent: calling on a session that is already started returns the
    /// already-bound port. Returns [`SessionError::Socket`] when the listener
    /// cannot be set up, leaving the session startable again.
    pub fn start(&mut self) -> Result<u16, SessionError> {
        {
            let mut state = self.shared.state.lock().unwrap();
            match *state {
                Lifecycle::Idle | Lifecycle::Stopped => *state = Lifecycle::Starting,
                Lifecycle::Starting | Lifecycle::Running | Lifecycle::Stopping => {
                    return Ok(self.local_port.unwrap_or(0));
                }
            }
        }

        let (listener, port) = match self.bind_listener() {
            Ok(bound) => bound,
            Err(e) => {
                *self.shared.state.lock().unwrap() = Lifecycle::Idle;
                tracing::warn!(error = %e, "listener setup failed");
                return Err(SessionError::Socket(e));
            }
        };
        self.local_port = Some(port);
        tracing::info!(port, "mirror data port bound");

        // The worker must observe Running from its first loop iteration.
        *self.shared.state.lock().unwrap() = Lifecycle::Running;
        let shared = self.shared.clone();
        self.worker = Some(std::thread::spawn(move || worker_main(shared, listener)));

        Ok(port)
    }

    fn bind_listener(&self) -> io::Result<(TcpListener, u16)> {
        let ip: IpAddr = if self.shared.config.prefer_ipv6 && self.shared.remote.is_ipv6() {
            IpAddr::V6(Ipv6Addr::UNSPECIFIED)
        } else {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        };
        let listener = TcpListener::bind(SocketAddr::new(ip, 0))?;
        listener.set_nonblocking(true)?;
        let port = listener.local_addr()?.port();
        Ok((listener, port))
    }

    /// Signal the worker to stop and join it. No-op unless running. Blocks
    /// for at most one in-flight record (bounded by the record deadline).
    pub fn stop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if *state != Lifecycle::Running {
                return;
            }
            *state = Lifecycle::Stopping;
        }

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("mirror worker panicked");
            }
        }

        *self.shared.state.lock().unwrap() = Lifecycle::Stopped;
        tracing::info!("mirror session stopped");
    }
}

impl Drop for MirrorSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Why the worker loop ended, short of an I/O error.
enum Exit {
    StopRequested,
    PeerClosed,
}

fn worker_main(shared: Arc<Shared>, listener: TcpListener) {
    match run_worker(&shared, listener) {
        Ok(Exit::StopRequested) => tracing::info!("mirror worker exiting on stop request"),
        Ok(Exit::PeerClosed) => tracing::info!("mirror worker exiting, peer closed the stream"),
        Err(e) => tracing::warn!(error = %e, "mirror worker exiting on stream error"),
    }
}

fn run_worker(shared: &Shared, listener: TcpListener) -> io::Result<Exit> {
    let config = &shared.config;
    // The accepted stream; dropped (closed) exactly once when this returns.
    let mut conn: Option<TcpStream> = None;

    loop {
        // Cooperative cancellation point: the only place stop is observed.
        if !shared.should_run() {
            return Ok(Exit::StopRequested);
        }

        match conn {
            None => match listener.accept() {
                Ok((stream, peer)) => {
                    if config.require_known_peer && peer.ip() != shared.remote {
                        tracing::warn!(
                            peer = %peer,
                            expected = %shared.remote,
                            "rejecting stream from unexpected peer"
                        );
                        continue;
                    }
                    tracing::info!(peer = %peer, "stream connected");
                    stream.set_read_timeout(Some(config.poll_interval))?;
                    conn = Some(stream);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(config.poll_interval);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    return Err(e);
                }
            },
            Some(ref mut stream) => match read_record(shared, stream)? {
                RecordOutcome::Idle | RecordOutcome::Processed => {}
                RecordOutcome::Closed => return Ok(Exit::PeerClosed),
            },
        }
    }
}

enum RecordOutcome {
    /// Readiness timeout with no record in flight.
    Idle,
    /// One record consumed (delivered, drained, or dropped as malformed).
    Processed,
    /// Peer closed the connection at a record boundary.
    Closed,
}

fn read_record(shared: &Shared, stream: &mut TcpStream) -> io::Result<RecordOutcome> {
    let mut header = [0u8; proto::HEADER_LEN];

    // Record-start detection: the first bytes decide between an HTTP-style
    // control message and a binary record header.
    let mut filled = match stream.read(&mut header[..proto::PREFIX_LEN]) {
        Ok(0) => return Ok(RecordOutcome::Closed),
        Ok(n) => n,
        Err(e) if is_timeout(&e) => return Ok(RecordOutcome::Idle),
        Err(e) => return Err(e),
    };

    // A record is in flight; everything below runs under its deadline.
    let deadline = Instant::now() + shared.config.record_deadline;
    read_exact_deadline(stream, &mut header[..proto::PREFIX_LEN], &mut filled, deadline)?;

    let prefix: [u8; proto::PREFIX_LEN] = [header[0], header[1], header[2], header[3]];
    if proto::is_http_prefix(&prefix) {
        tracing::debug!("http control message on the data stream, left to the control plane");
        return Ok(RecordOutcome::Processed);
    }

    read_exact_deadline(stream, &mut header, &mut filled, deadline)?;
    let rec = proto::parse_record_header(&header)?;

    if rec.payload_size > shared.config.max_payload {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "payload size {} exceeds limit {}",
                rec.payload_size, shared.config.max_payload
            ),
        ));
    }

    match rec.kind {
        proto::RecordKind::Video => process_video(shared, stream, &rec, deadline)?,
        proto::RecordKind::CodecConfig => process_codec_config(shared, stream, &rec, &header, deadline)?,
        proto::RecordKind::Other(kind) => {
            tracing::trace!(kind, size = rec.payload_size, "draining record");
            drain_exact(stream, rec.payload_size, deadline)?;
        }
    }

    Ok(RecordOutcome::Processed)
}

fn process_video(
    shared: &Shared,
    stream: &mut TcpStream,
    rec: &proto::RecordHeader,
    deadline: Instant,
) -> io::Result<()> {
    // Video stamps are boot-relative device ticks, no epoch correction.
    let pts_micros = shared.clock.timestamp_to_micros(rec.timestamp_raw, false);

    let mut ciphertext = vec![0u8; rec.payload_size];
    let mut filled = 0usize;
    read_exact_deadline(stream, &mut ciphertext, &mut filled, deadline)?;

    let mut payload = vec![0u8; ciphertext.len()];
    {
        let mut cipher = shared.cipher.lock().unwrap();
        let Some(cipher) = cipher.as_mut() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "video record before stream cipher init",
            ));
        };
        cipher.decrypt(&ciphertext, &mut payload);
    }

    match proto::rewrite_nal_lengths(&mut payload) {
        Ok(units) => {
            tracing::trace!(units, pts_micros, bytes = payload.len(), "access unit framed");
            let mut sink = shared.sink.lock().unwrap();
            sink.video_process(
                &shared.clock,
                VideoUnit {
                    data: &payload,
                    kind: proto::UnitKind::AccessUnit,
                    pts_micros,
                },
            );
        }
        Err(e) => {
            // The stream itself is still in sync; only this record is lost.
            tracing::warn!(error = %e, "malformed access unit dropped");
        }
    }

    Ok(())
}

fn process_codec_config(
    shared: &Shared,
    stream: &mut TcpStream,
    rec: &proto::RecordHeader,
    header: &[u8; proto::HEADER_LEN],
    deadline: Instant,
) -> io::Result<()> {
    let dims = proto::frame_dimensions(header);
    let rotation = proto::rotation_hint(rec.option);
    tracing::debug!(
        source_width = dims.source_width,
        source_height = dims.source_height,
        width = dims.width,
        height = dims.height,
        rotation = ?rotation,
        "codec configuration record"
    );

    // Parameter sets travel in the clear.
    let mut payload = vec![0u8; rec.payload_size];
    let mut filled = 0usize;
    read_exact_deadline(stream, &mut payload, &mut filled, deadline)?;

    let params = match proto::parse_parameter_sets(&payload) {
        Ok(params) => params,
        Err(e) => {
            tracing::warn!(error = %e, "malformed parameter sets dropped");
            return Ok(());
        }
    };

    if params.parameter_bytes() >= proto::MAX_PARAMETER_SET_BYTES {
        tracing::warn!(bytes = params.parameter_bytes(), "oversized parameter sets dropped");
        return Ok(());
    }

    let config_unit = params.to_annex_b();
    let mut sink = shared.sink.lock().unwrap();
    sink.video_process(
        &shared.clock,
        VideoUnit {
            data: &config_unit,
            kind: proto::UnitKind::Configuration,
            pts_micros: 0,
        },
    );

    Ok(())
}

/// Retry-until-complete read of `buf[*filled..]`, bounded by `deadline`.
///
/// Partial data is never discarded; a poll-interval timeout just retries
/// until the deadline passes.
fn read_exact_deadline(
    stream: &mut TcpStream,
    buf: &mut [u8],
    filled: &mut usize,
    deadline: Instant,
) -> io::Result<()> {
    while *filled < buf.len() {
        match stream.read(&mut buf[*filled..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "peer closed mid-record",
                ));
            }
            Ok(n) => *filled += n,
            Err(e) if is_timeout(&e) => {
                if Instant::now() >= deadline {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "record read deadline exceeded",
                    ));
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Read and discard exactly `len` bytes through a fixed scratch buffer, so
/// uninterpreted records never allocate peer-controlled sizes.
fn drain_exact(stream: &mut TcpStream, len: usize, deadline: Instant) -> io::Result<()> {
    let mut scratch = [0u8; DRAIN_CHUNK];
    let mut remaining = len;
    while remaining > 0 {
        let want = remaining.min(scratch.len());
        let mut filled = 0usize;
        read_exact_deadline(stream, &mut scratch[..want], &mut filled, deadline)?;
        remaining -= want;
    }
    Ok(())
}

/// Read timeouts surface as `WouldBlock` on unix and `TimedOut` on windows.
fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}
