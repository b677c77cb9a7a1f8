//! Mirror receiver — binds the session data port, prints it for the
//! out-of-band negotiation layer, and appends every delivered unit to an
//! Annex-B dump file until Ctrl-C or the peer disconnects.
//!
//! Session negotiation (RTSP, key exchange) happens elsewhere; this binary
//! takes the negotiated material as arguments.

mod cli;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use tracing_subscriber::EnvFilter;

use mirror_session::clock::NetworkClock;
use mirror_session::config::SessionConfig;
use mirror_session::session::{MirrorSession, VideoSink, VideoUnit};

struct DumpSink {
    out: BufWriter<File>,
}

impl VideoSink for DumpSink {
    fn video_process(&mut self, _clock: &NetworkClock, unit: VideoUnit<'_>) {
        tracing::trace!(
            kind = ?unit.kind,
            pts_micros = unit.pts_micros,
            bytes = unit.data.len(),
            "unit"
        );
        if let Err(e) = self.out.write_all(unit.data) {
            tracing::warn!(error = %e, "dump write failed");
        }
    }
}

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,mirror_recv=info")),
        )
        .init();

    let aes_key = hex::decode(&args.aes_key).context("decode --aes-key")?;
    let ecdh_secret = hex::decode(&args.ecdh_secret).context("decode --ecdh-secret")?;
    let remote = match args.peer {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    };

    let file = File::create(&args.output)
        .with_context(|| format!("create {}", args.output.display()))?;
    let sink = DumpSink {
        out: BufWriter::new(file),
    };

    let config = SessionConfig {
        prefer_ipv6: args.prefer_ipv6,
        require_known_peer: args.require_known_peer,
        max_payload: args.max_payload,
        ..SessionConfig::default()
    };

    let clock = Arc::new(NetworkClock::new());
    let mut session = MirrorSession::new(
        config,
        &remote,
        &aes_key,
        &ecdh_secret,
        clock,
        Box::new(sink),
    )
    .context("create session")?;
    session.init_stream_cipher(args.connection_id);

    let port = session.start().context("start session")?;
    tracing::info!(port, peer = %args.peer, "data port bound; advertise it to the peer");

    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    let _ = ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    });

    loop {
        match stop_rx.recv_timeout(Duration::from_millis(500)) {
            Ok(()) => {
                tracing::info!("interrupt received, stopping");
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                if !session.is_running() {
                    tracing::info!("stream ended");
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    session.stop();
    tracing::info!(output = %args.output.display(), "dump complete");
    Ok(())
}
