use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;

/// Receive one mirrored video stream and dump it as Annex-B H.264.
#[derive(Parser, Debug)]
#[command(name = "mirror-recv", version)]
pub struct Args {
    /// Negotiated peer address (the device that will connect)
    #[arg(long)]
    pub peer: IpAddr,

    /// 16-byte session AES key, hex encoded
    #[arg(long)]
    pub aes_key: String,

    /// 32-byte key-exchange shared secret, hex encoded
    #[arg(long)]
    pub ecdh_secret: String,

    /// Stream connection id from session negotiation
    #[arg(long, default_value_t = 0)]
    pub connection_id: u64,

    /// Output path for the Annex-B elementary stream
    #[arg(long, default_value = "mirror.h264")]
    pub output: PathBuf,

    /// Listen on IPv6 when the peer address is IPv6
    #[arg(long)]
    pub prefer_ipv6: bool,

    /// Reject stream connections from addresses other than --peer
    #[arg(long)]
    pub require_known_peer: bool,

    /// Largest accepted record payload in bytes
    #[arg(long, default_value_t = 8 * 1024 * 1024)]
    pub max_payload: usize,
}
