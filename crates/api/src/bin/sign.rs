//! Generate admission credentials for a hub client.
//!
//! ```text
//! octohub-sign user user123 --base-url ws://localhost:8080
//! ```

use anyhow::Context;
use clap::Parser;
use octohub_core::signature::SignatureGate;
use octohub_core::types::ClientKind;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

/// Print a fresh timestamp, signature and connection URL for a client.
#[derive(Parser, Debug)]
#[command(name = "octohub-sign", version, about)]
struct Args {
    /// Client class: "user" or "node"
    kind: ClientKind,

    /// Identity to sign
    id: String,

    /// Shared HMAC secret
    #[arg(long, env = "SIGNATURE_SECRET")]
    secret: Option<String>,

    /// Hub address the URL is built against
    #[arg(long, default_value = "ws://localhost:8080")]
    base_url: String,
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let secret = args
        .secret
        .filter(|s| !s.is_empty())
        .context("no secret given; pass --secret or set SIGNATURE_SECRET")?;
    let gate = SignatureGate::new(secret);
    let (timestamp, signature) = gate.generate_signature(&args.id);

    println!("timestamp: {timestamp}");
    println!("signature: {signature}");
    println!(
        "url: {}",
        connection_url(&args.base_url, args.kind, &args.id, &timestamp, &signature)
    );
    Ok(())
}

/// Admission URL for `id`, with every query value percent-encoded.
fn connection_url(
    base_url: &str,
    kind: ClientKind,
    id: &str,
    timestamp: &str,
    signature: &str,
) -> String {
    let id_param = match kind {
        ClientKind::User => "user_id",
        ClientKind::Node => "node_id",
    };
    format!(
        "{}/ws/{kind}?{id_param}={}&timestamp={}&signature={}",
        base_url.trim_end_matches('/'),
        encode(id),
        encode(timestamp),
        encode(signature),
    )
}

fn encode(value: &str) -> String {
    utf8_percent_encode(value, NON_ALPHANUMERIC).to_string()
}
