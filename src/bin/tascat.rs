//! tascat - interactive lobby console.
//!
//! Connects to the configured lobby server, prints every inbound command and
//! sends whatever you type as raw protocol lines. Lines starting with `/` are
//! local: `/starttls` requests the in-band TLS upgrade, `/script` prints the
//! start script for the joined battle, `/state` summarizes the lobby model
//! and `/quit` leaves.

use std::time::Duration;

use tas_proto::Command;
use taslink::{
    ClientConfig, LobbyClient, Priority, ReceiveOutcome, SessionError, StartScriptOverlay, WILDCARD,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// What one trip through the event loop has to act on.
enum Step {
    Input(Option<String>),
    Net(Result<ReceiveOutcome, SessionError>),
    Keepalive,
    Interrupt,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    // Load configuration
    let config = match std::env::args().nth(1) {
        Some(path) => ClientConfig::load(&path).map_err(|e| {
            error!(path = %path, error = %e, "Failed to load config");
            e
        })?,
        None => ClientConfig::default(),
    };

    info!(host = %config.host, port = config.port, "Starting tascat");

    let mut client = LobbyClient::new(config);
    client.add_pre_callback(
        WILDCARD,
        Priority::default(),
        0,
        Box::new(|cmd, _state, _outbox| {
            println!("< {}", render(cmd));
        }),
    );

    client.connect().await?;
    println!("* connected; type protocol lines, or /starttls /script /state /quit");

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; swallow it.
    keepalive.tick().await;

    loop {
        let step = tokio::select! {
            line = input.next_line() => Step::Input(line?),
            outcome = client.receive() => Step::Net(outcome),
            _ = keepalive.tick() => Step::Keepalive,
            _ = tokio::signal::ctrl_c() => Step::Interrupt,
        };

        match step {
            Step::Input(None) | Step::Interrupt => {
                client.disconnect().await;
                println!("* bye");
                break;
            }

            Step::Input(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Some(local) = line.strip_prefix('/') {
                    if !run_local(&mut client, local).await {
                        break;
                    }
                    continue;
                }
                match tas_proto::unmarshall(line) {
                    Ok(cmd) => match client.send_command(&cmd).await {
                        Ok(()) => println!("> {line}"),
                        Err(e) => warn!(error = %e, "send failed"),
                    },
                    Err(e) => warn!(error = %e, "not a protocol line"),
                }
            }

            Step::Net(outcome) => {
                match outcome? {
                    ReceiveOutcome::Idle | ReceiveOutcome::HandshakePending => {}
                    ReceiveOutcome::Batch(summary) => {
                        if !summary.clean() {
                            warn!(
                                failures = summary.failures,
                                unhandled = summary.unhandled,
                                "batch finished with issues"
                            );
                        }
                    }
                    ReceiveOutcome::TlsEstablished(details) => {
                        println!(
                            "* tls established, fingerprint {} (hostname verified: {})",
                            details.fingerprint_sha256, details.hostname_verified
                        );
                    }
                    ReceiveOutcome::Disconnected(reason) => {
                        println!("* disconnected: {reason}");
                        break;
                    }
                }
                client.check_timeouts().await;
            }

            Step::Keepalive => {
                if let Err(e) = client.send_command(&Command::new("PING")).await {
                    warn!(error = %e, "keepalive failed");
                }
            }
        }
    }

    Ok(())
}

/// Handle a `/`-prefixed local command. Returns `false` to quit.
async fn run_local(client: &mut LobbyClient, command: &str) -> bool {
    match command.trim() {
        "quit" => {
            client.disconnect().await;
            println!("* bye");
            return false;
        }
        "starttls" => match client.request_tls_upgrade(None).await {
            Ok(()) => println!("* tls upgrade requested"),
            Err(e) => warn!(error = %e, "tls upgrade refused"),
        },
        "script" => match client.start_script(&[], false, &StartScriptOverlay::default()) {
            Ok(script) => println!("{}", script.lines.join("\n")),
            Err(e) => warn!(error = %e, "no start script"),
        },
        "state" => {
            let state = client.state();
            println!(
                "* phase {:?}, {} users, {} channels, {} battles, joined: {:?}",
                client.phase(),
                state.users().len(),
                state.channels().len(),
                state.battles().len(),
                state.active_battle().map(|b| b.id),
            );
        }
        other => warn!(command = other, "unknown local command"),
    }
    true
}

/// Rebuild the wire form of a command for display. Falls back to joining the
/// words when the command cannot be marshalled (undecodable inbound lines are
/// dispatched as a single token).
fn render(cmd: &Command) -> String {
    match tas_proto::marshall(cmd) {
        Ok(line) => line,
        Err(_) => cmd.words.join(" "),
    }
}
