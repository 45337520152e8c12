//! nsm66d - daemon and server for NSM-style audio sessions.
//!
//! Daemonization must happen before the Tokio runtime starts: `fork()`
//! only duplicates the calling thread, so forking after worker threads
//! exist leaves mutexes locked forever in the child. This binary
//! therefore uses a synchronous `main()` that detaches first and only
//! then constructs the (current-thread) runtime via `block_on()`.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use nix::unistd::ForkResult;
use tracing_subscriber::EnvFilter;

use nsm66_core::paths;
use nsm66_daemon::{Daemon, DaemonConfig};

/// Daemon and server for the New Session Manager protocol.
///
/// nsm66d can be run headless with existing sessions. To create new
/// ones it is recommended to use a GUI such as nsm-legacy-gui or
/// Agordejo.
#[derive(Parser, Debug)]
#[command(name = "nsm66d", version, about, long_about = None)]
struct Args {
    /// Bind the OSC server to a fixed UDP port (default: system-assigned)
    #[arg(long)]
    osc_port: Option<u16>,

    /// Base path for sessions (default: $XDG_DATA_HOME/nsm)
    #[arg(long)]
    session_root: Option<String>,

    /// Load the named session from the session root immediately
    #[arg(long)]
    load_session: Option<String>,

    /// Connect to a running GUI, e.g. osc.udp://localhost:38356/
    #[arg(long)]
    gui_url: Option<String>,

    /// Detach from the console after initialization
    #[arg(long)]
    detach: bool,

    /// Suppress messages except warnings and errors
    #[arg(long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.quiet { "warn" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    if args.detach {
        daemonize().context("failed to detach from the console")?;
    }

    let session_root = match &args.session_root {
        Some(root) => PathBuf::from(paths::trim_trailing_slash(root)),
        None => paths::default_session_root(),
    };
    let config = DaemonConfig {
        session_root,
        runtime_dir: paths::runtime_dir(),
        osc_port: args.osc_port,
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build the async runtime")?;
    runtime.block_on(async {
        let mut daemon = Daemon::new(config)
            .await
            .context("failed to initialize the daemon")?;
        if let Some(url) = &args.gui_url {
            daemon
                .attach_gui(url)
                .with_context(|| format!("failed to attach to the GUI at {url}"))?;
        }
        if let Some(name) = &args.load_session {
            if let Err(code) = daemon.load_named_session(name).await {
                bail!("could not load session {name}: {code}");
            }
        }
        daemon.run().await.context("event loop failed")?;
        Ok(())
    })
}

/// Fork and detach. The parent exits immediately; the child becomes a
/// session leader so closing the terminal cannot signal it.
fn daemonize() -> Result<()> {
    // Safety: called from a single-threaded context, before the
    // runtime spawns anything.
    match unsafe { nix::unistd::fork() }.context("fork failed")? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {
            nix::unistd::setsid().context("setsid failed")?;
            Ok(())
        }
    }
}
