//! jackpatch66 - remember and restore the JACK graph.
//!
//! Runs as an NSM client inside a session; `--save FILE` and the
//! positional `FILE` monitor mode work standalone for testing and
//! debugging.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use nix::sys::signal::{signal, SigHandler, Signal};
use rosc::OscMessage;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use nsm66_core::url;
use nsm66_jackpatch::graph::{JackGraph, PortGraph};
use nsm66_jackpatch::notify::{self, PortNotifier};
use nsm66_jackpatch::nsm::{self, str_arg, NsmLink, CLIENT_NAME};
use nsm66_jackpatch::patchbay::PatchBay;
use nsm66_jackpatch::snapshot;

/// Remember and restore the JACK Audio Connection Kit graph.
///
/// Intended as a module for the New Session Manager, communicating
/// over OSC inside an NSM session. With a positional FILE it restores
/// that snapshot and monitors it standalone instead.
#[derive(Parser, Debug)]
#[command(name = "jackpatch66", version, about, long_about = None)]
struct Args {
    /// Save the current connection snapshot to FILE, then exit
    #[arg(long, value_name = "FILE")]
    save: Option<PathBuf>,

    /// Don't try to connect to NSM, and show verbose status
    #[arg(long)]
    debug: bool,

    /// Show informational messages
    #[arg(long)]
    verbose: bool,

    /// Restore this snapshot and monitor it (standalone mode)
    file: Option<PathBuf>,
}

static DIE_NOW: AtomicBool = AtomicBool::new(false);

extern "C" fn request_exit(_signum: i32) {
    DIE_NOW.store(true, Ordering::Relaxed);
}

fn set_traps() {
    let handler = SigHandler::Handler(request_exit);
    // Safety: the handler only stores to an atomic flag.
    unsafe {
        let _ = signal(Signal::SIGHUP, handler);
        let _ = signal(Signal::SIGINT, handler);
        let _ = signal(Signal::SIGTERM, handler);
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let default_filter = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();
    set_traps();

    let (client, _status) =
        jack::Client::new(CLIENT_NAME, jack::ClientOptions::NO_START_SERVER)
            .context("JACK client could not open")?;
    info!("JACK client created");
    let ring = jack::RingBuffer::new(notify::RING_CAPACITY)
        .context("JACK ringbuffer could not be created")?;
    let (mut reader, writer) = ring.into_reader_writer();
    let active = client
        .activate_async(PortNotifier::new(writer), ())
        .context("failed to activate the JACK client")?;

    let mut bay = PatchBay::new();
    if let Some(file) = args.save.clone() {
        save_once(&args, active.as_client(), &mut bay, &file)?;
    } else if let Some(file) = args.file.clone() {
        monitor_standalone(active.as_client(), &mut reader, &mut bay, &file)?;
    } else {
        run_nsm_mode(&args, active.as_client(), &mut reader, &mut bay)?;
    }

    info!("closing JACK client");
    if let Err(err) = active.deactivate() {
        warn!(%err, "JACK deactivate failed");
    }
    Ok(())
}

/// `--save FILE`: snapshot the live graph into FILE and exit. The
/// existing file is loaded first so connections whose ports are
/// temporarily missing survive the save.
fn save_once(args: &Args, client: &jack::Client, bay: &mut PatchBay, file: &Path) -> Result<()> {
    let graph = JackGraph::new(client);
    if !args.debug && bay.load_file(file).is_ok() {
        bay.register_existing_ports(&graph);
    }
    info!(file = %file.display(), "standalone: saving the current graph");
    match snapshot::take(bay, &graph) {
        Some(lines) => {
            snapshot::write_file(file, &lines).context("could not write the snapshot")?
        }
        None => warn!("no ports in the graph, nothing saved"),
    }
    Ok(())
}

/// Positional FILE: restore the snapshot and keep reconnecting as
/// ports come and go, without any NSM daemon.
fn monitor_standalone(
    client: &jack::Client,
    reader: &mut jack::RingBufferReader,
    bay: &mut PatchBay,
    file: &Path,
) -> Result<()> {
    let graph = JackGraph::new(client);
    bay.load_file(file)
        .with_context(|| format!("could not read {}", file.display()))?;
    bay.register_existing_ports(&graph);
    info!("monitoring in standalone mode");
    while !DIE_NOW.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(50));
        drain_port_events(reader, bay, &graph);
    }
    Ok(())
}

/// Normal operation: register with the session daemon and serve
/// open/save while tracking the graph.
fn run_nsm_mode(
    args: &Args,
    client: &jack::Client,
    reader: &mut jack::RingBufferReader,
    bay: &mut PatchBay,
) -> Result<()> {
    let mut link = NsmLink::bind(Duration::from_millis(200))?;
    if !args.debug {
        let daemon_url = nsm::find_daemon_url()
            .context("could not register as an NSM client: no daemon URL")?;
        let addr = url::parse_osc_url(&daemon_url)
            .with_context(|| format!("unusable daemon URL {daemon_url}"))?;
        let process_name = std::env::args()
            .next()
            .unwrap_or_else(|| CLIENT_NAME.to_string());
        link.announce(addr, &process_name);
    }
    let graph = JackGraph::new(client);
    while !DIE_NOW.load(Ordering::Relaxed) {
        while let Some((msg, from)) = link.recv() {
            handle_message(&mut link, &msg, from, bay, &graph);
        }
        drain_port_events(reader, bay, &graph);
    }
    Ok(())
}

fn drain_port_events(
    reader: &mut jack::RingBufferReader,
    bay: &mut PatchBay,
    graph: &dyn PortGraph,
) {
    while let Some(event) = notify::try_read_event(reader) {
        if event.registered {
            bay.handle_port_appeared(&event.name, graph);
        } else {
            bay.handle_port_vanished(&event.name);
        }
    }
}

fn handle_message(
    link: &mut NsmLink,
    msg: &OscMessage,
    from: SocketAddr,
    bay: &mut PatchBay,
    graph: &dyn PortGraph,
) {
    match msg.addr.as_str() {
        "/reply" => {
            if str_arg(msg, 0) == Some("/nsm/server/announce") {
                info!(
                    daemon = str_arg(msg, 1).unwrap_or(""),
                    "successfully registered"
                );
                link.active = true;
                link.daemon = Some(from);
            }
        }
        "/error" => {
            if str_arg(msg, 0) == Some("/nsm/server/announce") {
                error!(
                    message = str_arg(msg, 2).unwrap_or(""),
                    "failed to register with NSM"
                );
                link.active = false;
            }
        }
        "/nsm/client/open" => handle_open(link, msg, bay, graph),
        "/nsm/client/save" => handle_save(link, bay, graph),
        _ => {}
    }
}

/// Point the patch bay at `<project>.jackpatch`. A missing file is a
/// fresh project, not an error.
fn handle_open(link: &mut NsmLink, msg: &OscMessage, bay: &mut PatchBay, graph: &dyn PortGraph) {
    let Some(project) = str_arg(msg, 0) else {
        return;
    };
    let file = PathBuf::from(format!("{project}.jackpatch"));
    if file.is_file() {
        if bay.load_file(&file).is_ok() {
            bay.register_existing_ports(graph);
        } else {
            link.reply_error("/nsm/client/open", -1, "Could not open file");
            return;
        }
    } else {
        bay.clear_patches();
    }
    link.project_file = Some(file);
    link.reply_ok("/nsm/client/open");
}

fn handle_save(link: &mut NsmLink, bay: &mut PatchBay, graph: &dyn PortGraph) {
    if let Some(file) = link.project_file.clone() {
        match snapshot::take(bay, graph) {
            Some(lines) => {
                if let Err(err) = snapshot::write_file(&file, &lines) {
                    error!(file = %file.display(), %err, "could not write the snapshot");
                }
            }
            None => warn!("no ports in the graph, snapshot unchanged"),
        }
    }
    link.reply_ok("/nsm/client/save");
}
