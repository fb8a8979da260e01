//! The service binary: a stdio transport adapter in front of the file
//! service. Method calls arrive as JSON lines on stdin; replies and signals
//! leave as JSON lines on stdout. Logs go to stderr so the event stream
//! stays clean.

use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::Parser;

use charon_service::bus::{BusConnection, BusScope, SERVICE_NAME};
use charon_service::service::{EventSink, FileService};
use charon_service::wire::{IncomingMessage, OutgoingMessage};

#[derive(Debug, Parser)]
#[command(name = "charon-service", about = "Data extraction service for 3D-printing container files.")]
struct Args {
    /// Attach to the session bus ("1") or the system bus (anything else).
    #[arg(long, env = "CHARON_USE_SESSION_BUS", default_value = "1")]
    use_session_bus: String,

    /// Raise log verbosity to debug ("1").
    #[arg(long, env = "CHARON_DEBUG", default_value = "0")]
    debug: String,
}

/// Serialises outgoing messages as JSON lines on stdout, and mirrors them
/// onto the bus connection's signal receivers.
struct StdoutSink {
    out: Mutex<io::Stdout>,
    bus: Arc<BusConnection>,
}

impl StdoutSink {
    fn emit(&self, message: &OutgoingMessage) {
        self.bus.emit(message);
        let mut out = self
            .out
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let write = serde_json::to_writer(&mut *out, message)
            .map_err(io::Error::from)
            .and_then(|()| out.write_all(b"\n"))
            .and_then(|()| out.flush());
        if let Err(err) = write {
            tracing::warn!(error = %err, "failed to deliver an event");
        }
    }
}

impl EventSink for StdoutSink {
    fn data(&self, request_id: &str, data: charon::DataMap) {
        self.emit(&OutgoingMessage::data(request_id, data));
    }

    fn completed(&self, request_id: &str) {
        self.emit(&OutgoingMessage::Completed {
            id: request_id.to_string(),
        });
    }

    fn error(&self, request_id: &str, message: &str) {
        self.emit(&OutgoingMessage::Error {
            id: request_id.to_string(),
            message: message.to_string(),
        });
    }
}

fn init_logging(args: &Args) {
    let default_filter = if args.debug == "1" { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let scope = BusScope::from_flag(&args.use_session_bus);
    let bus = BusConnection::init(scope);
    tracing::info!(service = SERVICE_NAME, ?scope, "starting file service");

    let sink = Arc::new(StdoutSink {
        out: Mutex::new(io::stdout()),
        bus: bus.clone(),
    });
    let service = FileService::start(sink.clone());

    serve(&service, sink.as_ref()).context("transport loop failed")?;

    service.shutdown();
    bus.shutdown();
    Ok(())
}

/// Reads method calls line by line until stdin closes.
fn serve(service: &FileService, sink: &StdoutSink) -> anyhow::Result<()> {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("failed to read from stdin")?;
        if line.trim().is_empty() {
            continue;
        }
        let message: IncomingMessage = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(error = %err, "ignoring malformed request line");
                continue;
            }
        };
        match message {
            IncomingMessage::StartRequest {
                id,
                file_path,
                virtual_paths,
            } => {
                // The reply is written while the enqueue barrier is held, so
                // it always precedes the first event for the id.
                service.start_request(&id, &file_path, virtual_paths, |ok| {
                    sink.emit(&OutgoingMessage::Started { id: id.clone(), ok });
                });
            }
            IncomingMessage::CancelRequest { id } => {
                service.cancel_request(&id);
            }
        }
    }
    Ok(())
}
