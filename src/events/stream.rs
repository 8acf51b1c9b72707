//! Server-sent event stream of the event bus.
//!
//! Each frame is `data: <json array of WatchEvent>\n\n`, written only when
//! the bus has changed since the previous frame. A comment line is sent
//! now and then so a closed connection is noticed even on a quiet bus.

use std::io::{self, Write};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tiny_http::{Header, Method, Request, Response, Server, StatusCode};

use super::bus::{EventBus, WatchEvent};
use crate::watch::CancelToken;

pub const STREAM_INTERVAL: Duration = Duration::from_secs(1);

/// Quiet polls between keep-alive comments
const HEARTBEAT_EVERY: u32 = 15;

/// Path of the live event stream
pub const STREAM_PATH: &str = "/stream_events";

/// How often the server loop checks for cancellation
const RECV_TICK: Duration = Duration::from_millis(100);

fn write_frame<W: Write>(out: &mut W, events: &[WatchEvent]) -> io::Result<()> {
    let json = serde_json::to_string(events).map_err(io::Error::other)?;
    let frame = format!("data: {}\n\n", json);
    out.write_all(frame.as_bytes())?;
    out.flush()
}

/// Push bus changes to `out` until cancelled (`Ok`) or the writer fails
pub fn stream_events<W: Write>(
    bus: &EventBus,
    out: &mut W,
    interval: Duration,
    cancel: &CancelToken,
) -> io::Result<()> {
    let mut seen = 0u64;
    let mut quiet = 0u32;

    loop {
        if let Some((seq, events)) = bus.snapshot_if_changed(seen) {
            write_frame(out, &events)?;
            seen = seq;
            quiet = 0;
        } else {
            quiet += 1;
            if quiet >= HEARTBEAT_EVERY {
                out.write_all(b": keep-alive\n\n")?;
                out.flush()?;
                quiet = 0;
            }
        }

        if !cancel.sleep(interval) {
            return Ok(());
        }
    }
}

/// Serve `GET /stream_events` on `addr`, one thread per connected client.
/// Every other request is answered with 404.
pub fn serve_events(
    addr: &str,
    bus: Arc<EventBus>,
    cancel: CancelToken,
) -> io::Result<JoinHandle<()>> {
    let server = Server::http(addr).map_err(io::Error::other)?;
    log::info!("Event stream listening on http://{}{}", addr, STREAM_PATH);

    Ok(thread::spawn(move || {
        while !cancel.is_cancelled() {
            match server.recv_timeout(RECV_TICK) {
                Ok(Some(request)) => route(request, &bus, &cancel),
                Ok(None) => {}
                Err(e) => {
                    log::warn!("Event stream receive failed: {}", e);
                    if !cancel.sleep(RECV_TICK) {
                        break;
                    }
                }
            }
        }
        log::info!("Event stream server stopped");
    }))
}

fn route(request: Request, bus: &Arc<EventBus>, cancel: &CancelToken) {
    let path = request.url().split('?').next().unwrap_or_default();
    if *request.method() != Method::Get || path != STREAM_PATH {
        log::debug!("Event stream: no route for {:?} {}", request.method(), request.url());
        if let Err(e) = request.respond(Response::empty(StatusCode(404))) {
            log::debug!("Event stream: failed to answer 404: {}", e);
        }
        return;
    }

    let bus = Arc::clone(bus);
    let cancel = cancel.clone();
    thread::spawn(move || {
        let mut out = request.into_writer();
        let result = write_stream_head(&mut out)
            .and_then(|()| stream_events(&bus, &mut out, STREAM_INTERVAL, &cancel));
        if let Err(e) = result {
            log::debug!("Event stream client closed: {}", e);
        }
    });
}

/// Status line and headers of the long-lived event-stream response
fn write_stream_head<W: Write>(out: &mut W) -> io::Result<()> {
    let status = StatusCode(200);
    let mut head = format!("HTTP/1.1 {} {}\r\n", status.0, status.default_reason_phrase());
    for (field, value) in [
        ("Content-Type", "text/event-stream"),
        ("Cache-Control", "no-cache"),
        ("Connection", "keep-alive"),
    ] {
        let header = Header::from_bytes(field, value)
            .map_err(|()| io::Error::other(format!("invalid header {}", field)))?;
        head.push_str(&format!("{}\r\n", header));
    }
    head.push_str("\r\n");
    out.write_all(head.as_bytes())?;
    out.flush()
}
