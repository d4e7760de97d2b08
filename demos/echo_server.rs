/*
 * mnio - non-blocking channels, byte buffers and a readiness selector
 * This is free and unencumbered software released into the public domain.
 */
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str;

use mnio_rs::{ByteBuffer, Context, EventLoop, Handler, LoopConfig, NioError, SelectionKey};

use log::{info, warn, error};

const PORT_NUMBER: u16 = 8080;
const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Echoes every complete line back to the client, upper-cased
#[derive(Default)]
struct LineEcho {
    connections: usize,
}

impl Handler for LineEcho {
    fn accepted(&mut self, _ctx: &mut Context<'_>, key: SelectionKey, peer: Option<SocketAddr>) {
        self.connections += 1;
        info!("Connection #{} received from {:?} (key {})", self.connections, peer, key.token());
    }

    fn received(&mut self, ctx: &mut Context<'_>, key: SelectionKey, data: &mut ByteBuffer) {
        while let Some(end) = data.readable().iter().position(|byte| *byte == b'\n') {
            let line = match data.get(end + 1) {
                Ok(line) => line.to_ascii_uppercase(),
                Err(error) => return error!("Failed to take line: {:?}", error),
            };
            info!("Request: {:?}", str::from_utf8(&line[..end]).unwrap_or("<binary>"));
            match ctx.write(key, &line) {
                Ok(_) => (),
                Err(NioError::Overflow { .. }) => {
                    warn!("Client is not reading, dropping connection!");
                    ctx.close(key);
                    return;
                },
                Err(error) => return error!("Failed to queue response: {:?}", error),
            }
        }
    }

    fn closed(&mut self, _ctx: &mut Context<'_>, key: SelectionKey) {
        info!("Connection closed (key {})", key.token());
    }
}

fn main() {
    /* Initialize the log output */
    env_logger::init_from_env(env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"));

    /* Print logo */
    info!("mnio - Example Line Echo Server [Version {}]", PKG_VERSION);

    /* Create the event loop */
    let config = LoopConfig::default().with_read_buffer_size(1024);
    let mut event_loop = EventLoop::with_config(config, LineEcho::default()).expect("Failed to create event loop!");

    /* Register the loop's handle with Ctrl+C handler */
    let handle = event_loop.handle();
    ctrlc::set_handler(move || {
        warn!("Shutdown has been requested!");
        handle.stop().expect("Failed to stop the event loop!");
    })
    .expect("Failed to register CTRL+C handler!");

    /* Listen on local socket */
    if let Err(error) = event_loop.listen(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), PORT_NUMBER)) {
        return error!("Failed to bind listener: {:?}", error);
    }

    /* Serve until stopped, recovering from selector failures */
    info!("Waiting for incoming connections...");
    loop {
        match event_loop.run() {
            Ok(_) => break,
            Err(NioError::PollFailure(error)) => {
                error!("Polling failed: {:?}", error);
                match event_loop.recover() {
                    Ok(moved) => warn!("Recovered {} endpoints", moved.len()),
                    Err(error) => return error!("Recovery failed: {:?}", error),
                }
            },
            Err(error) => return error!("Event loop failed: {:?}", error),
        }
    }

    info!("Served {} connections. Goodbye!", event_loop.handler().connections);
}
