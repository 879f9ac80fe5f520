#![warn(rust_2018_idioms)]

//! Self-contained tour of the protocol: a server over an in-process
//! memory arena, driven by a client on the same machine. A synthetic
//! "game.exe" module hosts a counter behind a pointer chain; the loop
//! bumps it, reads it back through the chain, and heartbeats until
//! Ctrl-C.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use ceqp::{diagnostic_from_env, ArenaProvider, Client, MemoryProvider, Server};
use clap::Parser;

static RUNNING: AtomicBool = AtomicBool::new(true);

const ARENA_BASE: u64 = 0x0040_0000;
const COUNTER_ADDR: u64 = 0x0040_2000;

#[derive(Parser, Debug)]
#[clap(about, version)]
struct Args {
    /// Port to serve on
    #[clap(short, long, default_value_t = ceqp::DEFAULT_PORT)]
    port: u16,
}

fn seeded_provider() -> Result<ArenaProvider> {
    let mut provider = ArenaProvider::new(ARENA_BASE, 0x4000);
    provider.add_module("game.exe", ARENA_BASE);
    // game.exe+0x100 points at a struct whose +0x20 slot is the counter.
    provider.write(ARENA_BASE + 0x100, &0x0040_1000u64.to_le_bytes())?;
    provider.write(0x0040_1000 + 0x20, &COUNTER_ADDR.to_le_bytes())?;
    Ok(provider)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    ctrlc::set_handler(|| {
        println!("received Ctrl-C, quitting...");
        RUNNING.store(false, Ordering::SeqCst);
    })?;

    let args = Args::parse();
    let mut server = Server::new(Arc::new(seeded_provider()?), diagnostic_from_env());
    server.start(args.port)?;

    let mut client = Client::connect(("127.0.0.1", args.port))?;
    let base = client.get_module_base("GAME.EXE")?;
    println!("game.exe base: {base:#x}");

    let mut counter: u32 = 0;
    while RUNNING.load(Ordering::SeqCst) {
        counter += 1;
        client.write_memory(COUNTER_ADDR, &counter.to_le_bytes())?;

        // [[game.exe+0x100]+0x20] -> counter
        let chain = client.read_pointer_chain(base + 0x100, &[0x20, 0x00], None, Some(4))?;
        println!(
            "chain -> {:#x} = {}",
            chain.addr,
            u32::from_le_bytes([chain.data[0], chain.data[1], chain.data[2], chain.data[3]])
        );

        client.ping()?;
        std::thread::sleep(ceqp::HEARTBEAT_INTERVAL);
    }

    server.stop();
    Ok(())
}
