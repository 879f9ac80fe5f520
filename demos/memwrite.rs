#![warn(rust_2018_idioms)]

use anyhow::Result;
use ceqp::hex;
use ceqp::Client;
use clap::Parser;

#[derive(Parser, Debug)]
#[clap(about, version)]
struct Args {
    /// Server host
    #[clap(short, long, default_value = "127.0.0.1")]
    server: String,

    /// Server port
    #[clap(short, long, default_value_t = ceqp::DEFAULT_PORT)]
    port: u16,

    /// Target address, 0x-prefixed hex or decimal
    #[clap(
        short, long,
        parse(try_from_str = hex::parse_address)
    )]
    addr: u64,

    /// Bytes to write, as a hex string (e.g. DEADBEEF)
    #[clap(short, long)]
    data: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let data = hex::hex_to_bytes(&args.data)?;

    let mut client = Client::connect((args.server.as_str(), args.port))?;
    client.write_memory(args.addr, &data)?;
    println!("wrote {} bytes at {:#x}", data.len(), args.addr);

    Ok(())
}
