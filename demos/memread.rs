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

    /// Read length (bytes)
    #[clap(short, long, default_value_t = 4)]
    len: u32,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut client = Client::connect((args.server.as_str(), args.port))?;
    let data = client.read_memory(args.addr, args.len)?;
    println!("{:#x}: {}", args.addr, hex::bytes_to_hex(&data));

    Ok(())
}
