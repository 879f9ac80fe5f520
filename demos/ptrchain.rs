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

    /// Chain base address, 0x-prefixed hex or decimal
    #[clap(
        short, long,
        parse(try_from_str = hex::parse_address)
    )]
    base: u64,

    /// Comma-separated offsets; hex with 0x or bare hex digits, else
    /// decimal, optionally negative (e.g. "0x10,-8,1F")
    #[clap(short, long)]
    offsets: String,

    /// Force pointer width: u32ptr or u64ptr
    #[clap(short, long)]
    dtype: Option<String>,

    /// Read length at the final address (default: one pointer)
    #[clap(short, long)]
    len: Option<u32>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let offsets = args
        .offsets
        .split(',')
        .map(hex::parse_offset)
        .collect::<Result<Vec<_>, _>>()?;

    let mut client = Client::connect((args.server.as_str(), args.port))?;
    let chain = client.read_pointer_chain(
        args.base,
        &offsets,
        args.dtype.as_deref(),
        args.len,
    )?;
    println!("{:#x}: {}", chain.addr, hex::bytes_to_hex(&chain.data));

    Ok(())
}
