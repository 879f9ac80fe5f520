#![warn(rust_2018_idioms)]

use anyhow::Result;
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

    /// Module file name, e.g. kernel32.dll (case-insensitive)
    #[clap(short, long)]
    module: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut client = Client::connect((args.server.as_str(), args.port))?;
    let base = client.get_module_base(&args.module)?;
    println!("{}: {base:#X}", args.module);

    Ok(())
}
