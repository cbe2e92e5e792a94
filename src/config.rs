//! Configuration module for the echo server.
//!
//! The whole surface is one flag: `-p <port>`. There is no config file and
//! no subcommands; the port covers both the TCP listener and the UDP socket.

use clap::Parser;

/// Port used when `-p` is not given.
pub const DEFAULT_PORT: u16 = 10086;

/// Command-line arguments for the echo server
#[derive(Parser, Debug)]
#[command(name = "echod")]
#[command(version = "0.1.0")]
#[command(about = "A dual-protocol TCP/UDP echo server", long_about = None)]
pub struct Config {
    /// Port to bind for both TCP and UDP
    #[arg(short = 'p', default_value_t = DEFAULT_PORT)]
    pub port: u16,
}

impl Config {
    /// Parse configuration from the process arguments.
    pub fn load() -> Self {
        Config::parse()
    }
}
