//! kdlink - Remote Kernel Debugger
//!
//! Entry point that handles CLI argument parsing and role switching
//! between the debugger console and a simulated debuggee.

use std::net::{TcpListener, TcpStream};
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use colored::*;

use kdlink::config::{parse_number, KdConfig, Role};
use kdlink::kd::{
    Collaborators, DebuggeeExit, DebuggeeListener, KdContext, KernelDebugger, SimulatedDebuggee,
};
use kdlink::transport::{StreamTransport, Transport};
use kdlink::ui::cli::run_cli;
use kdlink::ui::ConsoleSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Wait for a debuggee and open the console
    Debugger,
    /// Connect to a debugger as a simulated target
    Debuggee,
}

/// kdlink: Remote kernel debugger over a framed TCP link
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Which end of the link to run
    #[arg(short, long, value_enum, default_value_t = Mode::Debugger)]
    mode: Mode,

    /// Address to listen on (debugger) or connect to (debuggee)
    #[arg(short, long)]
    address: Option<String>,

    /// Do not disassemble the instruction window on pause
    #[arg(long, default_value_t = false)]
    no_disasm: bool,

    /// Largest packet accepted from the peer (hex with 0x)
    #[arg(long, value_parser = parse_size)]
    max_packet_size: Option<usize>,

    /// Size of the transparent-mode trap registry
    #[arg(long, value_parser = parse_size)]
    trap_capacity: Option<usize>,

    /// Enter transparent-mode before connecting (debuggee only)
    #[arg(long, default_value_t = false)]
    hide: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_size(s: &str) -> Result<usize, String> {
    parse_number(s)
        .map(|n| n as usize)
        .map_err(|e| format!("invalid size '{}': {}", s, e))
}

fn main() -> anyhow::Result<()> {
    // 1. Initialize logger with verbosity level
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(
        match std::env::args().filter(|a| a == "-v").count() {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        },
    ))
    .init();

    // 2. Parse command line arguments
    let args = Args::parse();
    let config = build_config(&args)?;

    log::info!("kdlink initialized");
    log::debug!("Config: {:?}", config);

    // 3. Branch based on role
    match config.role {
        Role::Debugger => run_debugger(config),
        Role::Debuggee => run_debuggee(config, args.hide),
    }
}

fn build_config(args: &Args) -> anyhow::Result<KdConfig> {
    let mut config = KdConfig::new();
    config.role = match args.mode {
        Mode::Debugger => Role::Debugger,
        Mode::Debuggee => Role::Debuggee,
    };
    if let Some(address) = &args.address {
        config.address = address.clone();
    }
    if let Some(size) = args.max_packet_size {
        config.max_packet_size = size;
    }
    if let Some(capacity) = args.trap_capacity {
        config.trap_capacity = capacity;
    }
    config.show_disassembly = !args.no_disasm;

    config.apply_env()?;
    config.validate()?;
    Ok(config)
}

fn run_debugger(config: KdConfig) -> anyhow::Result<()> {
    println!(
        "[*] kdlink v{} - waiting for a debuggee on {}",
        env!("CARGO_PKG_VERSION"),
        config.address
    );

    let listener = TcpListener::bind(&config.address)?;
    let (stream, peer) = listener.accept()?;
    log::info!("Debuggee connected from {}", peer);

    let transport: Arc<dyn Transport> =
        Arc::new(StreamTransport::tcp(stream)?.with_max_packet_size(config.max_packet_size));
    let collab = Collaborators::new(transport, Arc::new(ConsoleSink::new()));
    let ctx = Arc::new(KdContext::new(config, collab));

    let debugger = KernelDebugger::connect(ctx)?;
    run_cli(&debugger)?;

    if debugger.is_connected() {
        if let Err(e) = debugger.close_and_unload() {
            println!("{} {}", "[!]".red(), e);
        }
    }
    Ok(())
}

fn run_debuggee(config: KdConfig, hide: bool) -> anyhow::Result<()> {
    println!(
        "[*] kdlink v{} - simulated debuggee connecting to {}",
        env!("CARGO_PKG_VERSION"),
        config.address
    );

    let stream = TcpStream::connect(&config.address)?;
    let transport: Arc<dyn Transport> =
        Arc::new(StreamTransport::tcp(stream)?.with_max_packet_size(config.max_packet_size));

    let target = Arc::new(SimulatedDebuggee::from_config(transport.clone(), &config));
    if hide {
        let status = target.hide();
        if status.is_success() {
            println!("[*] transparent debugging successfully enabled :)");
        } else {
            println!("{} {}", "[!]".red(), status.describe());
        }
    }
    let listener = DebuggeeListener::new(transport, target.clone(), Arc::new(ConsoleSink::new()))
        .with_agent(target.clone());

    for message in target.handshake() {
        listener.send(&message)?;
    }

    match listener.run()? {
        DebuggeeExit::ConnectionClosed => println!("[*] the debugger closed the connection"),
        DebuggeeExit::StopRequested => println!("[*] debuggee unloaded"),
    }
    Ok(())
}
