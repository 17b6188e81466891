//! CLI - reedline-based debugger console
//!
//! Reads commands at the `kd>` prompt and turns them into requests on the
//! connected [`KernelDebugger`]. Output produced by the dispatcher thread is
//! printed by the session's display sink as it arrives.

use anyhow::Result;
use colored::Colorize;
use reedline::{Prompt, PromptHistorySearch, PromptHistorySearchStatus, Reedline, Signal};
use std::borrow::Cow;

use crate::config::parse_number;
use crate::disasm::format_address;
use crate::kd::{ClientError, KernelDebugger};
use crate::protocol::payload::{
    DetailsAction, ModifyEventAction, ReadMemoryRequest, StepType, TestQueryRequest,
};

/// Prompt showing the operating core of the debuggee
pub struct KdPrompt {
    current_core: u32,
    is_running: bool,
}

impl KdPrompt {
    pub fn new() -> Self {
        Self {
            current_core: 0,
            is_running: false,
        }
    }

    pub fn set_core(&mut self, core: u32) {
        self.current_core = core;
    }

    pub fn set_running(&mut self, running: bool) {
        self.is_running = running;
    }
}

impl Default for KdPrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl Prompt for KdPrompt {
    fn render_prompt_left(&self) -> Cow<'_, str> {
        if self.is_running {
            Cow::Borrowed("[running]")
        } else {
            Cow::Owned(format!("{}:kd", self.current_core))
        }
    }

    fn render_prompt_right(&self) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_indicator(&self, _prompt_mode: reedline::PromptEditMode) -> Cow<'_, str> {
        Cow::Borrowed("> ")
    }

    fn render_prompt_multiline_indicator(&self) -> Cow<'_, str> {
        Cow::Borrowed("... ")
    }

    fn render_prompt_history_search_indicator(
        &self,
        history_search: PromptHistorySearch,
    ) -> Cow<'_, str> {
        let prefix = match history_search.status {
            PromptHistorySearchStatus::Passing => "",
            PromptHistorySearchStatus::Failing => "(failed) ",
        };
        Cow::Owned(format!("(search: {}{}) ", prefix, history_search.term))
    }
}

/// Command parsing result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedCommand {
    /// Continue: g
    Go,
    /// Break in: pause
    Pause,
    /// Step: t (in), p (over), i (instrumentation), ta (tracking)
    Step(StepType),
    /// Switch core: ~ <n>
    SwitchCore(u32),
    /// Current process details: .process
    Process,
    /// Current thread details: .thread
    Thread,
    /// Raw register file: r
    Registers,
    /// Read memory: db <addr> [len]
    DumpMemory { address: u64, length: u32 },
    /// Callstack: k [size]
    Callstack(u32),
    /// Flush event buffers: flush
    Flush,
    /// Reload symbols: .sym reload
    SymbolReload,
    /// Evaluate: .formats <expr>
    Formats(String),
    /// Paging walk: !pte <va>
    Pte(u64),
    /// Address translation: !va2pa <va> / !pa2va <pa>
    Translate { address: u64, to_physical: bool },
    /// PCI devices: !pcitree
    Pcitree,
    /// #BP / #DB interception toggles: test <bp|db> <on|off>
    TestQuery(TestQueryRequest),
    /// Local event table: events
    Events,
    /// Modify an event: events <e|d|c> <id>
    ModifyEvent { id: u64, action: ModifyEventAction },
    /// Help: ? or help
    Help,
    /// Quit: q
    Quit,
    /// Unknown command
    Unknown(String),
}

/// Numbers at the prompt are hex unless prefixed with `0n`
fn parse_hex(s: &str) -> Option<u64> {
    if let Some(decimal) = s.strip_prefix("0n") {
        return decimal.parse().ok();
    }
    if s.starts_with("0x") || s.starts_with("0X") {
        return parse_number(s).ok();
    }
    u64::from_str_radix(&s.replace('`', ""), 16).ok()
}

/// Parse a command string into a structured command
pub fn parse_command(input: &str) -> ParsedCommand {
    let input = input.trim();
    let parts: Vec<&str> = input.split_whitespace().collect();
    let cmd = parts.first().copied().unwrap_or("");
    let number = |i: usize| parts.get(i).and_then(|s| parse_hex(s));
    let unknown = || ParsedCommand::Unknown(input.to_string());

    match cmd {
        "g" | "go" => ParsedCommand::Go,
        "pause" => ParsedCommand::Pause,
        "t" => ParsedCommand::Step(StepType::StepIn),
        "p" => ParsedCommand::Step(StepType::StepOver),
        "i" => ParsedCommand::Step(StepType::InstrumentationStepIn),
        "ta" => ParsedCommand::Step(StepType::InstrumentationStepInForTracking),

        "~" => match number(1) {
            Some(core) => ParsedCommand::SwitchCore(core as u32),
            None => unknown(),
        },
        ".process" => ParsedCommand::Process,
        ".thread" => ParsedCommand::Thread,

        "r" => ParsedCommand::Registers,
        "db" => match number(1) {
            Some(address) => ParsedCommand::DumpMemory {
                address,
                length: number(2).unwrap_or(0x80) as u32,
            },
            None => unknown(),
        },
        "k" => ParsedCommand::Callstack(number(1).unwrap_or(0x100) as u32),

        "flush" => ParsedCommand::Flush,
        ".sym" if parts.get(1) == Some(&"reload") => ParsedCommand::SymbolReload,
        ".formats" if parts.len() > 1 => ParsedCommand::Formats(parts[1..].join(" ")),

        "!pte" => match number(1) {
            Some(address) => ParsedCommand::Pte(address),
            None => unknown(),
        },
        "!va2pa" | "!pa2va" => match number(1) {
            Some(address) => ParsedCommand::Translate {
                address,
                to_physical: cmd == "!va2pa",
            },
            None => unknown(),
        },
        "!pcitree" => ParsedCommand::Pcitree,

        "test" => match (parts.get(1).copied(), parts.get(2).copied()) {
            (Some("bp"), Some("on")) => ParsedCommand::TestQuery(TestQueryRequest::TurnOnBps),
            (Some("bp"), Some("off")) => ParsedCommand::TestQuery(TestQueryRequest::TurnOffBps),
            (Some("db"), Some("on")) => ParsedCommand::TestQuery(TestQueryRequest::TurnOnDbs),
            (Some("db"), Some("off")) => ParsedCommand::TestQuery(TestQueryRequest::TurnOffDbs),
            _ => unknown(),
        },

        "events" if parts.len() == 1 => ParsedCommand::Events,
        "events" => {
            let action = match parts.get(1).copied() {
                Some("e") => ModifyEventAction::Enable,
                Some("d") => ModifyEventAction::Disable,
                Some("c") => ModifyEventAction::Clear,
                _ => return unknown(),
            };
            match number(2) {
                Some(id) => ParsedCommand::ModifyEvent { id, action },
                None => unknown(),
            }
        }

        "?" | "help" => ParsedCommand::Help,
        "q" | "quit" | "exit" => ParsedCommand::Quit,

        _ => unknown(),
    }
}

/// Print the help message
fn print_help() {
    println!("{}", "kdlink Commands".bold().cyan());
    println!("{}", "═".repeat(50).cyan());

    println!("\n{}", "Execution:".bold().yellow());
    println!("  {}              Continue the debuggee", "g".green());
    println!("  {}          Break into the debuggee", "pause".green());
    println!("  {}          Step in / step over", "t / p".green());
    println!("  {}         Instrumentation step / tracking step", "i / ta".green());
    println!("  {}          Switch to core n", "~ <n>".green());

    println!("\n{}", "Inspection:".bold().yellow());
    println!("  {}              Read registers", "r".green());
    println!("  {}  Read memory", "db <addr> [len]".green());
    println!("  {}       Show the callstack", "k [size]".green());
    println!("  {}     Paging entries of an address", "!pte <va>".green());
    println!("  {}   Translate an address", "!va2pa <va>".green());
    println!("  {}       List PCI devices", "!pcitree".green());
    println!("  {} Process / thread details", ".process/.thread".green());
    println!("  {} Evaluate an expression", ".formats <expr>".green());

    println!("\n{}", "Events:".bold().yellow());
    println!("  {}         List registered events", "events".green());
    println!("  {} Enable / disable / clear", "events e|d|c <id>".green());
    println!("  {}          Flush event buffers", "flush".green());
    println!("  {}  Toggle #BP/#DB interception", "test bp|db on|off".green());

    println!("\n{}", "Other:".bold().yellow());
    println!("  {}    Reload symbols", ".sym reload".green());
    println!("  {}              Show this help", "?".green());
    println!("  {}              Quit", "q".green());
}

fn show_pause(debugger: &KernelDebugger) {
    if let Some(paused) = debugger.context().state.last_pause() {
        log::debug!("Halted at {} on core {}", format_address(paused.rip), paused.current_core);
    }
}

/// Execute a parsed command; returns `false` when the console should exit
fn execute_command(debugger: &KernelDebugger, cmd: ParsedCommand) -> Result<bool, ClientError> {
    let ctx = debugger.context();

    match cmd {
        ParsedCommand::Go => debugger.continue_debuggee()?,
        ParsedCommand::Pause => debugger.pause()?,
        ParsedCommand::Step(step_type) => {
            debugger.step(step_type)?;
            show_pause(debugger);
        }
        ParsedCommand::SwitchCore(core) => debugger.change_core(core)?,
        ParsedCommand::Process => {
            debugger.change_process(DetailsAction::GetDetails, 0, 0)?;
        }
        ParsedCommand::Thread => {
            debugger.change_thread(DetailsAction::GetDetails, 0, 0)?;
        }
        ParsedCommand::Registers => {
            let raw = debugger.read_registers()?;
            for (i, chunk) in raw.chunks(8).enumerate() {
                let mut value = [0u8; 8];
                value[..chunk.len()].copy_from_slice(chunk);
                println!("  [{:02}] {:016x}", i, u64::from_le_bytes(value));
            }
        }
        ParsedCommand::DumpMemory { address, length } => {
            let request = ReadMemoryRequest {
                address,
                size: length,
                process_id: 0,
                is_physical: false,
            };
            let data = debugger.read_memory(&request)?;
            for (i, row) in data.chunks(16).enumerate() {
                let row_address = address.wrapping_add((i * 16) as u64);
                println!("{}  {}", format_address(row_address), hex::encode(row));
            }
        }
        ParsedCommand::Callstack(size) => {
            let is_32bit = ctx.state.current_instruction().is_32bit;
            debugger.callstack(0, size, is_32bit)?;
        }
        ParsedCommand::Flush => {
            debugger.flush()?;
        }
        ParsedCommand::SymbolReload => debugger.reload_symbols(0)?,
        ParsedCommand::Formats(expression) => {
            let value = debugger.evaluate_formats(&expression)?;
            println!("evaluate expression:");
            println!("  hex     : {:x}", value);
            println!("  decimal : {}", value as i64);
            println!("  octal   : {:o}", value);
            println!("  binary  : {:b}", value);
        }
        ParsedCommand::Pte(address) => {
            debugger.pte(address)?;
        }
        ParsedCommand::Translate {
            address,
            to_physical,
        } => {
            debugger.translate(address, 0, to_physical)?;
        }
        ParsedCommand::Pcitree => {
            debugger.pcitree()?;
        }
        ParsedCommand::TestQuery(request) => {
            debugger.test_query(request)?;
        }
        ParsedCommand::Events => {
            let events = ctx.events();
            if events.is_empty() {
                println!("no events registered");
            }
            for event in events.iter() {
                println!(
                    "{:x}   ({})    {}",
                    events.display_tag(event.tag),
                    if event.enabled { "enabled" } else { "disabled" },
                    event.description
                );
            }
        }
        ParsedCommand::ModifyEvent { id, action } => {
            let tag = id.wrapping_add(ctx.events().seed());
            debugger.modify_event(tag, action)?;
        }
        ParsedCommand::Help => print_help(),
        ParsedCommand::Quit => {
            println!("[*] Shutting down...");
            return Ok(false);
        }
        ParsedCommand::Unknown(input) => {
            println!("{} Unknown command: '{}'", "[!]".red(), input);
            println!("    Type '?' for help");
        }
    }

    Ok(true)
}

/// Run the debugger console until the user quits or the debuggee goes away
pub fn run_cli(debugger: &KernelDebugger) -> Result<()> {
    let mut line_editor = Reedline::create();
    let mut prompt = KdPrompt::new();

    println!(
        "{}",
        "╔══════════════════════════════════════════════════════════════╗".cyan()
    );
    println!(
        "{}",
        "║  kdlink - Type '?' for help, 'q' to quit                     ║".cyan()
    );
    println!(
        "{}",
        "╚══════════════════════════════════════════════════════════════╝".cyan()
    );

    while debugger.is_connected() {
        let state = &debugger.context().state;
        prompt.set_core(state.current_core());
        prompt.set_running(state.is_running());

        let sig = line_editor.read_line(&prompt)?;
        match sig {
            Signal::Success(buffer) => {
                let input = buffer.trim();
                if input.is_empty() {
                    continue;
                }

                match execute_command(debugger, parse_command(input)) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(ClientError::Kernel(status)) => {
                        log::debug!("Request failed: {}", status);
                    }
                    Err(e) => println!("{} {}", "[!]".red(), e),
                }
            }
            Signal::CtrlD | Signal::CtrlC => {
                println!("\n[*] Interrupted");
                break;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_execution_commands() {
        assert_eq!(parse_command("g"), ParsedCommand::Go);
        assert_eq!(parse_command("  t "), ParsedCommand::Step(StepType::StepIn));
        assert_eq!(
            parse_command("ta"),
            ParsedCommand::Step(StepType::InstrumentationStepInForTracking)
        );
        assert_eq!(parse_command("~ 3"), ParsedCommand::SwitchCore(3));
        assert!(matches!(parse_command("~"), ParsedCommand::Unknown(_)));
    }

    #[test]
    fn test_parse_memory_commands() {
        assert_eq!(
            parse_command("db fffff800`00001000 20"),
            ParsedCommand::DumpMemory {
                address: 0xFFFF_F800_0000_1000,
                length: 0x20
            }
        );
        assert_eq!(
            parse_command("!va2pa 0x1000"),
            ParsedCommand::Translate {
                address: 0x1000,
                to_physical: true
            }
        );
        assert_eq!(
            parse_command(".formats rax + 1"),
            ParsedCommand::Formats("rax + 1".to_string())
        );
    }

    #[test]
    fn test_parse_event_commands() {
        assert_eq!(parse_command("events"), ParsedCommand::Events);
        assert_eq!(
            parse_command("events d 2"),
            ParsedCommand::ModifyEvent {
                id: 2,
                action: ModifyEventAction::Disable
            }
        );
        assert!(matches!(parse_command("events x 2"), ParsedCommand::Unknown(_)));
        assert_eq!(
            parse_command("test db off"),
            ParsedCommand::TestQuery(TestQueryRequest::TurnOffDbs)
        );
    }
}
