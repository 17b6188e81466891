//! UI module - Debugger console and output sinks
//!
//! The console is a reedline REPL; sinks decide where dispatcher messages go.

pub mod cli;
pub mod console;

pub use console::{BufferSink, ConsoleSink, DisplaySink};
