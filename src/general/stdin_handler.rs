use std::io::{stdin, BufRead};
use std::thread;

use crate::general::cancel::CancelToken;
use crate::general::transpose::ShiftControl;

/// What a console line asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetShift(i32),
    ShiftUp,
    ShiftDown,
    Debug(bool),
    Help,
    Exit,
    Ignore,
    Unknown(String),
}

pub fn parse_command(line: &str) -> Command {
    let cmd = line.trim();
    if cmd.is_empty() {
        return Command::Ignore;
    }
    if cmd.eq_ignore_ascii_case("exit") || cmd.eq_ignore_ascii_case("quit") || cmd.eq_ignore_ascii_case("q") {
        return Command::Exit;
    }
    if cmd.eq_ignore_ascii_case("help") || cmd.eq_ignore_ascii_case("h") {
        return Command::Help;
    }
    if cmd.eq_ignore_ascii_case("up") || cmd == "+" {
        return Command::ShiftUp;
    }
    if cmd.eq_ignore_ascii_case("down") || cmd == "-" {
        return Command::ShiftDown;
    }
    if cmd.eq_ignore_ascii_case("debug on") || cmd.eq_ignore_ascii_case("debug enable") {
        return Command::Debug(true);
    }
    if cmd.eq_ignore_ascii_case("debug off") || cmd.eq_ignore_ascii_case("debug disable") {
        return Command::Debug(false);
    }
    match cmd.parse::<i32>() {
        Ok(v) => Command::SetShift(v),
        Err(_) => Command::Unknown(cmd.to_string()),
    }
}

fn print_help() {
    println!("Commands:");
    println!("  <number>         - Set pitch shift in semitones");
    println!("  up/+  down/-     - Shift one semitone up or down");
    println!("  debug on/off     - Enable/Disable per-event debug logging");
    println!("  help/h           - Show this help");
    println!("  exit/quit/q      - Stop the relay");
}

/// Apply a command. Returns false once the console loop should stop.
pub fn execute(command: Command, shift: &ShiftControl, cancel: &CancelToken) -> bool {
    match command {
        Command::SetShift(v) => {
            let clamped = shift.set(v);
            if clamped != v {
                let (min, max) = shift.range();
                println!("Shift limited to {}..={}", min, max);
            }
            println!("Shift set to {}", clamped);
        }
        Command::ShiftUp => {
            let (old, new) = shift.nudge(1);
            println!("Shift {} -> {}", old, new);
        }
        Command::ShiftDown => {
            let (old, new) = shift.nudge(-1);
            println!("Shift {} -> {}", old, new);
        }
        Command::Debug(on) => {
            log::set_max_level(if on {
                log::LevelFilter::Debug
            } else {
                log::LevelFilter::Info
            });
            println!("Debug {}", if on { "enabled" } else { "disabled" });
        }
        Command::Help => print_help(),
        Command::Exit => {
            cancel.cancel();
            return false;
        }
        Command::Ignore => {}
        Command::Unknown(cmd) => {
            println!("Unrecognized command: '{}'. Type 'help' for available commands.", cmd);
        }
    }
    true
}

/// Spawn a thread that reads console commands until `exit`, end of input or
/// cancellation. The thread is never joined: it may sit in a blocking read.
pub fn spawn_stdin_handler(shift: ShiftControl, cancel: CancelToken) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let stdin = stdin();
        let mut line = String::new();
        loop {
            line.clear();
            match stdin.lock().read_line(&mut line) {
                Ok(0) => {
                    log::debug!("Console input closed");
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    log::warn!("Console read failed: {}", err);
                    break;
                }
            }
            if cancel.is_cancelled() || !execute(parse_command(&line), &shift, &cancel) {
                break;
            }
        }
    })
}
