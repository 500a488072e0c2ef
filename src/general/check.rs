use std::io::Write;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use crate::relay::RelayStats;

fn print_colored(color: Color, line: &str) {
    let mut stdout = StandardStream::stdout(ColorChoice::Always);
    let _ = stdout.set_color(ColorSpec::new().set_fg(Some(color)).set_intense(true));
    let _ = writeln!(&mut stdout, "{}", line);
    let _ = stdout.reset();
}

// Print the quick help line in blue (works on Windows CMD via termcolor)
pub fn print_quick_help() {
    print_colored(Color::Blue, "Type 'help' for commands, 'exit' or Ctrl-C to quit");
}

/// Banner shown once the session is up.
pub fn print_session_active(route: &str) {
    print_colored(Color::Green, &format!("Relay active | {}", route));
    print_quick_help();
}

pub fn print_degraded_output() {
    print_colored(
        Color::Yellow,
        "No MIDI output available | events from the peer will be skipped",
    );
}

pub fn print_session_closed(stats: &RelayStats) {
    print_colored(
        Color::Green,
        &format!(
            "Relay closed | sent {} received {} emitted {} dropped {}",
            stats.sent, stats.received, stats.emitted, stats.dropped
        ),
    );
}

pub fn print_session_failed(reason: &str) {
    print_colored(Color::Red, &format!("Relay failed | {}", reason));
}
