//! Console shell over the coordinator: reads commands from stdin, prints
//! notifications and state changes.

use crate::domain::models::{
    AppEvent, CoordinatorSnapshot, MessageSeverity, PeripheralDescriptor, StatusMessage,
};
use crate::infrastructure::bluetooth::Coordinator;
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    StartScan,
    StopScan,
    Connect(String),
    Disconnect(String),
    State,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Empty,
    MissingId(&'static str),
    Unknown(String),
}

pub const HELP: &str = "commands: scan | stop | connect <id> | disconnect <id> | state | help | quit";

pub fn parse_command(line: &str) -> Result<ShellCommand, ParseError> {
    let mut parts = line.split_whitespace();
    let Some(verb) = parts.next() else {
        return Err(ParseError::Empty);
    };
    let arg = parts.next().map(str::to_string);

    match verb.to_lowercase().as_str() {
        "scan" => Ok(ShellCommand::StartScan),
        "stop" => Ok(ShellCommand::StopScan),
        "connect" => arg
            .map(ShellCommand::Connect)
            .ok_or(ParseError::MissingId("connect")),
        "disconnect" => arg
            .map(ShellCommand::Disconnect)
            .ok_or(ParseError::MissingId("disconnect")),
        "state" | "ls" => Ok(ShellCommand::State),
        "help" | "?" => Ok(ShellCommand::Help),
        "quit" | "exit" | "q" => Ok(ShellCommand::Quit),
        other => Err(ParseError::Unknown(other.to_string())),
    }
}

fn device_line(out: &mut String, d: &PeripheralDescriptor) {
    let _ = write!(out, "    {}", d.id);
    if let Some(name) = d.display_name() {
        let _ = write!(out, "  {}", name);
    }
    if let Some(rssi) = d.rssi {
        let _ = write!(out, "  ({} dBm)", rssi);
    }
    out.push('\n');
}

pub fn render_snapshot(snapshot: &CoordinatorSnapshot) -> String {
    let mut out = String::new();
    if snapshot.initializing {
        out.push_str("Initializing, please wait...\n");
    } else if snapshot.initialized {
        let _ = writeln!(out, "Module initialized with state {}", snapshot.adapter_state);
    } else {
        let _ = writeln!(out, "Module not initialized (state {})", snapshot.adapter_state);
    }
    if snapshot.scanning {
        out.push_str("Scanning...\n");
    }

    for (title, list) in [
        ("Available devices", &snapshot.discovered),
        ("Bonded devices", &snapshot.bonded),
        ("Connected devices", &snapshot.connected),
    ] {
        if list.is_empty() {
            continue;
        }
        let _ = writeln!(out, "  {}:", title);
        for d in list {
            device_line(&mut out, d);
        }
    }
    out
}

pub fn render_message(message: &StatusMessage) -> String {
    let tag = match message.severity {
        MessageSeverity::Info => "info",
        MessageSeverity::Success => "ok",
        MessageSeverity::Warning => "warn",
        MessageSeverity::Error => "error",
    };
    format!("[{}] {}", tag, message.message)
}

/// Print notifications until the sender side closes.
pub async fn print_events(mut events: mpsc::UnboundedReceiver<AppEvent>) {
    while let Some(event) = events.recv().await {
        if let AppEvent::LogMessage(message) = event {
            println!("{}", render_message(&message));
        }
    }
}

/// Print the device lists whenever the scan flag flips.
pub async fn print_scan_results(mut updates: watch::Receiver<CoordinatorSnapshot>) {
    let mut was_scanning = updates.borrow().scanning;
    while updates.changed().await.is_ok() {
        let snapshot = updates.borrow_and_update().clone();
        if was_scanning && !snapshot.scanning {
            print!("{}", render_snapshot(&snapshot));
        }
        was_scanning = snapshot.scanning;
    }
}

/// Read and execute commands until `quit` or end of input.
pub async fn run(coordinator: Arc<Coordinator>) -> anyhow::Result<()> {
    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(ParseError::Empty) => continue,
            Err(ParseError::MissingId(verb)) => {
                println!("usage: {} <id>", verb);
                continue;
            }
            Err(ParseError::Unknown(verb)) => {
                println!("unknown command '{}'. {}", verb, HELP);
                continue;
            }
        };

        match command {
            ShellCommand::StartScan => {
                if let Err(e) = coordinator.start_scan().await {
                    error!("Failed to start scan: {}", e);
                }
            }
            ShellCommand::StopScan => {
                if !coordinator.stop_scan().await {
                    println!("no scan in progress");
                }
            }
            // Failures are already reported as notifications.
            ShellCommand::Connect(id) => {
                let _ = coordinator.connect(&id).await;
            }
            ShellCommand::Disconnect(id) => {
                let _ = coordinator.disconnect(&id).await;
            }
            ShellCommand::State => print!("{}", render_snapshot(&coordinator.snapshot())),
            ShellCommand::Help => println!("{}", HELP),
            ShellCommand::Quit => break,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::AdapterState;

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("scan"), Ok(ShellCommand::StartScan));
        assert_eq!(parse_command("  STOP "), Ok(ShellCommand::StopScan));
        assert_eq!(
            parse_command("connect AA:BB"),
            Ok(ShellCommand::Connect("AA:BB".into()))
        );
        assert_eq!(
            parse_command("disconnect"),
            Err(ParseError::MissingId("disconnect"))
        );
        assert_eq!(parse_command(""), Err(ParseError::Empty));
        assert_eq!(parse_command("pair x"), Err(ParseError::Unknown("pair".into())));
        assert_eq!(parse_command("q"), Ok(ShellCommand::Quit));
    }

    #[test]
    fn test_render_snapshot_sections() {
        let snapshot = CoordinatorSnapshot {
            adapter_state: AdapterState::PoweredOn,
            initialized: true,
            discovered: vec![PeripheralDescriptor::connectable("D1")
                .with_local_name("Sensor")
                .with_rssi(-60)],
            connected: vec![PeripheralDescriptor::new("D2")],
            ..CoordinatorSnapshot::default()
        };

        let text = render_snapshot(&snapshot);

        assert!(text.starts_with("Module initialized with state on"));
        assert!(text.contains("Available devices:\n    D1  Sensor  (-60 dBm)\n"));
        assert!(!text.contains("Bonded devices"));
        assert!(text.contains("Connected devices:\n    D2\n"));
    }

    #[test]
    fn test_render_message() {
        let message = StatusMessage {
            message: "Connected to D1".into(),
            severity: MessageSeverity::Success,
        };
        assert_eq!(render_message(&message), "[ok] Connected to D1");
    }
}
