//! Operator console: single-letter keys in, operator sentences out.

use crate::transport::{Command, Event};
use diffusion_common::{ExitState, RunStateStore};
use log::{debug, info, warn};
use std::io::{BufRead, Write};
use std::sync::mpsc::{Receiver, Sender};

pub const HELP: &str = "\
Keys:
  r  run       p  pause     u  resume
  e  step      s  reset     t  stop
  a  status    c  census    h  help
  q  quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAction {
    Send(Command),
    Help,
    Unknown(String),
}

pub fn action_for_key(input: &str) -> KeyAction {
    let command = match input.trim() {
        "q" => Command::Exit,
        "r" => Command::Run,
        "p" => Command::Pause,
        "e" => Command::Step,
        "u" => Command::Resume,
        "s" => Command::Reset,
        "t" => Command::Stop,
        "a" => Command::Status,
        "c" => Command::Model("census".to_string()),
        "h" => return KeyAction::Help,
        other => return KeyAction::Unknown(other.to_string()),
    };
    KeyAction::Send(command)
}

/// The sentence shown to the operator for a status event.
pub fn operator_message(event: &Event) -> String {
    match event {
        Event::Started => "Simulation started.".to_string(),
        Event::Stepped => "Simulation stepped one generation.".to_string(),
        Event::Paused => "Simulation paused.".to_string(),
        Event::Resumed => "Simulation resumed.".to_string(),
        Event::Reset => "Simulation reset.".to_string(),
        Event::Stopped => "Simulation stopped.".to_string(),
        Event::Complete => "Simulation complete.".to_string(),
        Event::Terminated => "Simulation terminated while running.".to_string(),
        Event::Exited => "Simulation exited.".to_string(),
        Event::Running => "Simulation is already running.".to_string(),
        Event::NotRunning => "Simulation is not running.".to_string(),
        Event::AlreadyPaused => "Simulation is already paused.".to_string(),
        Event::NotPaused => "Simulation is not paused.".to_string(),
        Event::Status(generation) => format!("Generation {}.", generation),
        Event::Model(text) => text.clone(),
    }
}

/// The exit state an event implies, if it implies one.
pub fn exit_state_for(event: &Event) -> Option<ExitState> {
    match event {
        Event::Terminated => Some(ExitState::Terminated),
        Event::Complete => Some(ExitState::Completed),
        Event::Paused => Some(ExitState::Paused),
        Event::Stopped => Some(ExitState::Stopped),
        Event::Exited => Some(ExitState::Exited),
        _ => None,
    }
}

/// Reads keys from `input` until `q` or end of input, forwarding commands.
/// Dropping the sender on return tells the controller nobody is left to command it.
pub fn run_console(input: impl BufRead, mut output: impl Write, commands: Sender<Command>) {
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Console input failed: {}", e);
                break;
            }
        };
        match action_for_key(&line) {
            KeyAction::Send(command) => {
                let quit = command == Command::Exit;
                debug!("Console sends '{}'", command);
                if commands.send(command).is_err() {
                    debug!("Controller is gone; console stops");
                    break;
                }
                if quit {
                    break;
                }
            }
            KeyAction::Help => {
                let _ = writeln!(output, "{}", HELP);
            }
            KeyAction::Unknown(key) if key.is_empty() => {}
            KeyAction::Unknown(key) => {
                let _ = writeln!(output, "Unknown key '{}'. Press h for help.", key);
            }
        }
    }
}

/// Drains the status channel until the controller hangs up, echoing each event and
/// remembering the last exit state.
pub fn run_observer(events: Receiver<Event>, mut output: impl Write, store: &mut RunStateStore) {
    for event in events {
        info!("Status: {}", event);
        let _ = writeln!(output, "{}", operator_message(&event));
        if let Some(state) = exit_state_for(&event) {
            store.set_exit_state(state);
        }
    }
    debug!("Status channel closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::mpsc;

    #[test]
    fn keys_map_to_commands() {
        assert_eq!(action_for_key("r"), KeyAction::Send(Command::Run));
        assert_eq!(action_for_key(" e \n"), KeyAction::Send(Command::Step));
        assert_eq!(action_for_key("c"), KeyAction::Send(Command::Model("census".into())));
        assert_eq!(action_for_key("h"), KeyAction::Help);
        assert_eq!(action_for_key("x"), KeyAction::Unknown("x".into()));
    }

    #[test]
    fn console_stops_at_quit() {
        let (tx, rx) = mpsc::channel();
        let mut out = Vec::new();
        run_console(Cursor::new("r\nzz\np\nq\nr\n"), &mut out, tx);

        let sent: Vec<Command> = rx.iter().collect();
        assert_eq!(sent, vec![Command::Run, Command::Pause, Command::Exit]);
        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("Unknown key 'zz'"));
    }

    #[test]
    fn observer_remembers_the_last_exit_state() {
        let path = std::env::temp_dir().join(format!("diffusion-console-{}.json", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let mut store = RunStateStore::open(&path).unwrap();

        let (tx, rx) = mpsc::channel();
        for event in [Event::Started, Event::Paused, Event::Status(4), Event::Terminated] {
            tx.send(event).unwrap();
        }
        drop(tx);

        let mut out = Vec::new();
        run_observer(rx, &mut out, &mut store);

        assert_eq!(store.exit_state(), Some(ExitState::Terminated));
        let printed = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = printed.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Simulation started.",
                "Simulation paused.",
                "Generation 4.",
                "Simulation terminated while running."
            ]
        );
    }
}
