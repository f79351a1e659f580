//! The two one-way channels between operator, controller and observers.
//!
//! Both message types print and parse as the exact strings of the text protocol,
//! so console input and log output stay wire-compatible.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::sync::mpsc::{self, Receiver, Sender};

/// Operator -> controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Exit,
    Run,
    Step,
    Pause,
    Resume,
    Reset,
    Stop,
    Status,
    /// Anything else, forwarded verbatim to the active model.
    Model(String),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Command::Exit => "exit",
            Command::Run => "run",
            Command::Step => "step",
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::Reset => "reset",
            Command::Stop => "stop",
            Command::Status => "status",
            Command::Model(event) => event,
        };
        f.write_str(text)
    }
}

impl FromStr for Command {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "exit" => Command::Exit,
            "run" => Command::Run,
            "step" => Command::Step,
            "pause" => Command::Pause,
            "resume" => Command::Resume,
            "reset" => Command::Reset,
            "stop" => Command::Stop,
            "status" => Command::Status,
            other => Command::Model(other.to_string()),
        })
    }
}

/// Controller -> observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Started,
    Stepped,
    Paused,
    Resumed,
    Reset,
    Stopped,
    Complete,
    Terminated,
    Exited,
    // Rejections
    Running,
    NotRunning,
    AlreadyPaused,
    NotPaused,
    /// Generation counter.
    Status(u64),
    /// Reply from the model to an out-of-band event.
    Model(String),
}

impl Event {
    /// Whether the event leaves the controller unchanged.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Event::Running | Event::NotRunning | Event::AlreadyPaused | Event::NotPaused)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Started => f.write_str("Started"),
            Event::Stepped => f.write_str("Stepped"),
            Event::Paused => f.write_str("Paused"),
            Event::Resumed => f.write_str("Resumed"),
            Event::Reset => f.write_str("Reset"),
            Event::Stopped => f.write_str("Stopped"),
            Event::Complete => f.write_str("Complete"),
            Event::Terminated => f.write_str("Terminated"),
            Event::Exited => f.write_str("Exited"),
            Event::Running => f.write_str("Running"),
            Event::NotRunning => f.write_str("Not Running"),
            Event::AlreadyPaused => f.write_str("Already Paused"),
            Event::NotPaused => f.write_str("Not Paused"),
            Event::Status(generation) => write!(f, "Status: {}", generation),
            Event::Model(text) => f.write_str(text),
        }
    }
}

impl FromStr for Event {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Started" => Event::Started,
            "Stepped" => Event::Stepped,
            "Paused" => Event::Paused,
            "Resumed" => Event::Resumed,
            "Reset" => Event::Reset,
            "Stopped" => Event::Stopped,
            "Complete" => Event::Complete,
            "Terminated" => Event::Terminated,
            "Exited" => Event::Exited,
            "Running" => Event::Running,
            "Not Running" => Event::NotRunning,
            "Already Paused" => Event::AlreadyPaused,
            "Not Paused" => Event::NotPaused,
            other => match other.strip_prefix("Status: ").and_then(|n| n.parse().ok()) {
                Some(generation) => Event::Status(generation),
                None => Event::Model(other.to_string()),
            },
        })
    }
}

/// Both ends of the operator -> controller and controller -> observer channels.
pub struct Channels {
    pub command_tx: Sender<Command>,
    pub command_rx: Receiver<Command>,
    pub event_tx: Sender<Event>,
    pub event_rx: Receiver<Event>,
}

pub fn channels() -> Channels {
    let (command_tx, command_rx) = mpsc::channel();
    let (event_tx, event_rx) = mpsc::channel();
    Channels {
        command_tx,
        command_rx,
        event_tx,
        event_rx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_words_parse_to_commands() {
        let words = ["exit", "run", "step", "pause", "resume", "reset", "stop", "status"];
        for word in words {
            let command: Command = word.parse().unwrap();
            assert!(!matches!(command, Command::Model(_)), "{} parsed as a model event", word);
            assert_eq!(command.to_string(), word);
        }
        assert_eq!("census".parse::<Command>().unwrap(), Command::Model("census".into()));
        // Case matters on the wire
        assert_eq!("Run".parse::<Command>().unwrap(), Command::Model("Run".into()));
    }

    #[test]
    fn events_print_as_status_strings() {
        assert_eq!(Event::NotRunning.to_string(), "Not Running");
        assert_eq!(Event::AlreadyPaused.to_string(), "Already Paused");
        assert_eq!(Event::Status(42).to_string(), "Status: 42");

        assert_eq!("Status: 7".parse::<Event>().unwrap(), Event::Status(7));
        assert_eq!("Not Paused".parse::<Event>().unwrap(), Event::NotPaused);
        assert_eq!("Status: soon".parse::<Event>().unwrap(), Event::Model("Status: soon".into()));
    }

    #[test]
    fn rejections_are_flagged() {
        assert!(Event::Running.is_rejection());
        assert!(Event::NotPaused.is_rejection());
        assert!(!Event::Started.is_rejection());
        assert!(!Event::Status(0).is_rejection());
    }
}
