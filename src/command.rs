//! Remote-control commands carried in a flow file's `command` attribute.
//!
//! A command string is parsed once into [`Command`] and then routed to a
//! [`CommandSink`] by [`dispatch`]. The sink decides what a command does;
//! nothing here touches hardware.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::flowfile::FlowFileRecord;

pub const COMMAND_ATTRIBUTE: &str = "command";

/// Speeds below this are raised to it.
pub const MIN_SPEED: u16 = 24;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandError {
    #[error("flow file has no `command` attribute")]
    Missing,
    #[error("cannot recognize command: {0}")]
    Unknown(String),
    #[error("bad argument in command: {0}")]
    BadArgument(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
    ReadCpuTemp,
    Home,
    Distance,
    CameraXUp,
    CameraXDown,
    CameraYUp,
    CameraYDown,
    CameraHome,
    Speed(u16),
    Turn(i32),
    ForwardAt(i32),
    BackwardAt(i32),
}

const PLAIN: &[(&str, Command)] = &[
    ("forward", Command::Forward),
    ("backward", Command::Backward),
    ("left", Command::Left),
    ("right", Command::Right),
    ("stop", Command::Stop),
    ("read cpu_temp", Command::ReadCpuTemp),
    ("home", Command::Home),
    ("distance", Command::Distance),
    ("x+", Command::CameraXUp),
    ("x-", Command::CameraXDown),
    ("y+", Command::CameraYUp),
    ("y-", Command::CameraYDown),
    ("xy_home", Command::CameraHome),
];

impl Command {
    /// Reads and parses the `command` attribute of `record`.
    pub fn from_record(
        record: &FlowFileRecord,
    ) -> std::result::Result<Self, CommandError> {
        record
            .attribute(COMMAND_ATTRIBUTE)
            .ok_or(CommandError::Missing)?
            .parse()
    }
}

fn argument<T: FromStr>(
    s: &str,
    raw: &str,
) -> std::result::Result<T, CommandError> {
    s.trim()
        .parse()
        .map_err(|_| CommandError::BadArgument(raw.to_owned()))
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if let Some((_, command)) = PLAIN.iter().find(|(name, _)| *name == s) {
            return Ok(*command);
        }
        if let Some(arg) = s.strip_prefix("speed") {
            if arg.is_empty() || arg.len() > 3 {
                return Err(CommandError::BadArgument(s.to_owned()));
            }
            let speed: u16 = argument(arg, s)?;
            return Ok(Command::Speed(speed.max(MIN_SPEED)));
        }
        if let Some(arg) = s.strip_prefix("turn=") {
            return Ok(Command::Turn(argument(arg, s)?));
        }
        if let Some(arg) = s.strip_prefix("forward=") {
            return Ok(Command::ForwardAt(argument(arg, s)?));
        }
        if let Some(arg) = s.strip_prefix("backward=") {
            return Ok(Command::BackwardAt(argument(arg, s)?));
        }
        Err(CommandError::Unknown(s.to_owned()))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Speed(speed) => write!(f, "speed{}", speed),
            Command::Turn(angle) => write!(f, "turn={}", angle),
            Command::ForwardAt(speed) => write!(f, "forward={}", speed),
            Command::BackwardAt(speed) => write!(f, "backward={}", speed),
            plain => {
                let name = PLAIN
                    .iter()
                    .find(|(_, command)| command == plain)
                    .map(|(name, _)| *name)
                    .unwrap_or("?");
                f.write_str(name)
            }
        }
    }
}

/// Whatever carries commands out.
pub trait CommandSink {
    /// Drive forward or backward; `None` keeps the current speed.
    fn drive(&mut self, forward: bool, speed: Option<i32>);
    fn stop(&mut self);
    /// Steer by `angle`; `None` recenters.
    fn steer(&mut self, angle: Option<i32>);
    fn set_speed(&mut self, speed: u16);
    /// Move the camera by one step on each axis; `(0, 0)` recenters.
    fn pan_camera(&mut self, dx: i8, dy: i8);
    fn report_cpu_temp(&mut self);
    fn report_distance(&mut self);
}

const STEER_LEFT: i32 = -1;
const STEER_RIGHT: i32 = 1;

pub fn dispatch<S: CommandSink + ?Sized>(command: Command, sink: &mut S) {
    log::debug!("dispatching {}", command);
    match command {
        Command::Forward => sink.drive(true, None),
        Command::Backward => sink.drive(false, None),
        Command::ForwardAt(speed) => sink.drive(true, Some(speed)),
        Command::BackwardAt(speed) => sink.drive(false, Some(speed)),
        Command::Stop => sink.stop(),
        Command::Left => sink.steer(Some(STEER_LEFT)),
        Command::Right => sink.steer(Some(STEER_RIGHT)),
        Command::Turn(angle) => sink.steer(Some(angle)),
        Command::Home => sink.steer(None),
        Command::Speed(speed) => sink.set_speed(speed),
        Command::CameraXUp => sink.pan_camera(1, 0),
        Command::CameraXDown => sink.pan_camera(-1, 0),
        Command::CameraYUp => sink.pan_camera(0, 1),
        Command::CameraYDown => sink.pan_camera(0, -1),
        Command::CameraHome => sink.pan_camera(0, 0),
        Command::ReadCpuTemp => sink.report_cpu_temp(),
        Command::Distance => sink.report_distance(),
    }
}
