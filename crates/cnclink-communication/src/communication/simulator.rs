//! Simulated Marlin firmware
//!
//! An in-process `Transport` that answers like a Marlin board: one `ok`
//! per line, position reports for `M114`, an identification banner for
//! `M115`, and a small SD card. Acknowledgments are released in order, one
//! every `ack_delay`, which makes flow control observable in tests and lets
//! the binary run without hardware.

use crate::communication::transport::{EndpointOpener, Transport};
use cnclink_core::{Axis, ConnectionError, MachinePosition, TransportError};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default identification answer
pub const DEFAULT_IDENTITY: &str =
    "FIRMWARE_NAME:Marlin 2.1.2.1 (cnclink simulator) MACHINE_TYPE:Simulated EXTRUDER_COUNT:1";

/// Behaviour of a simulated board
#[derive(Debug, Clone)]
pub struct SimulatorOptions {
    /// Endpoint name reported by the transport
    pub name: String,
    /// Spacing between consecutive acknowledgments
    pub ack_delay: Duration,
    /// Never answer anything
    pub silent: bool,
    /// Answer to the identification command
    pub identity: String,
    /// Lines emitted right after "power on"
    pub boot_banner: Vec<String>,
}

impl Default for SimulatorOptions {
    fn default() -> Self {
        Self {
            name: "SIM0".to_string(),
            ack_delay: Duration::ZERO,
            silent: false,
            identity: DEFAULT_IDENTITY.to_string(),
            boot_banner: vec!["start".to_string(), "echo:Marlin 2.1.2.1".to_string()],
        }
    }
}

impl SimulatorOptions {
    /// Options for a board with the given endpoint name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Builder: acknowledgment spacing
    pub fn with_ack_delay(mut self, delay: Duration) -> Self {
        self.ack_delay = delay;
        self
    }

    /// Builder: never answer
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Builder: identification answer
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }
}

/// One line written to the board
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    /// The command as written
    pub line: String,
    /// Acknowledgments not yet read by the host when the line arrived
    pub unread_acks: usize,
}

#[derive(Debug)]
struct Board {
    outbox: VecDeque<(Instant, String)>,
    last_release: Instant,
    ack_delay: Duration,
    silent: bool,
    closed: bool,
    relative: bool,
    position: MachinePosition,
    written: Vec<WriteRecord>,
    drop_ack_for: Vec<String>,
    failing_reads: usize,
    failing_writes: usize,
    panic_on: Option<String>,
    identity: String,
    files: BTreeMap<String, Vec<String>>,
    capture: Option<String>,
    selected: Option<String>,
    sd_printing: bool,
}

impl Board {
    fn unread_acks(&self) -> usize {
        self.outbox.iter().filter(|(_, l)| l.starts_with("ok")).count()
    }

    fn reply(&mut self, lines: Vec<String>, ack: bool) {
        let now = Instant::now();
        let at = self.last_release.max(now) + self.ack_delay;
        self.last_release = at;
        for line in lines {
            self.outbox.push_back((at, line));
        }
        if ack {
            self.outbox.push_back((at, "ok".to_string()));
        }
    }

    fn report(&self) -> String {
        let p = self.position;
        format!(
            "X:{:.2} Y:{:.2} Z:{:.2} A:{:.2} Count X:0 Y:0 Z:0",
            p.x, p.y, p.z, p.a
        )
    }

    fn apply_words(&mut self, words: &[&str], relative: bool) {
        for word in words {
            let mut chars = word.chars();
            let axis = match chars.next().map(|c| c.to_ascii_uppercase()) {
                Some('X') => Axis::X,
                Some('Y') => Axis::Y,
                Some('Z') => Axis::Z,
                Some('A') | Some('E') => Axis::A,
                _ => continue,
            };
            let Ok(value) = chars.as_str().parse::<f64>() else {
                continue;
            };
            let current = self.position.get(axis);
            let next = if relative { current + value } else { value };
            match axis {
                Axis::X => self.position.x = next,
                Axis::Y => self.position.y = next,
                Axis::Z => self.position.z = next,
                Axis::A => self.position.a = next,
            }
        }
    }

    fn execute(&mut self, line: &str) -> Vec<String> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some(code) = words.first().map(|w| w.to_ascii_uppercase()) else {
            return Vec::new();
        };
        let args = &words[1..];

        match code.as_str() {
            "G90" => {
                self.relative = false;
                Vec::new()
            }
            "G91" => {
                self.relative = true;
                Vec::new()
            }
            "G0" | "G1" => {
                let relative = self.relative;
                self.apply_words(args, relative);
                Vec::new()
            }
            "G28" => {
                let axes: Vec<char> = args
                    .iter()
                    .filter_map(|w| w.chars().next())
                    .map(|c| c.to_ascii_uppercase())
                    .collect();
                let home_all = axes.is_empty();
                if home_all || axes.contains(&'X') {
                    self.position.x = 0.0;
                }
                if home_all || axes.contains(&'Y') {
                    self.position.y = 0.0;
                }
                if home_all || axes.contains(&'Z') {
                    self.position.z = 0.0;
                }
                if axes.contains(&'A') {
                    self.position.a = 0.0;
                }
                Vec::new()
            }
            "G92" => {
                self.apply_words(args, false);
                Vec::new()
            }
            "M114" => vec![self.report()],
            "M115" => vec![self.identity.clone(), "Cap:SDCARD:1".to_string()],
            "M21" => vec!["echo:SD card ok".to_string()],
            "M20" => {
                let mut lines = vec!["Begin file list".to_string()];
                for (name, body) in &self.files {
                    let size: usize = body.iter().map(|l| l.len() + 1).sum();
                    lines.push(format!("{} {}", name, size));
                }
                lines.push("End file list".to_string());
                lines
            }
            "M28" => {
                let name = args.join(" ").to_ascii_uppercase();
                self.files.insert(name.clone(), Vec::new());
                self.capture = Some(name.clone());
                vec![format!("Writing to file: {}", name)]
            }
            "M23" => {
                let name = args.join(" ").to_ascii_uppercase();
                match self.files.get(&name) {
                    Some(body) => {
                        let size: usize = body.iter().map(|l| l.len() + 1).sum();
                        self.selected = Some(name.clone());
                        vec![
                            format!("File opened: {} Size: {}", name, size),
                            "File selected".to_string(),
                        ]
                    }
                    None => vec![format!("open failed, File: {}.", name)],
                }
            }
            "M24" => {
                if self.selected.is_some() {
                    self.sd_printing = true;
                }
                Vec::new()
            }
            "M25" | "M524" => {
                self.sd_printing = false;
                Vec::new()
            }
            "M27" => {
                if self.sd_printing {
                    vec!["SD printing byte 50/200".to_string()]
                } else {
                    vec!["Not SD printing".to_string()]
                }
            }
            _ => Vec::new(),
        }
    }
}

/// Simulated board implementing `Transport`
#[derive(Debug)]
pub struct SimulatedFirmware {
    name: String,
    board: Mutex<Board>,
    ready: Condvar,
}

impl SimulatedFirmware {
    /// Power on a board; its boot banner is immediately readable
    pub fn new(options: SimulatorOptions) -> Self {
        let now = Instant::now();
        let outbox = if options.silent {
            VecDeque::new()
        } else {
            options
                .boot_banner
                .iter()
                .map(|l| (now, l.clone()))
                .collect()
        };
        Self {
            name: options.name,
            board: Mutex::new(Board {
                outbox,
                last_release: now,
                ack_delay: options.ack_delay,
                silent: options.silent,
                closed: false,
                relative: false,
                position: MachinePosition::default(),
                written: Vec::new(),
                drop_ack_for: Vec::new(),
                failing_reads: 0,
                failing_writes: 0,
                panic_on: None,
                identity: options.identity,
                files: BTreeMap::new(),
                capture: None,
                selected: None,
                sd_printing: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Stop or start answering
    pub fn set_silent(&self, silent: bool) {
        self.board.lock().silent = silent;
    }

    /// Change acknowledgment spacing for lines written from now on
    pub fn set_ack_delay(&self, delay: Duration) {
        self.board.lock().ack_delay = delay;
    }

    /// Swallow the acknowledgment of the next line equal to `command`
    pub fn drop_ack_for(&self, command: impl Into<String>) {
        self.board.lock().drop_ack_for.push(command.into());
    }

    /// Make the next `count` reads fail with an I/O error
    pub fn fail_reads(&self, count: usize) {
        self.board.lock().failing_reads = count;
    }

    /// Make the next `count` writes fail
    pub fn fail_writes(&self, count: usize) {
        self.board.lock().failing_writes = count;
    }

    /// Make the writer panic when `command` is written
    pub fn panic_on_write(&self, command: impl Into<String>) {
        self.board.lock().panic_on = Some(command.into());
    }

    /// Acknowledgments queued but not yet read
    pub fn pending_acks(&self) -> usize {
        self.board.lock().unread_acks()
    }

    /// Every line written so far
    pub fn written(&self) -> Vec<WriteRecord> {
        self.board.lock().written.clone()
    }

    /// Commands written so far
    pub fn written_lines(&self) -> Vec<String> {
        self.board.lock().written.iter().map(|r| r.line.clone()).collect()
    }

    /// Simulated machine position
    pub fn position(&self) -> MachinePosition {
        self.board.lock().position
    }

    /// Contents of a file on the simulated SD card
    pub fn sd_file(&self, name: &str) -> Option<Vec<String>> {
        self.board.lock().files.get(&name.to_ascii_uppercase()).cloned()
    }

    /// Whether an SD print is running
    pub fn is_sd_printing(&self) -> bool {
        self.board.lock().sd_printing
    }
}

impl Transport for SimulatedFirmware {
    fn write_line(&self, line: &str) -> Result<(), TransportError> {
        let line = line.trim();
        let mut board = self.board.lock();
        if board.closed {
            return Err(TransportError::Disconnected);
        }
        if board.panic_on.as_deref() == Some(line) {
            board.panic_on = None;
            drop(board);
            panic!("simulated writer fault on '{}'", line);
        }
        if board.failing_writes > 0 {
            board.failing_writes -= 1;
            return Err(TransportError::WriteFailed {
                command: line.to_string(),
                reason: "simulated write failure".to_string(),
            });
        }

        let unread_acks = board.unread_acks();
        board.written.push(WriteRecord {
            line: line.to_string(),
            unread_acks,
        });
        if board.silent {
            return Ok(());
        }

        let lines = match board.capture.clone() {
            Some(name) if !line.eq_ignore_ascii_case("M29") => {
                if let Some(body) = board.files.get_mut(&name) {
                    body.push(line.to_string());
                }
                Vec::new()
            }
            Some(_) => {
                board.capture = None;
                vec!["Done saving file.".to_string()]
            }
            None => board.execute(line),
        };

        let ack = match board.drop_ack_for.iter().position(|c| c == line) {
            Some(idx) => {
                board.drop_ack_for.remove(idx);
                false
            }
            None => true,
        };
        board.reply(lines, ack);
        drop(board);
        self.ready.notify_all();
        Ok(())
    }

    fn read_line(&self, timeout: Duration) -> Result<Option<String>, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut board = self.board.lock();
        loop {
            if board.closed {
                return Err(TransportError::Disconnected);
            }
            if board.failing_reads > 0 {
                board.failing_reads -= 1;
                return Err(TransportError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    "simulated read failure",
                )));
            }

            let now = Instant::now();
            let wake = match board.outbox.front() {
                Some((at, _)) if *at <= now => {
                    return Ok(board.outbox.pop_front().map(|(_, line)| line));
                }
                Some((at, _)) => (*at).min(deadline),
                None => deadline,
            };
            if now >= deadline {
                return Ok(None);
            }
            self.ready.wait_until(&mut board, wake);
        }
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn close(&self) {
        self.board.lock().closed = true;
        self.ready.notify_all();
    }
}

/// Opens simulated boards by endpoint name
#[derive(Debug, Default)]
pub struct SimulatedOpener {
    boards: Vec<Arc<SimulatedFirmware>>,
    unopenable: Vec<String>,
}

impl SimulatedOpener {
    /// Create an opener with no endpoints
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: add a board; candidates are listed in insertion order
    pub fn with_board(mut self, board: Arc<SimulatedFirmware>) -> Self {
        self.boards.push(board);
        self
    }

    /// Builder: add an endpoint that fails to open
    pub fn with_unopenable(mut self, name: impl Into<String>) -> Self {
        self.unopenable.push(name.into());
        self
    }

    /// The board behind an endpoint
    pub fn board(&self, name: &str) -> Option<Arc<SimulatedFirmware>> {
        self.boards.iter().find(|b| b.name() == name).cloned()
    }
}

impl EndpointOpener for SimulatedOpener {
    fn candidates(&self) -> Result<Vec<String>, ConnectionError> {
        Ok(self
            .unopenable
            .iter()
            .cloned()
            .chain(self.boards.iter().map(|b| b.name()))
            .collect())
    }

    fn open(&self, endpoint: &str, _baud_rate: u32) -> Result<Arc<dyn Transport>, ConnectionError> {
        match self.board(endpoint) {
            Some(board) => Ok(board),
            None => Err(ConnectionError::FailedToOpen {
                port: endpoint.to_string(),
                reason: "no such simulated endpoint".to_string(),
            }),
        }
    }
}
