//! Typed packet model for the binary wire protocol.
//!
//! Five packet kinds exist: [`LogEntry`] carries the bulk of diagnostic
//! traffic, [`Watch`] a named variable value, [`ControlCommand`] an
//! administrative instruction for the console, [`ProcessFlow`] thread and
//! process lifecycle markers, and [`LogHeader`] stream metadata written once
//! per connection. Packets are immutable once constructed; encoding never
//! mutates them. The binary layout lives in [`wire`].

mod wire;

pub use wire::{decode, encode, FRAME_HEADER_SIZE, MAX_PAYLOAD_SIZE};

use std::sync::atomic::{AtomicU32, Ordering};

use chrono::Utc;

use crate::level::Level;

/// Wire tag identifying each packet kind.
///
/// The values are fixed by the protocol and must never be renumbered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    ControlCommand = 1,
    LogEntry = 4,
    Watch = 5,
    ProcessFlow = 6,
    LogHeader = 7,
}

impl PacketKind {
    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::ControlCommand),
            4 => Some(Self::LogEntry),
            5 => Some(Self::Watch),
            6 => Some(Self::ProcessFlow),
            7 => Some(Self::LogHeader),
            _ => None,
        }
    }
}

/// How the console should interpret a [`LogEntry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogEntryKind {
    Separator = 1,
    EnterMethod = 2,
    LeaveMethod = 3,
    Message = 100,
    Warning = 101,
    Error = 102,
    InternalError = 103,
    Comment = 105,
    VariableValue = 106,
}

/// Which console viewer should render a [`LogEntry`]'s data blob.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewerId {
    NoViewer = -1,
    Title = 0,
    Data = 1,
    List = 2,
    ValueList = 3,
    Inspector = 4,
    Table = 5,
    Web = 100,
    Binary = 200,
}

/// Variable type of a [`Watch`] value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchKind {
    Str = 1,
    Int = 2,
    Float = 3,
    Bool = 4,
    Address = 5,
    Timestamp = 6,
    Object = 7,
}

/// Administrative action carried by a [`ControlCommand`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlCommandKind {
    ClearLog = 0,
    ClearWatches = 1,
    ClearAutoViews = 2,
    ClearAll = 3,
    ClearProcessFlow = 4,
}

/// Lifecycle event recorded by a [`ProcessFlow`] packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessFlowKind {
    EnterMethod = 0,
    LeaveMethod = 1,
    EnterThread = 2,
    LeaveThread = 3,
    EnterProcess = 4,
    LeaveProcess = 5,
}

/// One discrete binary-encodable event or command.
#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    LogEntry(LogEntry),
    Watch(Watch),
    ControlCommand(ControlCommand),
    ProcessFlow(ProcessFlow),
    LogHeader(LogHeader),
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::LogEntry(_) => PacketKind::LogEntry,
            Packet::Watch(_) => PacketKind::Watch,
            Packet::ControlCommand(_) => PacketKind::ControlCommand,
            Packet::ProcessFlow(_) => PacketKind::ProcessFlow,
            Packet::LogHeader(_) => PacketKind::LogHeader,
        }
    }

    pub fn level(&self) -> Level {
        match self {
            Packet::LogEntry(p) => p.level,
            Packet::Watch(p) => p.level,
            Packet::ControlCommand(p) => p.level,
            Packet::ProcessFlow(p) => p.level,
            Packet::LogHeader(p) => p.level,
        }
    }
}

/// The main diagnostic event: a titled message with an optional data blob
/// and its creation context.
#[derive(Clone, Debug, PartialEq)]
pub struct LogEntry {
    pub level: Level,
    pub entry_kind: LogEntryKind,
    pub viewer_id: ViewerId,
    pub app_name: String,
    pub session_name: String,
    pub title: String,
    pub host_name: String,
    pub data: Vec<u8>,
    pub process_id: u32,
    pub thread_id: u32,
    /// Microseconds since the Unix epoch.
    pub timestamp: i64,
}

impl LogEntry {
    /// Create a log entry stamped with the current time, thread and process.
    pub fn new(entry_kind: LogEntryKind, viewer_id: ViewerId, title: impl Into<String>) -> Self {
        Self {
            level: Level::default(),
            entry_kind,
            viewer_id,
            app_name: String::new(),
            session_name: String::new(),
            title: title.into(),
            host_name: String::new(),
            data: Vec::new(),
            process_id: std::process::id(),
            thread_id: current_thread_id(),
            timestamp: now_micros(),
        }
    }
}

/// A named variable value destined for the console's watch view.
#[derive(Clone, Debug, PartialEq)]
pub struct Watch {
    pub level: Level,
    pub name: String,
    pub value: String,
    pub watch_kind: WatchKind,
    pub timestamp: i64,
}

impl Watch {
    pub fn new(name: impl Into<String>, value: impl Into<String>, watch_kind: WatchKind) -> Self {
        Self {
            level: Level::default(),
            name: name.into(),
            value: value.into(),
            watch_kind,
            timestamp: now_micros(),
        }
    }
}

/// Administrative instruction such as clearing the console.
#[derive(Clone, Debug, PartialEq)]
pub struct ControlCommand {
    pub level: Level,
    pub command_kind: ControlCommandKind,
    pub data: Vec<u8>,
}

impl ControlCommand {
    pub fn new(command_kind: ControlCommandKind) -> Self {
        Self {
            level: Level::Control,
            command_kind,
            data: Vec::new(),
        }
    }
}

/// Thread or process lifecycle marker.
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessFlow {
    pub level: Level,
    pub flow_kind: ProcessFlowKind,
    pub title: String,
    pub host_name: String,
    pub process_id: u32,
    pub thread_id: u32,
    pub timestamp: i64,
}

impl ProcessFlow {
    pub fn new(flow_kind: ProcessFlowKind, title: impl Into<String>) -> Self {
        Self {
            level: Level::default(),
            flow_kind,
            title: title.into(),
            host_name: String::new(),
            process_id: std::process::id(),
            thread_id: current_thread_id(),
            timestamp: now_micros(),
        }
    }
}

/// Stream metadata written after a successful stream connect so routing
/// services can identify the sender.
#[derive(Clone, Debug, PartialEq)]
pub struct LogHeader {
    pub level: Level,
    pub content: String,
}

impl LogHeader {
    /// Compose the standard `key=value` header content.
    pub fn for_client(host_name: &str, app_name: &str) -> Self {
        Self {
            level: Level::Message,
            content: format!("hostname={host_name}\r\nappname={app_name}\r\n"),
        }
    }
}

pub(crate) fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

/// Stable per-thread numeric id for packet headers.
///
/// Ids are assigned on first use per thread and are unique within the
/// process lifetime, which is all the console needs to group entries.
pub(crate) fn current_thread_id() -> u32 {
    static NEXT_THREAD_ID: AtomicU32 = AtomicU32::new(1);
    thread_local! {
        static THREAD_ID: u32 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
    }
    THREAD_ID.with(|id| *id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_ids_are_stable_within_a_thread() {
        let first = current_thread_id();
        let second = current_thread_id();
        assert_eq!(first, second);
    }

    #[test]
    fn thread_ids_differ_across_threads() {
        let here = current_thread_id();
        let there = std::thread::spawn(current_thread_id).join().unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn log_header_content_carries_host_and_app() {
        let header = LogHeader::for_client("box-1", "demo");
        assert_eq!(header.content, "hostname=box-1\r\nappname=demo\r\n");
    }

    #[test]
    fn control_commands_default_to_control_level() {
        let cmd = ControlCommand::new(ControlCommandKind::ClearAll);
        assert_eq!(cmd.level, Level::Control);
    }
}
