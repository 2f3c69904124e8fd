//! Binary frame codec.
//!
//! Every packet encodes to a self-describing frame: a 1-byte kind tag, a
//! 4-byte little-endian payload length, then the payload. Strings are UTF-8
//! bytes behind a 4-byte little-endian byte length, enumerations are 4-byte
//! little-endian signed integers carrying the protocol discriminant, and
//! timestamps are 8-byte little-endian microsecond counts since the Unix
//! epoch. `decode` is the exact inverse of `encode` and rejects any frame
//! whose declared lengths disagree with the bytes actually present.

use crate::error::FramingError;
use crate::level::Level;

use super::{
    ControlCommand, ControlCommandKind, LogEntry, LogEntryKind, LogHeader, Packet, PacketKind,
    ProcessFlow, ProcessFlowKind, ViewerId, Watch, WatchKind,
};

/// Bytes occupied by the kind tag and payload length of every frame.
pub const FRAME_HEADER_SIZE: usize = 5;

/// Largest payload `encode` will frame. Anything bigger is a caller bug
/// (or abuse) and gets rejected rather than truncating the length prefix.
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

/// Encode a packet into one complete frame.
///
/// Encoding is deterministic: every representable packet value under the
/// payload limit has exactly one frame.
pub fn encode(packet: &Packet) -> Result<Vec<u8>, FramingError> {
    let mut payload = Vec::with_capacity(64);
    payload.push(packet.level() as u8);
    match packet {
        Packet::LogEntry(p) => encode_log_entry(&mut payload, p),
        Packet::Watch(p) => encode_watch(&mut payload, p),
        Packet::ControlCommand(p) => encode_control_command(&mut payload, p),
        Packet::ProcessFlow(p) => encode_process_flow(&mut payload, p),
        Packet::LogHeader(p) => put_str(&mut payload, &p.content),
    }
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(FramingError::Oversized(payload.len()));
    }

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.push(packet.kind() as u8);
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decode one frame from the front of `buf`.
///
/// Returns the packet together with the number of bytes consumed so stream
/// readers can advance past the frame. Truncated input, unknown tags,
/// out-of-range discriminants and unconsumed payload bytes all fail with a
/// [`FramingError`].
pub fn decode(buf: &[u8]) -> Result<(Packet, usize), FramingError> {
    if buf.len() < FRAME_HEADER_SIZE {
        return Err(FramingError::Truncated {
            declared: FRAME_HEADER_SIZE,
            available: buf.len(),
        });
    }
    let kind = PacketKind::from_tag(buf[0]).ok_or(FramingError::UnknownKind(buf[0]))?;
    let declared = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
    let available = buf.len() - FRAME_HEADER_SIZE;
    if declared > available {
        return Err(FramingError::Truncated { declared, available });
    }

    let mut reader = Reader::new(&buf[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + declared]);
    let level = read_level(&mut reader)?;
    let packet = match kind {
        PacketKind::LogEntry => Packet::LogEntry(decode_log_entry(&mut reader, level)?),
        PacketKind::Watch => Packet::Watch(decode_watch(&mut reader, level)?),
        PacketKind::ControlCommand => {
            Packet::ControlCommand(decode_control_command(&mut reader, level)?)
        }
        PacketKind::ProcessFlow => Packet::ProcessFlow(decode_process_flow(&mut reader, level)?),
        PacketKind::LogHeader => Packet::LogHeader(LogHeader {
            level,
            content: reader.take_str()?,
        }),
    };
    if reader.remaining() > 0 {
        return Err(FramingError::TrailingBytes(reader.remaining()));
    }
    Ok((packet, FRAME_HEADER_SIZE + declared))
}

fn encode_log_entry(out: &mut Vec<u8>, p: &LogEntry) {
    put_i32(out, p.entry_kind as i32);
    put_i32(out, p.viewer_id as i32);
    put_str(out, &p.app_name);
    put_str(out, &p.session_name);
    put_str(out, &p.title);
    put_str(out, &p.host_name);
    put_blob(out, &p.data);
    put_u32(out, p.process_id);
    put_u32(out, p.thread_id);
    put_i64(out, p.timestamp);
}

fn decode_log_entry(r: &mut Reader<'_>, level: Level) -> Result<LogEntry, FramingError> {
    Ok(LogEntry {
        level,
        entry_kind: log_entry_kind(r.take_i32()?)?,
        viewer_id: viewer_id(r.take_i32()?)?,
        app_name: r.take_str()?,
        session_name: r.take_str()?,
        title: r.take_str()?,
        host_name: r.take_str()?,
        data: r.take_blob()?,
        process_id: r.take_u32()?,
        thread_id: r.take_u32()?,
        timestamp: r.take_i64()?,
    })
}

fn encode_watch(out: &mut Vec<u8>, p: &Watch) {
    put_str(out, &p.name);
    put_str(out, &p.value);
    put_i32(out, p.watch_kind as i32);
    put_i64(out, p.timestamp);
}

fn decode_watch(r: &mut Reader<'_>, level: Level) -> Result<Watch, FramingError> {
    Ok(Watch {
        level,
        name: r.take_str()?,
        value: r.take_str()?,
        watch_kind: watch_kind(r.take_i32()?)?,
        timestamp: r.take_i64()?,
    })
}

fn encode_control_command(out: &mut Vec<u8>, p: &ControlCommand) {
    put_i32(out, p.command_kind as i32);
    put_blob(out, &p.data);
}

fn decode_control_command(r: &mut Reader<'_>, level: Level) -> Result<ControlCommand, FramingError> {
    Ok(ControlCommand {
        level,
        command_kind: control_command_kind(r.take_i32()?)?,
        data: r.take_blob()?,
    })
}

fn encode_process_flow(out: &mut Vec<u8>, p: &ProcessFlow) {
    put_i32(out, p.flow_kind as i32);
    put_str(out, &p.title);
    put_str(out, &p.host_name);
    put_u32(out, p.process_id);
    put_u32(out, p.thread_id);
    put_i64(out, p.timestamp);
}

fn decode_process_flow(r: &mut Reader<'_>, level: Level) -> Result<ProcessFlow, FramingError> {
    Ok(ProcessFlow {
        level,
        flow_kind: process_flow_kind(r.take_i32()?)?,
        title: r.take_str()?,
        host_name: r.take_str()?,
        process_id: r.take_u32()?,
        thread_id: r.take_u32()?,
        timestamp: r.take_i64()?,
    })
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_i32(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_i64(out: &mut Vec<u8>, value: i64) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_str(out: &mut Vec<u8>, value: &str) {
    put_blob(out, value.as_bytes());
}

fn put_blob(out: &mut Vec<u8>, value: &[u8]) {
    put_u32(out, value.len() as u32);
    out.extend_from_slice(value);
}

fn read_level(r: &mut Reader<'_>) -> Result<Level, FramingError> {
    let raw = r.take_u8()?;
    Level::from_wire(raw).ok_or(FramingError::InvalidEnum {
        field: "level",
        value: i32::from(raw),
    })
}

fn log_entry_kind(value: i32) -> Result<LogEntryKind, FramingError> {
    use LogEntryKind::*;
    match value {
        1 => Ok(Separator),
        2 => Ok(EnterMethod),
        3 => Ok(LeaveMethod),
        100 => Ok(Message),
        101 => Ok(Warning),
        102 => Ok(Error),
        103 => Ok(InternalError),
        105 => Ok(Comment),
        106 => Ok(VariableValue),
        _ => Err(FramingError::InvalidEnum {
            field: "log entry kind",
            value,
        }),
    }
}

fn viewer_id(value: i32) -> Result<ViewerId, FramingError> {
    use ViewerId::*;
    match value {
        -1 => Ok(NoViewer),
        0 => Ok(Title),
        1 => Ok(Data),
        2 => Ok(List),
        3 => Ok(ValueList),
        4 => Ok(Inspector),
        5 => Ok(Table),
        100 => Ok(Web),
        200 => Ok(Binary),
        _ => Err(FramingError::InvalidEnum {
            field: "viewer id",
            value,
        }),
    }
}

fn watch_kind(value: i32) -> Result<WatchKind, FramingError> {
    use WatchKind::*;
    match value {
        1 => Ok(Str),
        2 => Ok(Int),
        3 => Ok(Float),
        4 => Ok(Bool),
        5 => Ok(Address),
        6 => Ok(Timestamp),
        7 => Ok(Object),
        _ => Err(FramingError::InvalidEnum {
            field: "watch kind",
            value,
        }),
    }
}

fn control_command_kind(value: i32) -> Result<ControlCommandKind, FramingError> {
    use ControlCommandKind::*;
    match value {
        0 => Ok(ClearLog),
        1 => Ok(ClearWatches),
        2 => Ok(ClearAutoViews),
        3 => Ok(ClearAll),
        4 => Ok(ClearProcessFlow),
        _ => Err(FramingError::InvalidEnum {
            field: "control command kind",
            value,
        }),
    }
}

fn process_flow_kind(value: i32) -> Result<ProcessFlowKind, FramingError> {
    use ProcessFlowKind::*;
    match value {
        0 => Ok(EnterMethod),
        1 => Ok(LeaveMethod),
        2 => Ok(EnterThread),
        3 => Ok(LeaveThread),
        4 => Ok(EnterProcess),
        5 => Ok(LeaveProcess),
        _ => Err(FramingError::InvalidEnum {
            field: "process flow kind",
            value,
        }),
    }
}

/// Bounds-checked cursor over a payload slice.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], FramingError> {
        if len > self.remaining() {
            return Err(FramingError::Truncated {
                declared: len,
                available: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8, FramingError> {
        Ok(self.take(1)?[0])
    }

    fn take_u32(&mut self) -> Result<u32, FramingError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn take_i32(&mut self) -> Result<i32, FramingError> {
        Ok(self.take_u32()? as i32)
    }

    fn take_i64(&mut self) -> Result<i64, FramingError> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(i64::from_le_bytes(raw))
    }

    fn take_blob(&mut self) -> Result<Vec<u8>, FramingError> {
        let len = self.take_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn take_str(&mut self) -> Result<String, FramingError> {
        let bytes = self.take_blob()?;
        String::from_utf8(bytes).map_err(|_| FramingError::InvalidUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn sample_entry() -> Packet {
        let mut entry = LogEntry::new(LogEntryKind::Message, ViewerId::Title, "hello");
        entry.app_name = "app".into();
        entry.session_name = "main".into();
        entry.host_name = "box".into();
        entry.data = vec![1, 2, 3];
        Packet::LogEntry(entry)
    }

    #[test]
    fn frame_header_carries_tag_and_length() {
        let frame = encode(&sample_entry()).unwrap();
        assert_eq!(frame[0], PacketKind::LogEntry as u8);
        let declared = u32::from_le_bytes([frame[1], frame[2], frame[3], frame[4]]) as usize;
        assert_eq!(declared, frame.len() - FRAME_HEADER_SIZE);
    }

    #[rstest]
    #[case(sample_entry())]
    #[case(Packet::Watch(Watch::new("x", "42", WatchKind::Int)))]
    #[case(Packet::ControlCommand(ControlCommand::new(ControlCommandKind::ClearAll)))]
    #[case(Packet::ProcessFlow(ProcessFlow::new(ProcessFlowKind::EnterThread, "worker")))]
    #[case(Packet::LogHeader(LogHeader::for_client("box", "app")))]
    fn round_trips_every_kind(#[case] packet: Packet) {
        let frame = encode(&packet).unwrap();
        let (decoded, consumed) = decode(&frame).expect("decode");
        assert_eq!(decoded, packet);
        assert_eq!(consumed, frame.len());
    }

    #[test]
    fn truncated_frame_is_a_framing_error() {
        let frame = encode(&sample_entry()).unwrap();
        for cut in [0, 1, FRAME_HEADER_SIZE, frame.len() - 1] {
            assert!(matches!(
                decode(&frame[..cut]),
                Err(FramingError::Truncated { .. })
            ));
        }
    }

    #[test]
    fn unknown_kind_tag_is_rejected() {
        let mut frame = encode(&sample_entry()).unwrap();
        frame[0] = 0x7f;
        assert_eq!(decode(&frame), Err(FramingError::UnknownKind(0x7f)));
    }

    #[test]
    fn overlong_declared_length_is_rejected_not_garbage() {
        let mut frame = encode(&sample_entry()).unwrap();
        let bogus = (frame.len() as u32) * 2;
        frame[1..5].copy_from_slice(&bogus.to_le_bytes());
        assert!(matches!(
            decode(&frame),
            Err(FramingError::Truncated { .. })
        ));
    }

    #[test]
    fn payloads_beyond_the_frame_limit_are_rejected() {
        let mut entry = LogEntry::new(LogEntryKind::Message, ViewerId::Data, "big");
        entry.data = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        assert!(matches!(
            encode(&Packet::LogEntry(entry)),
            Err(FramingError::Oversized(_))
        ));
    }

    #[test]
    fn trailing_payload_bytes_are_rejected() {
        let mut frame = encode(&Packet::LogHeader(LogHeader::for_client("h", "a"))).unwrap();
        frame.push(0);
        let declared = (frame.len() - FRAME_HEADER_SIZE) as u32;
        frame[1..5].copy_from_slice(&declared.to_le_bytes());
        assert_eq!(decode(&frame), Err(FramingError::TrailingBytes(1)));
    }

    #[test]
    fn decode_reports_consumed_bytes_for_stream_reads() {
        let mut stream = encode(&sample_entry()).unwrap();
        let second = encode(&Packet::Watch(Watch::new("y", "true", WatchKind::Bool))).unwrap();
        stream.extend_from_slice(&second);
        let (_, consumed) = decode(&stream).expect("first");
        let (watch, _) = decode(&stream[consumed..]).expect("second");
        assert!(matches!(watch, Packet::Watch(_)));
    }

    #[test]
    fn invalid_utf8_in_string_field_is_rejected() {
        let mut frame = encode(&Packet::LogHeader(LogHeader {
            level: Level::Message,
            content: "ab".into(),
        }))
        .unwrap();
        let len = frame.len();
        frame[len - 1] = 0xff;
        assert_eq!(decode(&frame), Err(FramingError::InvalidUtf8));
    }
}
