//! Rotating file transport.
//!
//! Frames are written contiguously; the file carries no header of its own,
//! so the first frame of a fresh part is whatever the dispatcher sends
//! first. Rotation is evaluated before each write: crossing the size
//! threshold or a calendar boundary closes the current part and opens a new
//! one named from the timestamp template `stem-YYYY-MM-DD-HH-MM-SS.ext`.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use log::warn;

use crate::config::OptionMap;
use crate::error::{ConfigurationError, TransportError};

use super::rotate::{RotateMode, Rotater};
use super::Transport;

pub const DEFAULT_FILENAME: &str = "log.swl";
const STAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// Tunables for a [`FileTransport`] beyond the destination path.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileOptions {
    /// Append to a pre-existing file on the first open instead of
    /// truncating it. Ignored for rotation, which always starts fresh.
    pub append: bool,
    /// Size threshold in bytes; 0 disables size rotation.
    pub max_size: u64,
    pub rotate: RotateMode,
    /// Rotated parts to keep on disk; 0 keeps everything.
    pub max_parts: u32,
}

pub struct FileTransport {
    filename: PathBuf,
    options: FileOptions,
    rotater: Option<Rotater>,
    writer: Option<BufWriter<File>>,
    written: u64,
}

impl FileTransport {
    pub fn new(filename: impl Into<PathBuf>, options: FileOptions) -> Self {
        Self {
            filename: filename.into(),
            options,
            rotater: None,
            writer: None,
            written: 0,
        }
    }

    pub(crate) fn from_options(options: &OptionMap) -> Result<Self, ConfigurationError> {
        let rotate = match options.get("rotate") {
            None => RotateMode::None,
            Some(raw) => raw.parse().map_err(|_| ConfigurationError::InvalidValue {
                key: "rotate".to_string(),
                value: raw.to_string(),
                reason: "expected none, hourly, daily, weekly or monthly".to_string(),
            })?,
        };
        let max_size = options.get_size("maxsize", 0)?;
        // Pure size rotation keeps two parts unless told otherwise; timed
        // rotation keeps everything.
        let default_parts = if max_size > 0 && rotate == RotateMode::None {
            2
        } else {
            0
        };
        let mut append = options.get_bool("append", false)?;
        if options.get("key").map_or(false, |k| !k.is_empty()) {
            // Encrypted parts always start fresh.
            append = false;
        }
        Ok(Self::new(
            options.get_string("filename", DEFAULT_FILENAME),
            FileOptions {
                append,
                max_size,
                rotate,
                max_parts: options.get_u32("maxparts", default_parts)?,
            },
        ))
    }

    fn rotating(&self) -> bool {
        self.options.rotate != RotateMode::None || self.options.max_size > 0
    }

    fn open_part(&mut self, path: &Path, append: bool) -> Result<(), TransportError> {
        let file = if append {
            OpenOptions::new().create(true).append(true).open(path)?
        } else {
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(path)?
        };
        self.written = if append { file.metadata()?.len() } else { 0 };
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }

    fn rotate(&mut self, now: DateTime<Utc>) -> Result<(), TransportError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        let path = part_path(&self.filename, now);
        self.open_part(&path, false)?;
        self.purge_old_parts();
        Ok(())
    }

    /// Delete the oldest rotated parts beyond `max_parts`. Failures are
    /// logged and skipped; a stuck file must not stall the writer.
    fn purge_old_parts(&self) {
        if self.options.max_parts == 0 {
            return;
        }
        let mut parts = list_parts(&self.filename);
        while parts.len() > self.options.max_parts as usize {
            let oldest = parts.remove(0);
            if let Err(err) = fs::remove_file(&oldest) {
                warn!("failed to delete rotated part {}: {err}", oldest.display());
            }
        }
    }
}

impl Transport for FileTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        if self.writer.is_some() {
            return Ok(());
        }
        let now = Utc::now();
        let mut part_stamp = now;
        let (path, append) = if !self.rotating() {
            (self.filename.clone(), self.options.append)
        } else if self.options.append {
            // Resume the newest existing part so restarts do not fragment
            // the sequence; its own timestamp anchors the rotation bucket.
            match list_parts(&self.filename).pop() {
                Some(latest) => {
                    if let Some(stamp) = part_stamp_of(&self.filename, &latest) {
                        part_stamp = stamp;
                    }
                    (latest, true)
                }
                None => (part_path(&self.filename, now), false),
            }
        } else {
            (part_path(&self.filename, now), false)
        };
        self.open_part(&path, append)?;
        if self.options.rotate != RotateMode::None {
            self.rotater = Some(Rotater::new(self.options.rotate, part_stamp));
        }
        if self.rotating() {
            self.purge_old_parts();
        }
        Ok(())
    }

    fn write(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        if self.writer.is_none() {
            return Err(TransportError::NotConnected);
        }
        let now = Utc::now();
        if let Some(rotater) = self.rotater.as_mut() {
            if rotater.update(now) {
                self.rotate(now)?;
            }
        }
        if self.options.max_size > 0
            && self.written > 0
            && self.written + frame.len() as u64 > self.options.max_size
        {
            self.rotate(now)?;
        }
        match self.writer.as_mut() {
            Some(writer) => {
                writer.write_all(frame)?;
                self.written += frame.len() as u64;
                Ok(())
            }
            None => Err(TransportError::NotConnected),
        }
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        match self.writer.as_mut() {
            Some(writer) => Ok(writer.flush()?),
            None => Ok(()),
        }
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.flush();
        }
        self.rotater = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.writer.is_some()
    }
}

impl Drop for FileTransport {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}

fn split_name(base: &Path) -> (String, Option<String>) {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "log".to_string());
    let ext = base.extension().map(|e| e.to_string_lossy().into_owned());
    (stem, ext)
}

fn parent_dir(base: &Path) -> &Path {
    match base.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

fn part_name(stem: &str, stamp: &str, suffix: &str, ext: Option<&str>) -> String {
    match ext {
        Some(ext) => format!("{stem}-{stamp}{suffix}.{ext}"),
        None => format!("{stem}-{stamp}{suffix}"),
    }
}

/// Next part path for `base` at `now`. When two rotations land on the same
/// second, a letter suffix keeps the names distinct and ordered.
fn part_path(base: &Path, now: DateTime<Utc>) -> PathBuf {
    let (stem, ext) = split_name(base);
    let dir = parent_dir(base);
    let stamp = now.format(STAMP_FORMAT).to_string();
    let mut candidate = dir.join(part_name(&stem, &stamp, "", ext.as_deref()));
    for suffix in 'a'..='z' {
        if !candidate.exists() {
            break;
        }
        candidate = dir.join(part_name(
            &stem,
            &stamp,
            suffix.to_string().as_str(),
            ext.as_deref(),
        ));
    }
    candidate
}

/// All rotated parts of `base`, oldest first. Timestamped names sort
/// lexicographically in chronological order.
fn list_parts(base: &Path) -> Vec<PathBuf> {
    let (stem, ext) = split_name(base);
    let dir = parent_dir(base);
    let prefix = format!("{stem}-");
    let mut parts: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                let name = match path.file_name() {
                    Some(name) => name.to_string_lossy().into_owned(),
                    None => return false,
                };
                name.starts_with(&prefix)
                    && path.extension().map(|e| e.to_string_lossy().into_owned()) == ext
                    && part_stamp_of(base, path).is_some()
            })
            .collect(),
        Err(_) => Vec::new(),
    };
    parts.sort();
    parts
}

/// Timestamp encoded in a rotated part's name, if it has one.
fn part_stamp_of(base: &Path, part: &Path) -> Option<DateTime<Utc>> {
    let (stem, ext) = split_name(base);
    let name = part.file_name()?.to_string_lossy().into_owned();
    let rest = name.strip_prefix(&format!("{stem}-"))?;
    let rest = match ext {
        Some(ext) => rest.strip_suffix(&format!(".{ext}"))?,
        None => rest,
    };
    let stamp = rest.trim_end_matches(|c: char| c.is_ascii_lowercase());
    NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn part_names_substitute_the_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("app.swl");
        let path = part_path(&base, at(2026, 8, 30, 12, 0, 5));
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "app-2026-08-30-12-00-05.swl"
        );
    }

    #[test]
    fn colliding_part_names_get_a_letter_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("app.swl");
        let stamp = at(2026, 8, 30, 12, 0, 5);
        fs::write(part_path(&base, stamp), b"x").unwrap();
        let second = part_path(&base, stamp);
        assert_eq!(
            second.file_name().unwrap().to_str().unwrap(),
            "app-2026-08-30-12-00-05a.swl"
        );
    }

    #[test]
    fn part_listing_is_chronological_and_ignores_strangers() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("app.swl");
        for name in [
            "app-2026-08-30-12-00-05.swl",
            "app-2026-08-29-00-00-00.swl",
            "other-2026-08-30-12-00-05.swl",
            "app.swl",
            "notes.txt",
        ] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        let parts: Vec<String> = list_parts(&base)
            .into_iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            parts,
            vec![
                "app-2026-08-29-00-00-00.swl",
                "app-2026-08-30-12-00-05.swl"
            ]
        );
    }

    #[test]
    fn part_stamps_round_trip_through_names() {
        let base = Path::new("/var/log/app.swl");
        let stamp = at(2026, 8, 30, 12, 0, 5);
        let part = Path::new("/var/log/app-2026-08-30-12-00-05a.swl");
        assert_eq!(part_stamp_of(base, part), Some(stamp));
        assert_eq!(part_stamp_of(base, Path::new("/var/log/app-junk.swl")), None);
    }

    #[test]
    fn size_rotation_crosses_to_a_new_part_without_losing_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("app.swl");
        let mut transport = FileTransport::new(
            &base,
            FileOptions {
                max_size: 100,
                ..Default::default()
            },
        );
        transport.connect().unwrap();
        for _ in 0..5 {
            transport.write(&[7u8; 40]).unwrap();
        }
        transport.disconnect().unwrap();

        // 40+40 fits, the third frame crosses, then 40+40 and a crossing
        // again: three parts of 80, 80 and 40 bytes.
        let sizes: Vec<u64> = list_parts(&base)
            .iter()
            .map(|p| fs::metadata(p).unwrap().len())
            .collect();
        assert_eq!(sizes, vec![80, 80, 40]);
    }

    #[test]
    fn an_oversized_frame_still_lands_in_one_part() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("app.swl");
        let mut transport = FileTransport::new(
            &base,
            FileOptions {
                max_size: 10,
                ..Default::default()
            },
        );
        transport.connect().unwrap();
        transport.write(&[1u8; 64]).unwrap();
        transport.disconnect().unwrap();
        let parts = list_parts(&base);
        assert_eq!(parts.len(), 1);
        assert_eq!(fs::metadata(&parts[0]).unwrap().len(), 64);
    }

    #[test]
    fn purge_keeps_only_the_newest_parts() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("app.swl");
        let mut transport = FileTransport::new(
            &base,
            FileOptions {
                max_size: 50,
                max_parts: 2,
                ..Default::default()
            },
        );
        transport.connect().unwrap();
        // Each part fits one 40-byte frame, so five writes force four
        // rotations; only the two newest parts may survive.
        for i in 0..5u8 {
            transport.write(&[i; 40]).unwrap();
        }
        transport.disconnect().unwrap();
        assert_eq!(list_parts(&base).len(), 2);
    }

    #[test]
    fn append_resumes_the_newest_part() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("app.swl");
        let options = FileOptions {
            max_size: 1024,
            append: true,
            ..Default::default()
        };

        let mut first = FileTransport::new(&base, options);
        first.connect().unwrap();
        first.write(b"one").unwrap();
        first.disconnect().unwrap();

        let mut second = FileTransport::new(&base, options);
        second.connect().unwrap();
        second.write(b"two").unwrap();
        second.disconnect().unwrap();

        let parts = list_parts(&base);
        assert_eq!(parts.len(), 1);
        assert_eq!(fs::read(&parts[0]).unwrap(), b"onetwo");
    }

    #[test]
    fn plain_file_without_rotation_truncates_or_appends_per_option() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("plain.swl");
        fs::write(&base, b"old").unwrap();

        let mut appending = FileTransport::new(
            &base,
            FileOptions {
                append: true,
                ..Default::default()
            },
        );
        appending.connect().unwrap();
        appending.write(b"+new").unwrap();
        appending.disconnect().unwrap();
        assert_eq!(fs::read(&base).unwrap(), b"old+new");

        let mut truncating = FileTransport::new(&base, FileOptions::default());
        truncating.connect().unwrap();
        truncating.write(b"fresh").unwrap();
        truncating.disconnect().unwrap();
        assert_eq!(fs::read(&base).unwrap(), b"fresh");
    }

    #[test]
    fn options_derive_defaults_from_the_clause() {
        let specs = crate::config::parse("file(filename=out.swl,maxsize=1KB)").unwrap();
        let transport = FileTransport::from_options(&specs[0].options).unwrap();
        assert_eq!(transport.options.max_size, 1024);
        assert_eq!(transport.options.max_parts, 2);
        assert_eq!(transport.options.rotate, RotateMode::None);

        let specs = crate::config::parse("file(rotate=daily)").unwrap();
        let transport = FileTransport::from_options(&specs[0].options).unwrap();
        assert_eq!(transport.options.rotate, RotateMode::Daily);
        assert_eq!(transport.options.max_parts, 0);
        assert_eq!(transport.filename, PathBuf::from(DEFAULT_FILENAME));
    }

    #[test]
    fn a_configured_key_disables_append() {
        let specs = crate::config::parse("file(filename=out.swl,append=true,key=secret)").unwrap();
        let transport = FileTransport::from_options(&specs[0].options).unwrap();
        assert!(!transport.options.append);
    }
}
