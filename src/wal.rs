use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Event;

/// File header: 7-byte magic plus a format version byte.
const HEADER: [u8; 8] = *b"SLOTWAL\x01";

/// Largest payload a record may carry. A length prefix above this is a torn tail.
const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// Bytes of framing around each payload: length prefix and crc32.
const FRAME_LEN: u64 = 8;

fn write_header(writer: &mut impl Write) -> io::Result<()> {
    writer.write_all(&HEADER)
}

/// Encode a single event as `[len][bincode][crc32]`.
fn encode_record(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_RECORD_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "record too large"));
    }
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Read one record and its size on disk. `Ok(None)` means clean end of log
/// or a torn/corrupt tail.
fn decode_record(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_RECORD_LEN {
        return Ok(None);
    }

    let mut payload = vec![0u8; len];
    match reader.read_exact(&mut payload) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let mut crc_buf = [0u8; 4];
    match reader.read_exact(&mut crc_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }

    Ok(bincode::deserialize::<Event>(&payload)
        .ok()
        .map(|event| (event, len as u64 + FRAME_LEN)))
}

/// Append-only log of slot events.
///
/// Layout: an 8-byte header, then `[u32: len][bincode: Event][u32: crc32]` per record.
/// A torn last record (crash mid-append) is discarded on replay.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Open the log at `path`, creating it (with header) if absent or header-less.
    pub fn open(path: &Path) -> io::Result<Self> {
        let existing = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e),
        };
        if existing < HEADER.len() as u64 {
            let mut file = File::create(path)?;
            write_header(&mut file)?;
            file.sync_all()?;
        }
        let file = OpenOptions::new().append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Append and fsync one event. Production code batches through
    /// `append_buffered` + `flush_sync` instead.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_record(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a compacted log to a sibling temp file. Slow; run before `swap_compact_file`.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        write_header(&mut writer)?;
        for event in events {
            encode_record(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Rename the compacted temp file over the log and reopen for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Read every intact event from the log at `path`.
    ///
    /// A missing or header-less file replays as empty. A file with a foreign
    /// header is refused so an unrelated file is never reinterpreted.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Ok(Self::scan(path)?.0)
    }

    /// Replay, then cut any torn or corrupt tail off the file so appends
    /// made after this start are reachable by the next replay.
    pub fn recover(path: &Path) -> io::Result<Vec<Event>> {
        let (events, intact) = Self::scan(path)?;
        let on_disk = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(events),
            Err(e) => return Err(e),
        };
        // Header-less files are rewritten by `open`.
        if intact >= HEADER.len() as u64 && on_disk > intact {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(intact)?;
            file.sync_all()?;
            warn!(
                discarded = on_disk - intact,
                "truncated torn tail of {}",
                path.display()
            );
        }
        Ok(events)
    }

    /// Intact events plus the byte offset where the intact prefix ends.
    fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);

        let mut header = [0u8; 8];
        match reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e),
        }
        if header != HEADER {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is not a slot log (bad header)", path.display()),
            ));
        }

        let mut events = Vec::new();
        let mut intact = HEADER.len() as u64;
        while let Some((event, size)) = decode_record(&mut reader)? {
            events.push(event);
            intact += size;
        }
        Ok((events, intact))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use ulid::Ulid;

    use crate::model::TimeWindow;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotkeep_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn generated(business_id: Ulid, n: u32) -> Event {
        let slots = (0..n)
            .map(|i| {
                let start = NaiveTime::from_hms_opt(9 + i, 0, 0).unwrap();
                let end = NaiveTime::from_hms_opt(9 + i, 30, 0).unwrap();
                (Ulid::new(), TimeWindow::new(start, end))
            })
            .collect();
        Event::SlotsGenerated {
            business_id,
            date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            created_at: 1_000,
            slots,
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let biz = Ulid::new();
        let events = vec![
            generated(biz, 2),
            Event::SlotReserved {
                id: Ulid::new(),
                business_id: biz,
                reserved_until: 5_000,
            },
        ];

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        assert_eq!(Wal::replay(&path).unwrap(), events);
    }

    #[test]
    fn new_log_starts_with_header() {
        let path = tmp_path("header.wal");
        drop(Wal::open(&path).unwrap());
        let bytes = fs::read(&path).unwrap();
        assert_eq!(&bytes[..], &HEADER[..]);
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn reopen_does_not_rewrite_header() {
        let path = tmp_path("reopen.wal");
        let event = generated(Ulid::new(), 1);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![event.clone(), event]);
    }

    #[test]
    fn foreign_file_is_refused() {
        let path = tmp_path("foreign.wal");
        fs::write(&path, b"definitely not a slot log").unwrap();
        let err = Wal::replay(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn replay_handles_truncation() {
        let path = tmp_path("truncation.wal");
        let event = generated(Ulid::new(), 3);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0u8; 6]).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![event]);
    }

    #[test]
    fn appends_after_torn_tail_survive_replay() {
        let path = tmp_path("torn_then_append.wal");
        let first = generated(Ulid::new(), 2);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
        }
        let intact_len = fs::metadata(&path).unwrap().len();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[7u8; 6]).unwrap();
        }

        assert_eq!(Wal::recover(&path).unwrap(), vec![first.clone()]);
        assert_eq!(fs::metadata(&path).unwrap().len(), intact_len);

        let booked = Event::SlotBooked {
            id: Ulid::new(),
            business_id: Ulid::new(),
        };
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&booked).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![first, booked]);
    }

    #[test]
    fn recover_leaves_clean_log_alone() {
        let path = tmp_path("recover_clean.wal");
        let event = generated(Ulid::new(), 1);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        let len = fs::metadata(&path).unwrap().len();
        assert_eq!(Wal::recover(&path).unwrap(), vec![event]);
        assert_eq!(fs::metadata(&path).unwrap().len(), len);
        assert!(Wal::recover(&tmp_path("recover_missing.wal")).unwrap().is_empty());
    }

    #[test]
    fn oversized_length_prefix_is_a_torn_tail() {
        let path = tmp_path("huge_prefix.wal");
        let good = generated(Ulid::new(), 1);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&u32::MAX.to_le_bytes()).unwrap();
            f.write_all(&[1u8; 32]).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![good]);
    }

    #[test]
    fn replay_nonexistent_file() {
        let path = tmp_path("nonexistent.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_stops_at_corrupt_crc() {
        let path = tmp_path("corrupt_crc.wal");
        let good = generated(Ulid::new(), 1);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }
        {
            let bad = Event::SlotBooked {
                id: Ulid::new(),
                business_id: Ulid::new(),
            };
            let payload = bincode::serialize(&bad).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![good]);
    }

    #[test]
    fn compact_replaces_history() {
        let path = tmp_path("compact.wal");
        let biz = Ulid::new();
        let base = generated(biz, 4);
        let slot_id = match &base {
            Event::SlotsGenerated { slots, .. } => slots[0].0,
            _ => unreachable!(),
        };

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&base).unwrap();
            for _ in 0..20 {
                wal.append(&Event::SlotReserved {
                    id: slot_id,
                    business_id: biz,
                    reserved_until: 9_000,
                })
                .unwrap();
                wal.append(&Event::SlotReleased {
                    id: slot_id,
                    business_id: biz,
                })
                .unwrap();
            }
        }
        let before = fs::metadata(&path).unwrap().len();

        let mut wal = Wal::open(&path).unwrap();
        wal.compact(std::slice::from_ref(&base)).unwrap();
        assert_eq!(wal.appends_since_compact(), 0);

        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted log should shrink: {after} < {before}");

        let booked = Event::SlotBooked {
            id: slot_id,
            business_id: biz,
        };
        wal.append(&booked).unwrap();
        assert_eq!(Wal::replay(&path).unwrap(), vec![base, booked]);
    }

    #[test]
    fn buffered_appends_are_counted() {
        let path = tmp_path("buffered.wal");
        let events: Vec<Event> = (0..5).map(|_| generated(Ulid::new(), 1)).collect();
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 5);
            wal.flush_sync().unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);
    }
}
