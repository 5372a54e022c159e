use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Frame one event as `[len][bincode][crc32]`, little-endian.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload = bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event too large for WAL frame"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

enum Frame {
    /// An intact event and the number of bytes its frame occupies.
    Event(Event, u64),
    /// Clean end of file.
    End,
    /// Torn or corrupt entry; everything from here on is ignored.
    Damaged(&'static str),
}

fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn read_frame(reader: &mut impl Read) -> io::Result<Frame> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        match reader.read(&mut len_buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    match filled {
        0 => return Ok(Frame::End),
        4 => {}
        _ => return Ok(Frame::Damaged("truncated length prefix")),
    }
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut payload = vec![0u8; len];
    if !read_exact_or_eof(reader, &mut payload)? {
        return Ok(Frame::Damaged("truncated payload"));
    }
    let mut crc_buf = [0u8; 4];
    if !read_exact_or_eof(reader, &mut crc_buf)? {
        return Ok(Frame::Damaged("truncated checksum"));
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(Frame::Damaged("checksum mismatch"));
    }
    let frame_len = (len + 8) as u64;
    Ok(match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Frame::Event(event, frame_len),
        Err(_) => Frame::Damaged("undecodable payload"),
    })
}

/// Append-only log of store events.
///
/// Every entry is `[u32 len][bincode Event][u32 crc32]`. Replay stops at the
/// first entry that is cut short or fails its checksum, so a crash mid-write
/// loses at most the unacknowledged tail. `recover` cuts such a tail off the
/// file before it is reopened for appending.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// Length of the file up to the end of the last durable batch.
    len: u64,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            len,
            appends_since_compact: 0,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_batch(std::slice::from_ref(event))
    }

    /// Write `events` and fsync once. On error the file is cut back to its
    /// length before the call, so a failed batch never reappears on replay.
    pub fn append_batch(&mut self, events: &[Event]) -> io::Result<()> {
        let mut buf = Vec::new();
        for event in events {
            encode_event(&mut buf, event)?;
        }
        let written = self
            .writer
            .write_all(&buf)
            .and_then(|()| self.writer.flush())
            .and_then(|()| self.writer.get_ref().sync_all());
        if let Err(e) = written {
            if let Err(rollback) = self.rollback() {
                tracing::error!("WAL {}: rollback after failed append failed: {rollback}", self.path.display());
            }
            return Err(e);
        }
        self.len += buf.len() as u64;
        self.appends_since_compact += events.len() as u64;
        Ok(())
    }

    /// Drop buffered bytes and truncate the file to the last durable batch.
    fn rollback(&mut self) -> io::Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        file.set_len(self.len)?;
        file.sync_all()?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        // into_parts hands back the unflushed buffer instead of writing it
        let _ = stale.into_parts();
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn compact_path(path: &Path) -> PathBuf {
        path.with_extension("wal.compact")
    }

    /// Write `events` to a side file next to `path` and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_path(path))?);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the side file over the log and reopen for appending.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        fs::rename(Self::compact_path(&self.path), &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        tracing::info!("WAL compacted: {}", self.path.display());
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

    /// Read every intact event. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Ok(Self::scan(path)?.0)
    }

    /// Replay, then truncate the file after the last intact event so new
    /// appends do not land behind a damaged frame.
    pub fn recover(path: &Path) -> io::Result<Vec<Event>> {
        let (events, damaged_at) = Self::scan(path)?;
        if let Some(offset) = damaged_at {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(offset)?;
            file.sync_all()?;
            tracing::warn!("WAL {}: truncated to {offset} bytes", path.display());
        }
        Ok(events)
    }

    /// Intact events, and the byte offset of the first damaged frame if any.
    fn scan(path: &Path) -> io::Result<(Vec<Event>, Option<u64>)> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), None)),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut offset = 0u64;
        loop {
            match read_frame(&mut reader)? {
                Frame::Event(event, frame_len) => {
                    events.push(event);
                    offset += frame_len;
                }
                Frame::End => return Ok((events, None)),
                Frame::Damaged(reason) => {
                    tracing::warn!(
                        "WAL {}: discarding tail after {} events ({reason})",
                        path.display(),
                        events.len()
                    );
                    return Ok((events, Some(offset)));
                }
            }
        }
    }
}
