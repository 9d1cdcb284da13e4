//! Random-access binary count store (RC) and its external offset index
//! (RCI).
//!
//! Each record is laid out as `name_len:u32 LE`, name bytes, `seq_len:u32
//! LE`, the 2-bit packed sequence padded to whole bytes, then `seq_len`
//! little-endian u32 counts followed by `seq_len` little-endian u32
//! coverages. The index is a flat sequence of `name_len:u32 LE`, name bytes,
//! `offset:u64 LE` records. When the index is missing the store is scanned
//! once and the index is written next to it.

use std::cell::OnceCell;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use derive_new::new;
use log::{debug, warn};
use rustc_hash::FxHashMap;

use crate::errs::{RfError, RfResult};
use crate::stats;

const MAX_NAME_LEN: u32 = 4096;
const MAX_SEQ_LEN: u32 = 1 << 28;

fn index_path(store: &Path) -> PathBuf {
    store.with_extension("rci")
}

fn encode_base(base: u8) -> RfResult<u8> {
    match base.to_ascii_uppercase() {
        b'A' => Ok(0),
        b'C' => Ok(1),
        b'G' => Ok(2),
        b'T' | b'U' => Ok(3),
        other => Err(RfError::Io(std::io::Error::new(
            ErrorKind::InvalidData,
            format!("base {:?} cannot be two-bit encoded", other as char),
        ))),
    }
}

fn decode_base(code: u8) -> char {
    match code & 0b11 {
        0 => 'A',
        1 => 'C',
        2 => 'G',
        _ => 'T',
    }
}

/// Pack a nucleotide sequence at two bits per base, first base in the high
/// bits, padded to whole bytes.
pub fn pack_sequence(sequence: &str) -> RfResult<Vec<u8>> {
    let mut packed = vec![0u8; sequence.len().div_ceil(4)];
    for (i, base) in sequence.bytes().enumerate() {
        let code = encode_base(base)?;
        packed[i / 4] |= code << (6 - 2 * (i % 4));
    }
    Ok(packed)
}

pub fn unpack_sequence(packed: &[u8], length: usize) -> String {
    (0..length)
        .map(|i| decode_base(packed[i / 4] >> (6 - 2 * (i % 4))))
        .collect()
}

/// One transcript read out of a count store. Coverage summaries are computed
/// on first use and cached for the life of the entry.
#[derive(Debug, new)]
pub struct RcEntry {
    pub id: String,
    pub sequence: String,
    pub counts: Vec<u32>,
    pub coverage: Vec<u32>,
    #[new(default)]
    mean_cov: OnceCell<f64>,
    #[new(default)]
    median_cov: OnceCell<f64>,
}

impl RcEntry {
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    pub fn mean_coverage(&self) -> f64 {
        *self
            .mean_cov
            .get_or_init(|| stats::mean_of_counts(&self.coverage))
    }

    pub fn median_coverage(&self) -> f64 {
        *self
            .median_cov
            .get_or_init(|| stats::median_of_counts(&self.coverage))
    }

    pub fn passes_coverage(&self, mean_threshold: f64, median_threshold: f64) -> bool {
        self.mean_coverage() >= mean_threshold
            && self.median_coverage() >= median_threshold
    }
}

fn read_u32<R: Read>(reader: &mut R, id: &str) -> RfResult<u32> {
    let mut buf = [0u8; 4];
    reader
        .read_exact(&mut buf)
        .map_err(|_| RfError::CorruptRecord(id.to_owned()))?;
    Ok(u32::from_le_bytes(buf))
}

/// Reads the 4-byte length that starts a record, None at clean end of file.
fn read_record_start<R: Read>(reader: &mut R) -> RfResult<Option<u32>> {
    let mut buf = [0u8; 4];
    let mut filled = 0usize;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(RfError::CorruptRecord("<store tail>".to_owned())),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(RfError::Io(e)),
        }
    }
    Ok(Some(u32::from_le_bytes(buf)))
}

fn read_name<R: Read>(reader: &mut R, name_len: u32) -> RfResult<String> {
    if name_len == 0 || name_len > MAX_NAME_LEN {
        return Err(RfError::CorruptRecord(format!(
            "<name length {name_len}>"
        )));
    }
    let mut raw = vec![0u8; name_len as usize];
    reader
        .read_exact(&mut raw)
        .map_err(|_| RfError::CorruptRecord("<record name>".to_owned()))?;
    String::from_utf8(raw)
        .map_err(|_| RfError::CorruptRecord("<non-utf8 name>".to_owned()))
}

fn read_u32_vector<R: Read>(reader: &mut R, n: usize, id: &str) -> RfResult<Vec<u32>> {
    let mut raw = vec![0u8; n * 4];
    reader
        .read_exact(&mut raw)
        .map_err(|_| RfError::CorruptRecord(id.to_owned()))?;
    Ok(raw
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

fn read_record_body<R: Read>(reader: &mut R, name: String) -> RfResult<RcEntry> {
    let seq_len = read_u32(reader, &name)?;
    if seq_len > MAX_SEQ_LEN {
        return Err(RfError::CorruptRecord(name));
    }
    let length = seq_len as usize;
    let mut packed = vec![0u8; length.div_ceil(4)];
    reader
        .read_exact(&mut packed)
        .map_err(|_| RfError::CorruptRecord(name.clone()))?;
    let sequence = unpack_sequence(&packed, length);
    let counts = read_u32_vector(reader, length, &name)?;
    let coverage = read_u32_vector(reader, length, &name)?;
    Ok(RcEntry::new(name, sequence, counts, coverage))
}

/// Read-only handle on a count store. Every worker opens its own reader, no
/// file state is shared between threads.
#[derive(Debug)]
pub struct RcReader {
    reader: BufReader<File>,
    order: Vec<String>,
    offsets: FxHashMap<String, u64>,
}

impl RcReader {
    pub fn open<P: AsRef<Path>>(path: P) -> RfResult<Self> {
        let path = path.as_ref();
        let mut reader = BufReader::new(File::open(path)?);
        let rci = index_path(path);
        let entries = if rci.exists() {
            Self::load_index(&rci)?
        } else {
            debug!("no index found for {}, scanning store", path.display());
            let entries = Self::scan_store(&mut reader)?;
            match write_index(&rci, &entries) {
                Ok(()) => debug!("wrote index to {}", rci.display()),
                Err(e) => warn!(
                    "failed to write index at {}, {e}; continuing without it",
                    rci.display()
                ),
            }
            entries
        };
        let order = entries.iter().map(|(name, _)| name.clone()).collect();
        let offsets = entries.into_iter().collect::<FxHashMap<String, u64>>();
        Ok(Self { reader, order, offsets })
    }

    fn load_index(rci: &Path) -> RfResult<Vec<(String, u64)>> {
        let mut reader = BufReader::new(File::open(rci)?);
        let mut entries = Vec::new();
        while let Some(name_len) = read_record_start(&mut reader)? {
            let name = read_name(&mut reader, name_len)?;
            let mut buf = [0u8; 8];
            reader
                .read_exact(&mut buf)
                .map_err(|_| RfError::CorruptRecord(name.clone()))?;
            entries.push((name, u64::from_le_bytes(buf)));
        }
        Ok(entries)
    }

    fn scan_store(reader: &mut BufReader<File>) -> RfResult<Vec<(String, u64)>> {
        let store_len = reader.get_ref().metadata()?.len();
        reader.seek(SeekFrom::Start(0))?;
        let mut entries = Vec::new();
        let mut offset = 0u64;
        while let Some(name_len) = read_record_start(reader)? {
            let name = read_name(reader, name_len)?;
            let seq_len = read_u32(reader, &name)? as u64;
            if seq_len > MAX_SEQ_LEN as u64 {
                return Err(RfError::CorruptRecord(name));
            }
            let body = seq_len.div_ceil(4) + seq_len * 8;
            let record_size = 4 + name_len as u64 + 4 + body;
            // a record that runs past the end of the store is truncated
            if offset + record_size > store_len {
                return Err(RfError::CorruptRecord(name));
            }
            reader.seek_relative(body as i64)?;
            entries.push((name, offset));
            offset += record_size;
        }
        Ok(entries)
    }

    /// Transcript identifiers in file order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    pub fn num_transcripts(&self) -> usize {
        self.order.len()
    }

    /// Random-access read of one transcript, None when the store has no such
    /// identifier.
    pub fn get(&mut self, id: &str) -> RfResult<Option<RcEntry>> {
        let offset = match self.offsets.get(id) {
            Some(&offset) => offset,
            None => return Ok(None),
        };
        self.reader.seek(SeekFrom::Start(offset))?;
        let name_len = read_u32(&mut self.reader, id)?;
        if name_len == 0 || name_len > MAX_NAME_LEN {
            return Err(RfError::CorruptRecord(id.to_owned()));
        }
        let name = read_name(&mut self.reader, name_len)?;
        if name != id {
            return Err(RfError::CorruptRecord(id.to_owned()));
        }
        read_record_body(&mut self.reader, name).map(Some)
    }
}

fn write_index(rci: &Path, entries: &[(String, u64)]) -> RfResult<()> {
    let mut writer = BufWriter::new(File::create(rci)?);
    for (name, offset) in entries {
        writer.write_all(&(name.len() as u32).to_le_bytes())?;
        writer.write_all(name.as_bytes())?;
        writer.write_all(&offset.to_le_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

/// Appends transcripts to a fresh count store, writing the index on finish.
pub struct RcWriter {
    writer: BufWriter<File>,
    rci: PathBuf,
    entries: Vec<(String, u64)>,
    offset: u64,
}

impl RcWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> RfResult<Self> {
        let path = path.as_ref();
        let writer = BufWriter::new(File::create(path)?);
        Ok(Self {
            writer,
            rci: index_path(path),
            entries: Vec::new(),
            offset: 0,
        })
    }

    pub fn write_entry(
        &mut self,
        id: &str,
        sequence: &str,
        counts: &[u32],
        coverage: &[u32],
    ) -> RfResult<()> {
        if counts.len() != sequence.len() || coverage.len() != sequence.len() {
            return Err(RfError::Config(format!(
                "count and coverage vectors for {id} must match the sequence \
                 length ({})",
                sequence.len()
            )));
        }
        let packed = pack_sequence(sequence)?;
        self.writer.write_all(&(id.len() as u32).to_le_bytes())?;
        self.writer.write_all(id.as_bytes())?;
        self.writer
            .write_all(&(sequence.len() as u32).to_le_bytes())?;
        self.writer.write_all(&packed)?;
        for &c in counts {
            self.writer.write_all(&c.to_le_bytes())?;
        }
        for &n in coverage {
            self.writer.write_all(&n.to_le_bytes())?;
        }
        self.entries.push((id.to_owned(), self.offset));
        self.offset +=
            4 + id.len() as u64 + 4 + packed.len() as u64 + sequence.len() as u64 * 8;
        Ok(())
    }

    pub fn finish(mut self) -> RfResult<()> {
        self.writer.flush()?;
        write_index(&self.rci, &self.entries)
    }
}
