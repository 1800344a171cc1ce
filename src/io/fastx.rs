//! Input sources — wraps `niffler` for transparent decompression and
//! `paraseq` for batched FASTA/FASTQ reading.
//!
//! Contig files carry no format flag and are sniffed from their first byte
//! (`>` FASTA, `@` FASTQ). Reads use the `-f` flag; `-` as the reads path
//! means stdin. The `binary` read format streams packed records in the
//! [`crate::io::package::ReadPackage`] layout.

use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use anyhow::{bail, Context, Result};
use paraseq::fasta;
use paraseq::fastq;
use paraseq::Record;

use crate::io::package::ReadPackage;

/// Open a file with automatic decompression (gzip, zstd, etc.).
///
/// Inputs shorter than the compression magic (in particular, empty files)
/// are read plain.
pub fn open_reader(path: &Path) -> Result<Box<dyn Read + Send>> {
    match niffler::send::from_path(path) {
        Ok((reader, _format)) => Ok(reader),
        Err(niffler::Error::FileTooShort) => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            Ok(Box::new(file))
        }
        Err(e) => Err(e).with_context(|| format!("failed to open {}", path.display())),
    }
}

/// Open the reads input, with `-` meaning (possibly compressed) stdin.
pub fn open_read_input(path: &str) -> Result<Box<dyn Read + Send>> {
    if path == "-" {
        match niffler::send::get_reader(Box::new(std::io::stdin())) {
            Ok((reader, _format)) => Ok(reader),
            Err(niffler::Error::FileTooShort) => Ok(Box::new(std::io::empty())),
            Err(e) => Err(e).context("failed to open stdin"),
        }
    } else {
        open_reader(Path::new(path))
    }
}

// ---------------------------------------------------------------------------
// SeqReader
// ---------------------------------------------------------------------------

/// Batched FASTA/FASTQ sequence reader.
pub enum SeqReader {
    Fasta {
        reader: fasta::Reader<Box<dyn Read + Send>>,
        records: fasta::RecordSet,
    },
    Fastq {
        reader: fastq::Reader<Box<dyn Read + Send>>,
        records: fastq::RecordSet,
    },
}

impl SeqReader {
    /// Wrap a raw stream as FASTA.
    pub fn fasta(r: Box<dyn Read + Send>) -> Self {
        let reader = fasta::Reader::new(r);
        let records = reader.new_record_set();
        Self::Fasta { reader, records }
    }

    /// Wrap a raw stream as FASTQ.
    pub fn fastq(r: Box<dyn Read + Send>) -> Self {
        let reader = fastq::Reader::new(r);
        let records = reader.new_record_set();
        Self::Fastq { reader, records }
    }

    /// Sniff the format from the first non-whitespace byte.
    pub fn open_auto(r: Box<dyn Read + Send>) -> Result<Self> {
        let mut buf = BufReader::new(r);
        let first = loop {
            let chunk = buf.fill_buf().context("failed to read sequence input")?;
            if chunk.is_empty() {
                // Empty input; either format parses to zero records.
                break b'>';
            }
            match chunk.iter().position(|b| !b.is_ascii_whitespace()) {
                Some(i) => break chunk[i],
                None => {
                    let n = chunk.len();
                    buf.consume(n);
                }
            }
        };
        let boxed: Box<dyn Read + Send> = Box::new(buf);
        match first {
            b'>' => Ok(Self::fasta(boxed)),
            b'@' => Ok(Self::fastq(boxed)),
            other => bail!("unrecognized sequence format (first byte {:#04x})", other),
        }
    }

    /// Pull the next record set, handing each sequence to `on_seq`.
    ///
    /// Returns `Ok(false)` at end of input.
    pub fn next_batch(&mut self, mut on_seq: impl FnMut(&[u8]) -> Result<()>) -> Result<bool> {
        match self {
            Self::Fasta { reader, records } => {
                if !records.fill(reader)? {
                    return Ok(false);
                }
                for rec in records.iter() {
                    let rec = rec?;
                    on_seq(&rec.seq())?;
                }
            }
            Self::Fastq { reader, records } => {
                if !records.fill(reader)? {
                    return Ok(false);
                }
                for rec in records.iter() {
                    let rec = rec?;
                    on_seq(&rec.seq())?;
                }
            }
        }
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// MultiplicityReader
// ---------------------------------------------------------------------------

/// Streaming reader for a contig multiplicity file: whitespace-separated
/// floating-point values, one per contig, in contig order.
pub struct MultiplicityReader {
    inner: BufReader<Box<dyn Read + Send>>,
}

impl MultiplicityReader {
    /// Open a (possibly compressed) multiplicity file.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            inner: BufReader::new(open_reader(path)?),
        })
    }

    #[cfg(test)]
    fn from_bytes(bytes: &'static [u8]) -> Self {
        Self {
            inner: BufReader::new(Box::new(bytes)),
        }
    }

    /// Read the next value, or `None` at end of input.
    pub fn next_value(&mut self) -> Result<Option<f64>> {
        let mut token = Vec::new();
        loop {
            let (used, done) = {
                let chunk = self
                    .inner
                    .fill_buf()
                    .context("failed to read multiplicity file")?;
                if chunk.is_empty() {
                    break;
                }
                let mut used = 0;
                let mut done = false;
                for &b in chunk {
                    used += 1;
                    if b.is_ascii_whitespace() {
                        if !token.is_empty() {
                            done = true;
                            break;
                        }
                    } else {
                        token.push(b);
                    }
                }
                (used, done)
            };
            self.inner.consume(used);
            if done {
                break;
            }
        }
        if token.is_empty() {
            return Ok(None);
        }
        let text = std::str::from_utf8(&token).context("multiplicity file is not ASCII")?;
        let value: f64 = text
            .parse()
            .with_context(|| format!("invalid multiplicity value {text:?}"))?;
        Ok(Some(value))
    }
}

// ---------------------------------------------------------------------------
// BinaryReadSource
// ---------------------------------------------------------------------------

/// Streams packed read records (the layout `ReadPackage` writes).
pub struct BinaryReadSource {
    inner: BufReader<Box<dyn Read + Send>>,
    words_per_read: usize,
    record: Vec<u32>,
    bytes: Vec<u8>,
}

impl BinaryReadSource {
    /// Wrap a raw stream of `words_per_read`-word records.
    pub fn new(r: Box<dyn Read + Send>, words_per_read: usize) -> Self {
        Self {
            inner: BufReader::new(r),
            words_per_read,
            record: vec![0; words_per_read],
            bytes: vec![0; words_per_read * 4],
        }
    }

    /// Append up to `max_reads` records into `pkg`.
    ///
    /// Returns `Ok(false)` once the stream is exhausted and nothing was
    /// appended.
    pub fn fill(&mut self, pkg: &mut ReadPackage, max_reads: usize) -> Result<bool> {
        let mut appended = 0;
        while appended < max_reads {
            if !read_exact_or_eof(&mut self.inner, &mut self.bytes)? {
                break;
            }
            for (w, chunk) in self.record.iter_mut().zip(self.bytes.chunks_exact(4)) {
                *w = u32::from_le_bytes(chunk.try_into().unwrap());
            }
            pkg.push_packed(&self.record)?;
            appended += 1;
        }
        Ok(appended > 0)
    }
}

/// Read exactly `buf.len()` bytes, or return `Ok(false)` on clean EOF.
/// A partial record is a corrupt-input error.
fn read_exact_or_eof<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = r
            .read(&mut buf[filled..])
            .context("failed to read packed reads")?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            bail!("packed read input ends mid-record ({filled} trailing bytes)");
        }
        filled += n;
    }
    Ok(true)
}
