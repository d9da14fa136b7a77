use crate::error::{Result, ThesaurusError};

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fmt::Display;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

const BUFFER_SIZE: usize = 1 << 16;

/// Character encoding of input files. Both are read as UTF-8, US-ASCII
/// additionally rejects any byte above 0x7f.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Charset {
    #[default]
    Utf8,
    UsAscii,
}

impl Charset {
    pub fn parse(name: &str) -> Result<Charset> {
        match name.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(Charset::Utf8),
            "us-ascii" | "ascii" => Ok(Charset::UsAscii),
            _ => Err(ThesaurusError::validation(format!("unsupported charset {:?}", name))),
        }
    }

    pub fn check(&self, line: &str) -> Result<()> {
        if *self == Charset::UsAscii && !line.is_ascii() {
            return Err(ThesaurusError::Malformed("non US-ASCII character".into()));
        }
        Ok(())
    }
}

impl Display for Charset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Charset::Utf8 => write!(f, "UTF-8"),
            Charset::UsAscii => write!(f, "US-ASCII"),
        }
    }
}

fn is_gzip(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "gz")
}

/// Open a line reader, decompressing `.gz` files on the fly.
pub fn open_reader(path: &Path) -> Result<Box<dyn BufRead + Send>> {
    let f = File::open(path)?;
    if is_gzip(path) {
        Ok(Box::new(BufReader::with_capacity(
            BUFFER_SIZE,
            MultiGzDecoder::new(f),
        )))
    } else {
        Ok(Box::new(BufReader::with_capacity(BUFFER_SIZE, f)))
    }
}

/// A buffered output file, gzip-compressed when the path ends with `.gz`.
///
/// `finish` must be called to flush the buffers and the gzip trailer, errors
/// on drop are lost.
pub enum OutputFile {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl OutputFile {
    pub fn create(path: &Path) -> Result<OutputFile> {
        let f = BufWriter::with_capacity(BUFFER_SIZE, File::create(path)?);
        if is_gzip(path) {
            Ok(OutputFile::Gzip(GzEncoder::new(f, Compression::default())))
        } else {
            Ok(OutputFile::Plain(f))
        }
    }

    pub fn finish(self) -> Result<()> {
        match self {
            OutputFile::Plain(mut w) => w.flush()?,
            OutputFile::Gzip(w) => w.finish()?.flush()?,
        }
        Ok(())
    }
}

impl Write for OutputFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            OutputFile::Plain(w) => w.write(buf),
            OutputFile::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            OutputFile::Plain(w) => w.flush(),
            OutputFile::Gzip(w) => w.flush(),
        }
    }
}

/// Read a list of strings, one per line, skipping blank lines.
pub fn read_word_list(path: &Path) -> Result<Vec<String>> {
    let mut words = Vec::new();
    for line in open_reader(path)?.lines() {
        let line = line?;
        let word = line.trim_end_matches('\r');
        if !word.is_empty() {
            words.push(word.to_owned());
        }
    }
    Ok(words)
}

pub fn delete(path: &Path) -> Result<()> {
    trace!(file = ?path, "delete");
    fs::remove_file(path)?;
    Ok(())
}

/// Creates uniquely named files in the temporary directory.
///
/// Files are kept on disk until deleted explicitly, a failed run leaves them
/// in place.
#[derive(Debug)]
pub struct TempFiles {
    dir: PathBuf,
    created: AtomicU64,
}

impl TempFiles {
    pub fn new(dir: impl Into<PathBuf>) -> TempFiles {
        TempFiles {
            dir: dir.into(),
            created: AtomicU64::new(0),
        }
    }

    pub fn create(&self, label: &str) -> Result<PathBuf> {
        let (_, path) = tempfile::Builder::new()
            .prefix(&format!("thesaurus-{}-", label))
            .suffix(".tsv")
            .tempfile_in(&self.dir)?
            .keep()
            .map_err(|e| ThesaurusError::Io(e.error))?;
        self.created.fetch_add(1, Ordering::Relaxed);
        Ok(path)
    }

    /// Number of files created so far.
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::tempdir;

    #[test]
    fn gzip_round_trip_by_extension_test() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lines.tsv.gz");

        let mut out = OutputFile::create(&path).unwrap();
        writeln!(out, "apple\t3").unwrap();
        writeln!(out, "pear\t1").unwrap();
        out.finish().unwrap();

        let mut raw = Vec::new();
        File::open(&path).unwrap().read_to_end(&mut raw).unwrap();
        assert_eq!(&raw[..2], &[0x1f, 0x8b]);

        let lines: Vec<String> = open_reader(&path).unwrap().lines().map(|l| l.unwrap()).collect();
        assert_eq!(lines, vec!["apple\t3", "pear\t1"]);
    }

    #[test]
    fn temp_files_are_unique_and_kept_test() {
        let dir = tempdir().unwrap();
        let files = TempFiles::new(dir.path());
        let a = files.create("chunk").unwrap();
        let b = files.create("chunk").unwrap();
        assert_ne!(a, b);
        assert!(a.exists() && b.exists());
        assert_eq!(files.created(), 2);
        delete(&a).unwrap();
        assert!(!a.exists());
    }

    #[test]
    fn word_list_skips_blank_lines_test() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("words.txt");
        fs::write(&path, "apple\n\norange\r\npear").unwrap();
        assert_eq!(read_word_list(&path).unwrap(), vec!["apple", "orange", "pear"]);
    }
}
