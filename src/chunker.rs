//! Splits an input file into bounded chunk files.
//!
//! The chunker is the only sequential reader of the input. It runs on its own
//! thread and hands chunk paths to the orchestrator through a small bounded
//! queue, so it blocks once a couple of chunks are waiting.

use crate::error::{Result, ThesaurusError};
use crate::files_handling::{open_reader, Charset, OutputFile, TempFiles};
use crate::records::Record;

use crossbeam::channel::{bounded, Receiver, Sender};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

pub const CHUNK_QUEUE_CAPACITY: usize = 2;

/// Rewrites one input line before it is stored in a chunk, typically
/// replacing strings with enumerator ids.
pub type LineEncoder = Box<dyn FnMut(&str) -> Result<String> + Send>;

/// Parses each line as a record with `columns` and stores it compact.
pub fn record_encoder<R: Record>(columns: R::Columns) -> LineEncoder {
    let compact = R::compact_columns();
    Box::new(move |line: &str| R::parse(line, &columns)?.format(&compact))
}

pub struct Chunker {
    input: PathBuf,
    max_lines: usize,
    temp: Arc<TempFiles>,
    charset: Charset,
    encoder: Option<LineEncoder>,
}

/// The running chunk producer.
pub struct ProducerHandle {
    thread: JoinHandle<Result<u64>>,
}

impl ProducerHandle {
    /// Wait for the producer and return the number of chunks it wrote.
    pub fn join(self) -> Result<u64> {
        self.thread
            .join()
            .map_err(|_| ThesaurusError::Internal("chunk producer panicked".into()))?
    }
}

impl Chunker {
    pub fn new(input: &Path, max_lines: usize, temp: Arc<TempFiles>) -> Chunker {
        Chunker {
            input: input.to_path_buf(),
            max_lines: max_lines.max(1),
            temp,
            charset: Charset::default(),
            encoder: None,
        }
    }

    pub fn with_charset(mut self, charset: Charset) -> Chunker {
        self.charset = charset;
        self
    }

    pub fn with_encoder(mut self, encoder: LineEncoder) -> Chunker {
        self.encoder = Some(encoder);
        self
    }

    /// Start producing chunks on a dedicated thread.
    pub fn spawn(self) -> Result<(Receiver<PathBuf>, ProducerHandle)> {
        let (sender, receiver) = bounded(CHUNK_QUEUE_CAPACITY);
        let thread = thread::Builder::new()
            .name("chunker".into())
            .spawn(move || self.produce(sender))?;
        Ok((receiver, ProducerHandle { thread }))
    }

    fn produce(mut self, sender: Sender<PathBuf>) -> Result<u64> {
        info!(input = ?self.input, max_lines = self.max_lines, "chunking");
        let reader = open_reader(&self.input)?;

        let mut current: Option<(PathBuf, OutputFile)> = None;
        let mut lines_in_chunk = 0;
        let mut chunks = 0;

        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            self.charset.check(&line).map_err(|e| e.at(&self.input, i as u64 + 1))?;
            let line = match self.encoder.as_mut() {
                Some(encode) => encode(&line).map_err(|e| e.at(&self.input, i as u64 + 1))?,
                None => line,
            };

            if current.is_none() {
                let path = self.temp.create("chunk")?;
                let out = OutputFile::create(&path)?;
                current = Some((path, out));
            }
            if let Some((_, out)) = current.as_mut() {
                writeln!(out, "{}", line)?;
                lines_in_chunk += 1;
            }

            if lines_in_chunk == self.max_lines {
                if let Some((path, out)) = current.take() {
                    out.finish()?;
                    chunks += 1;
                    lines_in_chunk = 0;
                    if !hand_over(&sender, path) {
                        return Ok(chunks);
                    }
                }
            }
        }

        // last partial chunk
        if let Some((path, out)) = current.take() {
            out.finish()?;
            chunks += 1;
            hand_over(&sender, path);
        }

        debug!(chunks, "chunking done");
        Ok(chunks)
    }
}

/// Blocks while the queue is full. Returns false once nobody is listening.
fn hand_over(sender: &Sender<PathBuf>, chunk: PathBuf) -> bool {
    match sender.send(chunk) {
        Ok(()) => true,
        Err(_) => {
            debug!("chunk consumer gone, stopping");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn chunk_contents(input: &str, max_lines: usize, encoder: Option<LineEncoder>) -> Vec<String> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("input.tsv");
        fs::write(&path, input).unwrap();

        let mut chunker = Chunker::new(&path, max_lines, Arc::new(TempFiles::new(dir.path())));
        if let Some(encoder) = encoder {
            chunker = chunker.with_encoder(encoder);
        }
        let (chunks, producer) = chunker.spawn().unwrap();
        let contents: Vec<String> = chunks.iter().map(|c| fs::read_to_string(c).unwrap()).collect();
        assert_eq!(producer.join().unwrap(), contents.len() as u64);
        contents
    }

    #[test]
    fn splits_by_line_count_test() {
        let chunks = chunk_contents("a\tx\nb\ty\n\nc\tz\nd\tw\ne\tv\n", 2, None);
        assert_eq!(chunks, vec!["a\tx\nb\ty\n", "c\tz\nd\tw\n", "e\tv\n"]);
    }

    #[test]
    fn empty_input_has_no_chunks_test() {
        assert!(chunk_contents("", 10, None).is_empty());
        assert!(chunk_contents("\n\n", 10, None).is_empty());
    }

    #[test]
    fn lines_go_through_the_encoder_test() {
        let encoder: LineEncoder = Box::new(|line: &str| Ok(line.to_uppercase()));
        assert_eq!(chunk_contents("ab\ncd\n", 5, Some(encoder)), vec!["AB\nCD\n"]);
    }

    #[test]
    fn encoder_failure_stops_the_producer_test() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("input.tsv");
        fs::write(&path, "ok\nbad\n").unwrap();

        let encoder: LineEncoder = Box::new(|line: &str| {
            if line == "bad" {
                Err(ThesaurusError::Malformed("bad line".into()))
            } else {
                Ok(line.to_owned())
            }
        });
        let (chunks, producer) = Chunker::new(&path, 1, Arc::new(TempFiles::new(dir.path())))
            .with_encoder(encoder)
            .spawn()
            .unwrap();
        assert_eq!(chunks.iter().count(), 1);
        match producer.join() {
            Err(ThesaurusError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn ascii_charset_rejects_other_characters_test() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("input.tsv");
        fs::write(&path, "cat\tpurrs\ncaf\u{e9}\tserves\n").unwrap();

        let (chunks, producer) = Chunker::new(&path, 10, Arc::new(TempFiles::new(dir.path())))
            .with_charset(Charset::UsAscii)
            .spawn()
            .unwrap();
        assert_eq!(chunks.iter().count(), 0);
        match producer.join() {
            Err(ThesaurusError::Parse { line, reason, .. }) => {
                assert_eq!(line, 2);
                assert!(reason.contains("US-ASCII"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
