//! Record shapes, their orders and their TSV encoding.
//!
//! Three record files exist on disk: single tokens with a weight (entries and
//! features), weighted token pairs (events) and weighted entry pairs (sims).
//! All of them are `Weighted<_>` in memory.

use crate::enumerator::{as_paired, Enumerating, PairedEnumerating};
use crate::error::{Result, ThesaurusError};
use crate::files_handling::{open_reader, Charset, OutputFile};

use std::cmp::Ordering;
use std::fmt;
use std::io::{BufRead, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub type Token = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenPair {
    pub entry: Token,
    pub feature: Token,
}

impl TokenPair {
    pub fn new(entry: Token, feature: Token) -> TokenPair {
        TokenPair { entry, feature }
    }

    /// By entry, then by feature.
    pub fn entry_order(a: &TokenPair, b: &TokenPair) -> Ordering {
        a.entry.cmp(&b.entry).then(a.feature.cmp(&b.feature))
    }

    /// By feature, then by entry.
    pub fn feature_order(a: &TokenPair, b: &TokenPair) -> Ordering {
        a.feature.cmp(&b.feature).then(a.entry.cmp(&b.entry))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Weighted<T> {
    pub record: T,
    pub weight: f64,
}

impl<T> Weighted<T> {
    pub fn new(record: T, weight: f64) -> Weighted<T> {
        Weighted { record, weight }
    }
}

pub type Comparator<R> = Arc<dyn Fn(&R, &R) -> Ordering + Send + Sync>;

/// Compares only the payload of weighted records.
pub fn record_order<T: 'static>(
    inner: impl Fn(&T, &T) -> Ordering + Send + Sync + 'static,
) -> Comparator<Weighted<T>> {
    Arc::new(move |a: &Weighted<T>, b: &Weighted<T>| inner(&a.record, &b.record))
}

/// Compares only the weight, ascending.
pub fn weight_order<T: 'static>() -> Comparator<Weighted<T>> {
    Arc::new(|a: &Weighted<T>, b: &Weighted<T>| a.weight.total_cmp(&b.weight))
}

pub fn reverse<R: 'static>(order: Comparator<R>) -> Comparator<R> {
    Arc::new(move |a: &R, b: &R| order(b, a))
}

/// `first`, with ties broken by `second`.
pub fn fallback<R: 'static>(first: Comparator<R>, second: Comparator<R>) -> Comparator<R> {
    Arc::new(move |a: &R, b: &R| first(a, b).then_with(|| second(a, b)))
}

/// Folds the second of two equal-keyed records into the first.
pub type Reducer<R> = Arc<dyn Fn(&mut R, R) + Send + Sync>;

pub fn weight_sum<T: 'static>() -> Reducer<Weighted<T>> {
    Arc::new(|into: &mut Weighted<T>, other: Weighted<T>| into.weight += other.weight)
}

/// The record files a pipeline can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, clap::ValueEnum)]
pub enum RecordKind {
    Entries,
    Features,
    Events,
    Sims,
}

impl RecordKind {
    pub fn name(&self) -> &'static str {
        match self {
            RecordKind::Entries => "entries",
            RecordKind::Features => "features",
            RecordKind::Events => "events",
            RecordKind::Sims => "sims",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A record that can be read from and written to one TSV line.
pub trait Record: Sized + Send + 'static {
    /// How each column is encoded.
    type Columns: Clone + Send + Sync + 'static;

    /// Columns of temporary files: every column is an integer id.
    fn compact_columns() -> Self::Columns;

    fn parse(line: &str, columns: &Self::Columns) -> Result<Self>;

    fn format(&self, columns: &Self::Columns) -> Result<String>;
}

fn parse_weight(field: &str) -> Result<f64> {
    field
        .parse::<f64>()
        .map_err(|_| ThesaurusError::Malformed(format!("bad weight {:?}", field)))
}

fn fields<const N: usize>(line: &str) -> Result<[&str; N]> {
    let mut out = [""; N];
    let mut parts = line.split('\t');
    for slot in out.iter_mut() {
        *slot = parts
            .next()
            .ok_or_else(|| ThesaurusError::Malformed(format!("expected {} fields", N)))?;
    }
    if parts.next().is_some() {
        return Err(ThesaurusError::Malformed(format!("expected {} fields", N)));
    }
    Ok(out)
}

impl Record for Weighted<Token> {
    type Columns = Enumerating;

    fn compact_columns() -> Enumerating {
        Enumerating::compact()
    }

    fn parse(line: &str, columns: &Enumerating) -> Result<Self> {
        let [token, weight] = fields::<2>(line)?;
        Ok(Weighted::new(columns.decode(token)?, parse_weight(weight)?))
    }

    fn format(&self, columns: &Enumerating) -> Result<String> {
        Ok(format!("{}\t{}", columns.encode(self.record)?, self.weight))
    }
}

impl Record for Weighted<TokenPair> {
    type Columns = PairedEnumerating;

    fn compact_columns() -> PairedEnumerating {
        PairedEnumerating::compact()
    }

    fn parse(line: &str, columns: &PairedEnumerating) -> Result<Self> {
        let [entry, feature, weight] = fields::<3>(line)?;
        Ok(Weighted::new(
            TokenPair::new(columns.entries.decode(entry)?, columns.features.decode(feature)?),
            parse_weight(weight)?,
        ))
    }

    fn format(&self, columns: &PairedEnumerating) -> Result<String> {
        Ok(format!(
            "{}\t{}\t{}",
            columns.entries.encode(self.record.entry)?,
            columns.features.encode(self.record.feature)?,
            self.weight
        ))
    }
}

/// Sims rows are entry pairs: both columns use the entry id space.
pub fn sims_columns(entries: &Enumerating) -> PairedEnumerating {
    as_paired(entries)
}

/// Iterates the records of one file, skipping blank lines. Parse failures
/// carry the file and line number.
pub struct RecordReader<R: Record> {
    path: PathBuf,
    lines: std::io::Lines<Box<dyn BufRead + Send>>,
    line: u64,
    columns: R::Columns,
    charset: Charset,
    _record: PhantomData<R>,
}

impl<R: Record> RecordReader<R> {
    pub fn open(path: &Path, columns: R::Columns) -> Result<RecordReader<R>> {
        Ok(RecordReader {
            path: path.to_path_buf(),
            lines: open_reader(path)?.lines(),
            line: 0,
            columns,
            charset: Charset::default(),
            _record: PhantomData,
        })
    }

    pub fn with_charset(mut self, charset: Charset) -> RecordReader<R> {
        self.charset = charset;
        self
    }
}

impl<R: Record> Iterator for RecordReader<R> {
    type Item = Result<R>;

    fn next(&mut self) -> Option<Result<R>> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            self.line += 1;
            if line.is_empty() {
                continue;
            }
            let record = self.charset.check(&line).and_then(|_| R::parse(&line, &self.columns));
            return Some(record.map_err(|e| e.at(&self.path, self.line)));
        }
    }
}

/// Writes records, optionally folding runs of equal records into one.
pub struct RecordWriter<R: Record> {
    out: OutputFile,
    columns: R::Columns,
    reduce: Option<(Comparator<R>, Reducer<R>)>,
    pending: Option<R>,
    written: u64,
}

impl<R: Record> RecordWriter<R> {
    pub fn create(path: &Path, columns: R::Columns) -> Result<RecordWriter<R>> {
        Ok(RecordWriter {
            out: OutputFile::create(path)?,
            columns,
            reduce: None,
            pending: None,
            written: 0,
        })
    }

    /// Records comparing equal under `order` are combined with `reducer`
    /// before being written. Only consecutive records are combined.
    pub fn reducing(mut self, order: Comparator<R>, reducer: Reducer<R>) -> RecordWriter<R> {
        self.reduce = Some((order, reducer));
        self
    }

    pub fn write(&mut self, record: R) -> Result<()> {
        let Some((order, reducer)) = &self.reduce else {
            return self.emit(record);
        };
        if let Some(pending) = self.pending.as_mut() {
            if order(pending, &record) == Ordering::Equal {
                reducer(pending, record);
                return Ok(());
            }
        }
        match self.pending.replace(record) {
            Some(previous) => self.emit(previous),
            None => Ok(()),
        }
    }

    fn emit(&mut self, record: R) -> Result<()> {
        let line = record.format(&self.columns)?;
        writeln!(self.out, "{}", line)?;
        self.written += 1;
        Ok(())
    }

    /// Flush everything and return the number of lines written.
    pub fn finish(mut self) -> Result<u64> {
        if let Some(pending) = self.pending.take() {
            self.emit(pending)?;
        }
        self.out.finish()?;
        Ok(self.written)
    }
}

/// Read every record of `path` into memory.
pub fn read_all<R: Record>(path: &Path, columns: R::Columns) -> Result<Vec<R>> {
    RecordReader::<R>::open(path, columns)?.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn event(e: Token, f: Token, w: f64) -> Weighted<TokenPair> {
        Weighted::new(TokenPair::new(e, f), w)
    }

    #[test]
    fn pair_orders_test() {
        let a = TokenPair::new(1, 5);
        let b = TokenPair::new(2, 3);
        assert_eq!(TokenPair::entry_order(&a, &b), Ordering::Less);
        assert_eq!(TokenPair::feature_order(&a, &b), Ordering::Greater);
        assert_eq!(TokenPair::entry_order(&a, &a), Ordering::Equal);
    }

    #[test]
    fn composed_orders_test() {
        let by_entry_then_heaviest = fallback(
            record_order(|a: &TokenPair, b: &TokenPair| a.entry.cmp(&b.entry)),
            reverse(weight_order()),
        );
        let mut events = vec![event(2, 0, 1.0), event(1, 7, 0.5), event(1, 3, 2.0)];
        events.sort_by(|a, b| by_entry_then_heaviest(a, b));
        assert_eq!(events, vec![event(1, 3, 2.0), event(1, 7, 0.5), event(2, 0, 1.0)]);
    }

    #[test]
    fn weights_print_without_trailing_zeros_test() {
        let columns = PairedEnumerating::compact();
        assert_eq!(event(3, 4, 3.0).format(&columns).unwrap(), "3\t4\t3");
        assert_eq!(event(3, 4, 0.25).format(&columns).unwrap(), "3\t4\t0.25");
    }

    #[test]
    fn verbose_and_compact_columns_test() {
        let entries = Enumerating::open(false, None).unwrap();
        let token = Weighted::<Token>::parse("apple\t4", &entries).unwrap();
        assert_eq!(token.weight, 4.0);
        assert_eq!(token.format(&entries).unwrap(), "apple\t4");
        assert_eq!(
            token.format(&Enumerating::compact()).unwrap(),
            format!("{}\t4", token.record)
        );
    }

    #[test]
    fn malformed_lines_are_rejected_test() {
        let columns = PairedEnumerating::compact();
        assert!(Weighted::<TokenPair>::parse("1\t2", &columns).is_err());
        assert!(Weighted::<TokenPair>::parse("1\t2\t3\t4", &columns).is_err());
        assert!(Weighted::<TokenPair>::parse("1\t2\tmany", &columns).is_err());
        assert!(Weighted::<TokenPair>::parse("x\t2\t1", &columns).is_err());
    }

    #[test]
    fn reader_reports_location_and_skips_blanks_test() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.tsv");
        fs::write(&path, "1\t2\t3\n\n4\t5\n").unwrap();

        let mut reader = RecordReader::<Weighted<TokenPair>>::open(&path, PairedEnumerating::compact()).unwrap();
        assert_eq!(reader.next().unwrap().unwrap(), event(1, 2, 3.0));
        match reader.next().unwrap() {
            Err(ThesaurusError::Parse { line, .. }) => assert_eq!(line, 3),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn writer_reduces_consecutive_duplicates_test() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.tsv");

        let mut writer = RecordWriter::create(&path, PairedEnumerating::compact())
            .unwrap()
            .reducing(record_order(TokenPair::entry_order), weight_sum());
        for e in [event(1, 1, 1.0), event(1, 1, 2.0), event(1, 2, 1.0), event(1, 1, 1.0)] {
            writer.write(e).unwrap();
        }
        assert_eq!(writer.finish().unwrap(), 3);
        assert_eq!(fs::read_to_string(&path).unwrap(), "1\t1\t3\n1\t2\t1\n1\t1\t1\n");
    }
}
