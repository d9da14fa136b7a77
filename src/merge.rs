//! Two-way merge of sorted record files and the per-kind merge queue.

use crate::error::{Result, ThesaurusError};
use crate::files_handling::Charset;
use crate::records::{Comparator, Record, RecordReader, RecordWriter, Reducer};
use crate::trace_time;

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::iter::Peekable;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Column encodings used to read the two inputs and write the output.
pub struct MergeColumns<R: Record> {
    pub read: R::Columns,
    pub write: R::Columns,
    pub charset: Charset,
}

impl<R: Record> MergeColumns<R> {
    pub fn compact() -> MergeColumns<R> {
        MergeColumns {
            read: R::compact_columns(),
            write: R::compact_columns(),
            charset: Charset::default(),
        }
    }
}

/// Merge two files sorted by `order` into `output`.
///
/// On a tie both heads are folded into one record with `reducer`, or emitted
/// `a` first when there is none. Inputs are not checked for sortedness.
pub fn merge_files<R: Record>(
    a: &Path,
    b: &Path,
    output: &Path,
    columns: MergeColumns<R>,
    order: &Comparator<R>,
    reducer: Option<&Reducer<R>>,
) -> Result<u64> {
    let start = Instant::now();

    let mut left = RecordReader::<R>::open(a, columns.read.clone())?.with_charset(columns.charset).peekable();
    let mut right = RecordReader::<R>::open(b, columns.read)?.with_charset(columns.charset).peekable();
    let mut writer = RecordWriter::create(output, columns.write)?;

    loop {
        let step = match (left.peek(), right.peek()) {
            (None, None) => break,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(Err(_)), _) => Ordering::Less,
            (_, Some(Err(_))) => Ordering::Greater,
            (Some(Ok(x)), Some(Ok(y))) => order(x, y),
        };
        match (step, reducer) {
            (Ordering::Less, _) => writer.write(take(&mut left)?)?,
            (Ordering::Greater, _) => writer.write(take(&mut right)?)?,
            (Ordering::Equal, Some(reducer)) => {
                let mut merged = take(&mut left)?;
                reducer(&mut merged, take(&mut right)?);
                writer.write(merged)?;
            }
            (Ordering::Equal, None) => {
                writer.write(take(&mut left)?)?;
                writer.write(take(&mut right)?)?;
            }
        }
    }

    let written = writer.finish()?;
    trace_time!(start, written, "merged");
    Ok(written)
}

fn take<R: Record>(input: &mut Peekable<RecordReader<R>>) -> Result<R> {
    match input.next() {
        Some(record) => record,
        None => Err(ThesaurusError::Internal("merge input drained early".into())),
    }
}

/// FIFO of sorted files of one record kind.
///
/// Pushing a file pairs off the two oldest files as soon as there are two,
/// so merges follow arrival order rather than file size.
#[derive(Debug, Default)]
pub struct MergeQueue {
    files: VecDeque<PathBuf>,
}

impl MergeQueue {
    pub fn push(&mut self, file: PathBuf) -> Option<(PathBuf, PathBuf)> {
        self.files.push_back(file);
        if self.files.len() >= 2 {
            let a = self.files.pop_front()?;
            let b = self.files.pop_front()?;
            return Some((a, b));
        }
        None
    }

    /// What is left once nothing more will arrive.
    pub fn into_files(self) -> Vec<PathBuf> {
        self.files.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{record_order, weight_sum, Token, Weighted};
    use std::fs;
    use tempfile::tempdir;

    fn token_order() -> Comparator<Weighted<Token>> {
        record_order(|a: &Token, b: &Token| a.cmp(b))
    }

    #[test]
    fn merge_interleaves_and_reduces_ties_test() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.tsv");
        let b = dir.path().join("b.tsv");
        let out = dir.path().join("out.tsv");
        fs::write(&a, "1\t1\n3\t2\n5\t1\n").unwrap();
        fs::write(&b, "2\t4\n3\t1\n6\t1\n").unwrap();

        let written = merge_files::<Weighted<Token>>(
            &a,
            &b,
            &out,
            MergeColumns::compact(),
            &token_order(),
            Some(&weight_sum()),
        )
        .unwrap();

        assert_eq!(written, 5);
        assert_eq!(fs::read_to_string(&out).unwrap(), "1\t1\n2\t4\n3\t3\n5\t1\n6\t1\n");
    }

    #[test]
    fn merge_without_reducer_keeps_both_test() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.tsv");
        let b = dir.path().join("b.tsv");
        let out = dir.path().join("out.tsv");
        fs::write(&a, "3\t2\n").unwrap();
        fs::write(&b, "").unwrap();

        merge_files::<Weighted<Token>>(&a, &b, &out, MergeColumns::compact(), &token_order(), None).unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap(), "3\t2\n");

        fs::write(&b, "3\t5\n").unwrap();
        merge_files::<Weighted<Token>>(&a, &b, &out, MergeColumns::compact(), &token_order(), None).unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap(), "3\t2\n3\t5\n");
    }

    #[test]
    fn merge_reports_malformed_input_test() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.tsv");
        let b = dir.path().join("b.tsv");
        fs::write(&a, "1\t1\nnope\n").unwrap();
        fs::write(&b, "2\t1\n").unwrap();

        let result = merge_files::<Weighted<Token>>(
            &a,
            &b,
            &dir.path().join("out.tsv"),
            MergeColumns::compact(),
            &token_order(),
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn queue_pairs_the_two_oldest_test() {
        let mut queue = MergeQueue::default();
        assert_eq!(queue.push("a".into()), None);
        assert_eq!(queue.push("b".into()), Some(("a".into(), "b".into())));
        assert_eq!(queue.push("c".into()), None);
        assert_eq!(queue.push("ab".into()), Some(("c".into(), "ab".into())));
        assert_eq!(queue.push("abc".into()), None);
        assert_eq!(queue.into_files(), vec![PathBuf::from("abc")]);
    }
}
