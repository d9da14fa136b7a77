//! In-memory sort of one chunk.

use crate::error::Result;
use crate::records::{read_all, Comparator, Record, RecordWriter, Reducer};
use crate::trace_time;

use std::path::Path;
use std::time::Instant;

/// Load `input`, sort it by `order` and write it to `output`, folding equal
/// records with `reducer` when one is given. Both files are compact. Returns
/// the number of records written.
pub fn sort_file<R: Record>(
    input: &Path,
    output: &Path,
    order: &Comparator<R>,
    reducer: Option<&Reducer<R>>,
) -> Result<u64> {
    let start = Instant::now();

    let mut records: Vec<R> = read_all(input, R::compact_columns())?;
    records.sort_by(|a, b| order(a, b));

    let mut writer = RecordWriter::create(output, R::compact_columns())?;
    if let Some(reducer) = reducer {
        writer = writer.reducing(order.clone(), reducer.clone());
    }
    let read = records.len();
    for record in records {
        writer.write(record)?;
    }
    let written = writer.finish()?;

    trace_time!(start, read, written, file = ?input, "sorted chunk");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{record_order, reverse, weight_sum, Token, TokenPair, Weighted};
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn sorts_and_reduces_events_test() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("chunk.tsv");
        let output = dir.path().join("sorted.tsv");
        fs::write(&input, "2\t1\t1\n1\t2\t1\n1\t1\t1\n2\t1\t2\n1\t2\t0.5\n").unwrap();

        let order = record_order(TokenPair::entry_order);
        let written = sort_file::<Weighted<TokenPair>>(&input, &output, &order, Some(&weight_sum())).unwrap();

        assert_eq!(written, 3);
        assert_eq!(fs::read_to_string(&output).unwrap(), "1\t1\t1\n1\t2\t1.5\n2\t1\t3\n");
    }

    #[test]
    fn shuffled_input_comes_out_sorted_test() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("chunk.tsv");
        let output = dir.path().join("sorted.tsv");

        let mut tokens: Vec<Token> = (0..500).collect();
        tokens.shuffle(&mut StdRng::seed_from_u64(7));
        let lines: String = tokens.iter().map(|t| format!("{}\t1\n", t)).collect();
        fs::write(&input, lines).unwrap();

        let order = reverse(record_order(|a: &Token, b: &Token| a.cmp(b)));
        sort_file::<Weighted<Token>>(&input, &output, &order, None).unwrap();

        let sorted: Vec<Weighted<Token>> = read_all(&output, Weighted::<Token>::compact_columns()).unwrap();
        assert_eq!(sorted.len(), 500);
        assert!(sorted.windows(2).all(|w| order(&w[0], &w[1]).is_le()));
        assert_eq!(sorted[0].record, 499);
    }
}
