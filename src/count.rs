// imports
use crate::chunker::{Chunker, LineEncoder};
use crate::config::{check_distinct, check_input, check_output, CountArgs, Settings};
use crate::enumerator::PairedEnumerating;
use crate::error::{Result, ThesaurusError};
use crate::files_handling::{open_reader, OutputFile, TempFiles};
use crate::pipeline::{ChunkStage, KindHandler, MapTask, Pipeline, PipelineSummary};
use crate::records::{record_order, weight_sum, RecordKind, Token, TokenPair, Weighted};

use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Frequency tables of one chunk of instances.
#[derive(Debug, Default, PartialEq)]
pub struct ChunkCounts {
    pub entries: HashMap<Token, f64>,
    pub features: HashMap<Token, f64>,
    pub events: HashMap<TokenPair, f64>,
}

pub struct Counts {}

impl Counts {

    fn split_instance(line: &str) -> Result<(&str, std::str::Split<'_, char>)> {

        // an instance line is an entry followed by one or more features
        let mut fields = line.split('\t');
        let entry = fields.next().unwrap_or_default();
        if entry.is_empty() || !line.contains('\t') {
            return Err(ThesaurusError::Malformed("expected entry<TAB>feature".into()));
        }
        Ok((entry, fields))
    }

    /// Replaces the strings of an instance line with ids, as the chunker
    /// stores it.
    pub fn encoder(columns: PairedEnumerating) -> LineEncoder {
        Box::new(move |line: &str| {
            let (entry, features) = Counts::split_instance(line)?;
            let mut encoded = columns.entries.decode(entry)?.to_string();
            for feature in features {
                if feature.is_empty() {
                    return Err(ThesaurusError::Malformed("empty feature".into()));
                }
                encoded.push('\t');
                encoded.push_str(&columns.features.decode(feature)?.to_string());
            }
            Ok(encoded)
        })
    }

    fn accumulate(line: &str, counts: &mut ChunkCounts) -> Result<()> {

        let (entry, features) = Counts::split_instance(line)?;
        let entry: Token = entry
            .parse()
            .map_err(|_| ThesaurusError::Malformed(format!("expected integer id, found {:?}", entry)))?;

        // every (entry, feature) observation adds one to all three tables
        for feature in features {
            let feature: Token = feature
                .parse()
                .map_err(|_| ThesaurusError::Malformed(format!("expected integer id, found {:?}", feature)))?;
            *counts.entries.entry(entry).or_insert(0.0) += 1.0;
            *counts.features.entry(feature).or_insert(0.0) += 1.0;
            *counts.events.entry(TokenPair::new(entry, feature)).or_insert(0.0) += 1.0;
        }
        Ok(())
    }

    pub fn count_chunk(chunk: &Path) -> Result<ChunkCounts> {

        let mut counts = ChunkCounts::default();
        for (i, line) in open_reader(chunk)?.lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            Counts::accumulate(&line, &mut counts).map_err(|e| e.at(chunk, i as u64 + 1))?;
        }
        Ok(counts)
    }

    fn write_table<K>(table: HashMap<K, f64>, temp: &TempFiles, label: &str, format: impl Fn(&K) -> String) -> Result<PathBuf> {

        // unsorted, the sort task puts it in order
        let path = temp.create(label)?;
        let mut out = OutputFile::create(&path)?;
        for (key, weight) in table {
            writeln!(out, "{}\t{}", format(&key), weight)?;
        }
        out.finish()?;
        Ok(path)
    }

    /// Count one chunk and write its three unsorted tables.
    pub fn map_chunk(chunk: &Path, temp: &TempFiles) -> Result<Vec<(RecordKind, PathBuf)>> {

        let counts = Counts::count_chunk(chunk)?;
        let entries = Counts::write_table(counts.entries, temp, "entries", |t| t.to_string())?;
        let features = Counts::write_table(counts.features, temp, "features", |t| t.to_string())?;
        let events = Counts::write_table(counts.events, temp, "events", |p| format!("{}\t{}", p.entry, p.feature))?;

        Ok(vec![
            (RecordKind::Entries, entries),
            (RecordKind::Features, features),
            (RecordKind::Events, events),
        ])
    }

    // runs the count in 3 steps -
    // -> validation of the paths
    // -> chunk, count, sort and merge the three tables
    // -> saving of the string indexes

    pub fn run(args: &CountArgs, settings: &Settings) -> Result<PipelineSummary> {

        check_input("input", &args.input)?;
        let mut files = vec![
            ("input", args.input.as_path()),
            ("entries output", args.output_entries.as_path()),
            ("features output", args.output_features.as_path()),
            ("events output", args.output_events.as_path()),
        ];
        files.extend(settings.index_files());
        for (name, path) in &files[1..] {
            check_output(name, path)?;
        }
        check_distinct(&files)?;

        let timer = Instant::now();
        info!("{}", settings);
        info!(input = ?args.input, "counting");

        let columns = settings.paired()?;
        let output = settings.output_paired(&columns);

        let temp = Arc::new(TempFiles::new(&settings.temporary_directory));
        let map: MapTask = Arc::new(Counts::map_chunk);
        let chunker = Chunker::new(&args.input, settings.chunk_size, temp.clone())
            .with_charset(settings.charset)
            .with_encoder(Counts::encoder(columns.clone()));

        let summary = Pipeline::new(temp, settings.threads, ChunkStage::Map(map))
            .handle(
                RecordKind::Entries,
                KindHandler::copy_to::<Weighted<Token>>(
                    record_order(|a: &Token, b: &Token| a.cmp(b)),
                    Some(weight_sum()),
                    &args.output_entries,
                    output.entries.clone(),
                ),
            )
            .handle(
                RecordKind::Features,
                KindHandler::copy_to::<Weighted<Token>>(
                    record_order(|a: &Token, b: &Token| a.cmp(b)),
                    Some(weight_sum()),
                    &args.output_features,
                    output.features.clone(),
                ),
            )
            .handle(
                RecordKind::Events,
                KindHandler::copy_to::<Weighted<TokenPair>>(
                    record_order(TokenPair::entry_order),
                    Some(weight_sum()),
                    &args.output_events,
                    output,
                ),
            )
            .run(chunker)?;

        columns.persist()?;
        columns.close()?;

        info!("finished counting, took {} seconds ...", timer.elapsed().as_secs());
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enumerator::Enumerating;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn counts_toy_chunk_test() {
        let dir = tempdir().unwrap();
        let chunk = dir.path().join("chunk.tsv");
        fs::write(&chunk, "1\t2\n1\t2\t3\n4\t2\n").unwrap();

        let counts = Counts::count_chunk(&chunk).unwrap();
        assert_eq!(counts.entries, HashMap::from([(1, 3.0), (4, 1.0)]));
        assert_eq!(counts.features, HashMap::from([(2, 3.0), (3, 1.0)]));
        assert_eq!(
            counts.events,
            HashMap::from([
                (TokenPair::new(1, 2), 2.0),
                (TokenPair::new(1, 3), 1.0),
                (TokenPair::new(4, 2), 1.0)
            ])
        );
    }

    #[test]
    fn marginals_agree_test() {
        let dir = tempdir().unwrap();
        let chunk = dir.path().join("chunk.tsv");
        fs::write(&chunk, "1\t2\t3\t3\n5\t2\n1\t7\n").unwrap();

        let counts = Counts::count_chunk(&chunk).unwrap();
        let total = |t: &HashMap<_, f64>| t.values().sum::<f64>();
        assert_eq!(total(&counts.entries), 5.0);
        assert_eq!(total(&counts.features), 5.0);
        assert_eq!(counts.events.values().sum::<f64>(), 5.0);
    }

    #[test]
    fn encoder_assigns_ids_in_order_of_appearance_test() {
        let columns = PairedEnumerating::new(
            Enumerating::open(false, None).unwrap(),
            Enumerating::open(false, None).unwrap(),
        );
        let mut encode = Counts::encoder(columns.clone());
        assert_eq!(encode("cat\tpurrs\tsleeps").unwrap(), "1\t1\t2");
        assert_eq!(encode("dog\tsleeps").unwrap(), "2\t2");
        assert!(encode("lonely").is_err());
        assert_eq!(columns.features.encode(2).unwrap(), "sleeps");
    }

    #[test]
    fn rejects_bad_instances_test() {
        let dir = tempdir().unwrap();
        let chunk = dir.path().join("chunk.tsv");
        fs::write(&chunk, "1\t2\nnope\n").unwrap();
        match Counts::count_chunk(&chunk) {
            Err(ThesaurusError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {:?}", other),
        }
    }
}
