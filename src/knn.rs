//! Nearest neighbours of a sims file: sort it out of core, then keep the
//! first k rows of every entry.

use crate::chunker::{record_encoder, Chunker};
use crate::config::{check_distinct, check_input, check_k, check_output, KnnArgs, Settings};
use crate::enumerator::PairedEnumerating;
use crate::error::Result;
use crate::files_handling::TempFiles;
use crate::pipeline::{ChunkStage, KindHandler, Pipeline};
use crate::records::{
    fallback, record_order, reverse, sims_columns, weight_order, Comparator, Record, RecordReader, RecordKind,
    RecordWriter, TokenPair, Weighted,
};

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Entry ascending, score descending, neighbour ascending.
pub fn sims_order() -> Comparator<Weighted<TokenPair>> {
    fallback(
        fallback(
            record_order(|a: &TokenPair, b: &TokenPair| a.entry.cmp(&b.entry)),
            reverse(weight_order()),
        ),
        record_order(|a: &TokenPair, b: &TokenPair| a.feature.cmp(&b.feature)),
    )
}

/// Writes the first `k` records of each entry of a sorted compact sims file.
pub fn keep_nearest(from: Option<&Path>, to: &Path, k: usize, columns: PairedEnumerating) -> Result<u64> {
    let mut writer = RecordWriter::<Weighted<TokenPair>>::create(to, columns)?;
    let Some(from) = from else {
        return writer.finish();
    };

    let mut current = None;
    let mut kept = 0;
    for sim in RecordReader::<Weighted<TokenPair>>::open(from, Weighted::<TokenPair>::compact_columns())? {
        let sim = sim?;
        if current != Some(sim.record.entry) {
            current = Some(sim.record.entry);
            kept = 0;
        }
        if kept < k {
            writer.write(sim)?;
            kept += 1;
        }
    }
    writer.finish()
}

pub struct Knn {}

impl Knn {

    pub fn run(args: &KnnArgs, settings: &Settings) -> Result<u64> {

        check_input("input", &args.input)?;
        check_output("output", &args.output)?;
        check_k(args.k)?;
        let mut files = vec![("input", args.input.as_path()), ("output", args.output.as_path())];
        for (name, path) in settings.index_files() {
            check_output(name, path)?;
            files.push((name, path));
        }
        check_distinct(&files)?;

        let timer = Instant::now();
        info!("{}", settings);

        // both columns of a sims file are entries
        let entries = settings.entries()?;
        let output = settings.output_column(&entries);
        let (k, output_path, output_columns) = (args.k, args.output.clone(), sims_columns(&output));

        let temp = Arc::new(TempFiles::new(&settings.temporary_directory));
        let chunker = Chunker::new(&args.input, settings.chunk_size, temp.clone())
            .with_charset(settings.charset)
            .with_encoder(record_encoder::<Weighted<TokenPair>>(sims_columns(&entries)));

        let summary = Pipeline::new(temp, settings.threads, ChunkStage::Sort(RecordKind::Sims))
            .handle(
                RecordKind::Sims,
                KindHandler::new::<Weighted<TokenPair>>(
                    sims_order(),
                    None,
                    Box::new(move |survivor: Option<&Path>| keep_nearest(survivor, &output_path, k, output_columns)),
                ),
            )
            .run(chunker)?;

        entries.persist()?;
        entries.close()?;

        let written = summary.records.get(&RecordKind::Sims).copied().unwrap_or(0);
        info!(sims = written, "finished knn, took {} seconds ...", timer.elapsed().as_secs());
        Ok(written)
    }
}
