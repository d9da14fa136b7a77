use crate::allpairs::AllPairs;
use crate::chunker::{record_encoder, Chunker};
use crate::config::{check_distinct, check_input, check_output, Cli, Command, Config, MergeArgs, Settings, SortArgs};
use crate::count::Counts;
use crate::enumerator::as_paired;
use crate::error::{Result, ThesaurusError};
use crate::files_handling::TempFiles;
use crate::filter::Filter;
use crate::knn::{sims_order, Knn};
use crate::merge::{merge_files, MergeColumns};
use crate::pipeline::{ChunkStage, KindHandler, Pipeline};
use crate::records::{
    record_order, reverse, sims_columns, weight_sum, Comparator, Record, RecordKind, Reducer, Token, TokenPair,
    Weighted,
};

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Order and reducer of one record kind as `sort` and `merge` use them.
struct KindRules<R: Record> {
    order: Comparator<R>,
    reducer: Option<Reducer<R>>,
}

impl<R: Record> KindRules<R> {
    fn new(order: Comparator<R>, reducer: Option<Reducer<R>>, reversed: bool) -> KindRules<R> {
        let order = if reversed { reverse(order) } else { order };
        KindRules { order, reducer }
    }
}

fn token_rules(reversed: bool) -> KindRules<Weighted<Token>> {
    KindRules::new(record_order(|a: &Token, b: &Token| a.cmp(b)), Some(weight_sum()), reversed)
}

fn event_rules(reversed: bool) -> KindRules<Weighted<TokenPair>> {
    KindRules::new(record_order(TokenPair::entry_order), Some(weight_sum()), reversed)
}

fn sims_rules(reversed: bool) -> KindRules<Weighted<TokenPair>> {
    KindRules::new(sims_order(), None, reversed)
}

/// Verbose columns of a merge need the index file both inputs were sorted
/// with, otherwise ids follow reading order and the output is not sorted.
fn check_merge_indexes(kind: RecordKind, settings: &Settings) -> Result<()> {
    let (entries, features) = match kind {
        RecordKind::Entries | RecordKind::Sims => (true, false),
        RecordKind::Features => (false, true),
        RecordKind::Events => (true, true),
    };
    if entries && !settings.preindexed_entries && settings.entries_index_file.is_none() {
        return Err(ThesaurusError::validation(format!(
            "merging {} with string entries needs --entries-index-file",
            kind
        )));
    }
    if features && !settings.preindexed_features && settings.features_index_file.is_none() {
        return Err(ThesaurusError::validation(format!(
            "merging {} with string features needs --features-index-file",
            kind
        )));
    }
    Ok(())
}

pub struct Run {}

impl Run {

    // runs one command -
    // -> defaults from the config file
    // -> settings of the command, flags first
    // -> the command itself

    pub fn run(cli: &Cli) -> Result<()> {

        let timer = Instant::now();
        let config = Config::new(cli.config.as_deref())?;

        match &cli.command {
            Command::Count(args) => {
                let settings = Settings::resolve(&args.common, &config)?;
                Counts::run(args, &settings)?;
            }
            Command::Filter(args) => {
                let settings = Settings::resolve(&args.common, &config)?;
                Filter::run(args, &settings)?;
            }
            Command::Sort(args) => {
                let settings = Settings::resolve(&args.common, &config)?;
                Run::sort(args, &settings)?;
            }
            Command::Merge(args) => {
                let settings = Settings::resolve(&args.common, &config)?;
                Run::merge(args, &settings)?;
            }
            Command::Allpairs(args) => {
                let settings = Settings::resolve(&args.common, &config)?;
                AllPairs::run(args, &settings)?;
            }
            Command::Knn(args) => {
                let settings = Settings::resolve(&args.common, &config)?;
                Knn::run(args, &settings)?;
            }
        }

        info!("done, took {} seconds", timer.elapsed().as_secs());
        Ok(())
    }

    fn sort_records<R: Record>(
        args: &SortArgs,
        settings: &Settings,
        rules: KindRules<R>,
        read: R::Columns,
        write: R::Columns,
    ) -> Result<u64> {
        let temp = Arc::new(TempFiles::new(&settings.temporary_directory));
        let chunker = Chunker::new(&args.input, settings.chunk_size, temp.clone())
            .with_charset(settings.charset)
            .with_encoder(record_encoder::<R>(read));
        let summary = Pipeline::new(temp, settings.threads, ChunkStage::Sort(args.kind))
            .handle(args.kind, KindHandler::copy_to::<R>(rules.order, rules.reducer, &args.output, write))
            .run(chunker)?;
        Ok(summary.records.get(&args.kind).copied().unwrap_or(0))
    }

    /// External sort of one record file.
    pub fn sort(args: &SortArgs, settings: &Settings) -> Result<u64> {

        check_input("input", &args.input)?;
        check_output("output", &args.output)?;
        let mut files = vec![("input", args.input.as_path()), ("output", args.output.as_path())];
        for (name, path) in settings.index_files() {
            check_output(name, path)?;
            files.push((name, path));
        }
        check_distinct(&files)?;

        info!("{}", settings);
        info!(input = ?args.input, kind = %args.kind, reverse = args.reverse, "sorting");

        let written = match args.kind {
            RecordKind::Entries | RecordKind::Features => {
                let column = if args.kind == RecordKind::Entries {
                    settings.entries()?
                } else {
                    settings.features()?
                };
                let written = Run::sort_records::<Weighted<Token>>(
                    args,
                    settings,
                    token_rules(args.reverse),
                    column.clone(),
                    settings.output_column(&column),
                )?;
                column.persist()?;
                written
            }
            RecordKind::Events => {
                let columns = settings.paired()?;
                let written = Run::sort_records::<Weighted<TokenPair>>(
                    args,
                    settings,
                    event_rules(args.reverse),
                    columns.clone(),
                    settings.output_paired(&columns),
                )?;
                columns.persist()?;
                written
            }
            RecordKind::Sims => {
                let entries = settings.entries()?;
                let written = Run::sort_records::<Weighted<TokenPair>>(
                    args,
                    settings,
                    sims_rules(args.reverse),
                    sims_columns(&entries),
                    as_paired(&settings.output_column(&entries)),
                )?;
                entries.persist()?;
                written
            }
        };

        info!(records = written, "sorted");
        Ok(written)
    }

    /// One two-way merge of two sorted files. Verbose columns are read with
    /// the index files the inputs were sorted with.
    pub fn merge(args: &MergeArgs, settings: &Settings) -> Result<u64> {

        check_input("first input", &args.input_a)?;
        check_input("second input", &args.input_b)?;
        check_output("output", &args.output)?;
        let mut files = vec![
            ("first input", args.input_a.as_path()),
            ("second input", args.input_b.as_path()),
            ("output", args.output.as_path()),
        ];
        for (name, path) in settings.index_files() {
            check_output(name, path)?;
            files.push((name, path));
        }
        check_distinct(&files)?;
        check_merge_indexes(args.kind, settings)?;

        info!("{}", settings);
        info!(a = ?args.input_a, b = ?args.input_b, kind = %args.kind, "merging");

        let (a, b, output) = (args.input_a.as_path(), args.input_b.as_path(), args.output.as_path());
        let charset = settings.charset;
        let written = match args.kind {
            RecordKind::Entries | RecordKind::Features => {
                let column = if args.kind == RecordKind::Entries {
                    settings.entries()?
                } else {
                    settings.features()?
                };
                let columns = MergeColumns {
                    read: column.clone(),
                    write: settings.output_column(&column),
                    charset,
                };
                let written = merge_with(a, b, output, columns, token_rules(args.reverse))?;
                column.persist()?;
                written
            }
            RecordKind::Events => {
                let paired = settings.paired()?;
                let columns = MergeColumns {
                    read: paired.clone(),
                    write: settings.output_paired(&paired),
                    charset,
                };
                let written = merge_with(a, b, output, columns, event_rules(args.reverse))?;
                paired.persist()?;
                written
            }
            RecordKind::Sims => {
                let entries = settings.entries()?;
                let columns = MergeColumns {
                    read: sims_columns(&entries),
                    write: as_paired(&settings.output_column(&entries)),
                    charset,
                };
                let written = merge_with(a, b, output, columns, sims_rules(args.reverse))?;
                entries.persist()?;
                written
            }
        };

        info!(records = written, "merged");
        Ok(written)
    }
}

fn merge_with<R: Record>(a: &Path, b: &Path, output: &Path, columns: MergeColumns<R>, rules: KindRules<R>) -> Result<u64> {
    merge_files::<R>(a, b, output, columns, &rules.order, rules.reducer.as_ref())
}
