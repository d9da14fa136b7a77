// imports
use crate::chunker::Chunker;
use crate::error::{Result, ThesaurusError};
use crate::files_handling::{delete, TempFiles};
use crate::merge::{merge_files, MergeColumns, MergeQueue};
use crate::records::{Comparator, Record, RecordReader, RecordKind, RecordWriter, Reducer};
use crate::scheduler::Scheduler;
use crate::sort::sort_file;

use crossbeam::channel::{never, select};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Turns one chunk into unsorted record files, one per kind.
pub type MapTask = Arc<dyn Fn(&Path, &TempFiles) -> Result<Vec<(RecordKind, PathBuf)>> + Send + Sync>;

type SortTask = Arc<dyn Fn(&Path, &Path) -> Result<u64> + Send + Sync>;
type MergeTask = Arc<dyn Fn(&Path, &Path, &Path) -> Result<u64> + Send + Sync>;

/// Writes the user-visible output from the surviving compact file, `None`
/// when the input held no records of this kind.
pub type FinishTask = Box<dyn FnOnce(Option<&Path>) -> Result<u64> + Send>;

/// What happens to each chunk the chunker produces.
pub enum ChunkStage {
    /// The chunk already holds records of this kind.
    Sort(RecordKind),
    /// The chunk holds raw input that a map task turns into records.
    Map(MapTask),
}

/// How one record kind is sorted, merged and finally written out.
pub struct KindHandler {
    sort: SortTask,
    merge: MergeTask,
    finish: FinishTask,
}

impl KindHandler {
    pub fn new<R: Record>(order: Comparator<R>, reducer: Option<Reducer<R>>, finish: FinishTask) -> KindHandler {
        let (sort_order, sort_reducer) = (order.clone(), reducer.clone());
        KindHandler {
            sort: Arc::new(move |input: &Path, output: &Path| {
                sort_file::<R>(input, output, &sort_order, sort_reducer.as_ref())
            }),
            merge: Arc::new(move |a: &Path, b: &Path, output: &Path| {
                merge_files::<R>(a, b, output, MergeColumns::compact(), &order, reducer.as_ref())
            }),
            finish,
        }
    }

    /// Finish by transcoding the surviving file to `output` with `columns`.
    pub fn copy_to<R: Record>(
        order: Comparator<R>,
        reducer: Option<Reducer<R>>,
        output: &Path,
        columns: R::Columns,
    ) -> KindHandler {
        let output = output.to_path_buf();
        KindHandler::new(
            order,
            reducer,
            Box::new(move |survivor: Option<&Path>| transcode::<R>(survivor, &output, columns)),
        )
    }
}

/// Copy compact records from `from` to `to`, re-encoding them with `columns`.
/// A missing source produces an empty output.
pub fn transcode<R: Record>(from: Option<&Path>, to: &Path, columns: R::Columns) -> Result<u64> {
    let mut writer = RecordWriter::<R>::create(to, columns)?;
    if let Some(from) = from {
        for record in RecordReader::<R>::open(from, R::compact_columns())? {
            writer.write(record?)?;
        }
    }
    writer.finish()
}

/// Results of the pipeline's tasks.
#[derive(Debug)]
pub enum TaskOutcome {
    Mapped {
        chunk: PathBuf,
        outputs: Vec<(RecordKind, PathBuf)>,
    },
    Sorted {
        kind: RecordKind,
        file: PathBuf,
        source: PathBuf,
    },
    Merged {
        kind: RecordKind,
        file: PathBuf,
        sources: (PathBuf, PathBuf),
    },
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PipelineSummary {
    pub chunks: u64,
    pub sorts: u64,
    pub merges: u64,
    pub records: BTreeMap<RecordKind, u64>,
}

/// Chunk, sort and merge one input into one sorted file per record kind.
pub struct Pipeline {
    temp: Arc<TempFiles>,
    threads: usize,
    stage: ChunkStage,
    handlers: BTreeMap<RecordKind, KindHandler>,
}

impl Pipeline {
    pub fn new(temp: Arc<TempFiles>, threads: usize, stage: ChunkStage) -> Pipeline {
        Pipeline {
            temp,
            threads,
            stage,
            handlers: BTreeMap::new(),
        }
    }

    pub fn handle(mut self, kind: RecordKind, handler: KindHandler) -> Pipeline {
        self.handlers.insert(kind, handler);
        self
    }

    // runs the pipeline in 3 steps -
    // -> feed chunks to sort (or map) tasks as they arrive
    // -> merge sorted files of the same kind, oldest two first
    // -> finish each kind from its single surviving file

    pub fn run(self, chunker: Chunker) -> Result<PipelineSummary> {
        let timer = Instant::now();
        let Pipeline {
            temp,
            threads,
            stage,
            handlers,
        } = self;

        if let ChunkStage::Sort(kind) = &stage {
            if !handlers.contains_key(kind) {
                return Err(ThesaurusError::Internal(format!("no handler for {} chunks", kind)));
            }
        }

        let mut scheduler = Scheduler::<TaskOutcome>::new(threads)?;
        let in_flight_limit = 2 * scheduler.threads();
        let mut summary = PipelineSummary::default();
        let mut queues: BTreeMap<RecordKind, MergeQueue> =
            handlers.keys().map(|kind| (*kind, MergeQueue::default())).collect();

        let mut dispatch = Dispatch {
            temp: &temp,
            handlers: &handlers,
            scheduler: &mut scheduler,
            summary: &mut summary,
        };

        let (chunks, producer) = chunker.spawn()?;
        let mut producer = Some(producer);
        let closed = never::<PathBuf>();
        let completions = dispatch.scheduler.completions().clone();

        while producer.is_some() || dispatch.scheduler.pending() > 0 {
            let accept = producer.is_some() && dispatch.scheduler.pending() < in_flight_limit;
            let chunk_source = if accept { &chunks } else { &closed };

            select! {
                recv(chunk_source) -> chunk => match chunk {
                    Ok(chunk) => {
                        dispatch.summary.chunks += 1;
                        dispatch.submit_chunk(&stage, chunk);
                    }
                    Err(_) => {
                        // the producer is done: a short read means it failed
                        if let Some(producer) = producer.take() {
                            let produced = producer.join()?;
                            debug!(produced, "all chunks submitted");
                        }
                    }
                },
                recv(completions) -> completion => {
                    let completion = completion
                        .map_err(|_| ThesaurusError::Internal("completion channel closed".into()))?;
                    dispatch.scheduler.settle(&completion);
                    let outcome = completion.result?;
                    dispatch.on_outcome(outcome, &mut queues)?;
                }
            }
        }

        // finish every kind from its single surviving file
        let mut handlers = handlers;
        for (kind, queue) in queues {
            let mut survivors = queue.into_files();
            if survivors.len() > 1 {
                return Err(ThesaurusError::Internal(format!(
                    "{} merge queue ended with {} files",
                    kind,
                    survivors.len()
                )));
            }
            let survivor = survivors.pop();
            let handler = handlers
                .remove(&kind)
                .ok_or_else(|| ThesaurusError::Internal(format!("no handler for {}", kind)))?;
            let written = (handler.finish)(survivor.as_deref())?;
            if let Some(survivor) = survivor {
                delete(&survivor)?;
            }
            summary.records.insert(kind, written);
        }

        info!(
            chunks = summary.chunks,
            sorts = summary.sorts,
            merges = summary.merges,
            temporary_files = temp.created(),
            records = ?summary.records,
            "pipeline finished, took {} seconds",
            timer.elapsed().as_secs()
        );
        Ok(summary)
    }
}

/// The orchestrator's view while the pipeline runs.
struct Dispatch<'a> {
    temp: &'a Arc<TempFiles>,
    handlers: &'a BTreeMap<RecordKind, KindHandler>,
    scheduler: &'a mut Scheduler<TaskOutcome>,
    summary: &'a mut PipelineSummary,
}

impl<'a> Dispatch<'a> {
    fn handler(&self, kind: RecordKind) -> Result<&'a KindHandler> {
        self.handlers
            .get(&kind)
            .ok_or_else(|| ThesaurusError::Internal(format!("no handler for {}", kind)))
    }

    fn submit_chunk(&mut self, stage: &ChunkStage, chunk: PathBuf) {
        match stage {
            ChunkStage::Sort(kind) => {
                if let Ok(handler) = self.handler(*kind) {
                    let sort = handler.sort.clone();
                    self.submit_sort(*kind, sort, chunk);
                }
            }
            ChunkStage::Map(map) => {
                let map = map.clone();
                let temp = self.temp.clone();
                let name = format!("map-{}", self.summary.chunks);
                self.scheduler.submit(name, move || {
                    let outputs = map(&chunk, &temp)?;
                    Ok(TaskOutcome::Mapped { chunk, outputs })
                });
            }
        }
    }

    fn submit_sort(&mut self, kind: RecordKind, sort: SortTask, source: PathBuf) {
        self.summary.sorts += 1;
        let temp = self.temp.clone();
        let name = format!("sort-{}-{}", kind, self.summary.sorts);
        self.scheduler.submit(name, move || {
            let file = temp.create(kind.name())?;
            sort(&source, &file)?;
            Ok(TaskOutcome::Sorted { kind, file, source })
        });
    }

    fn submit_merge(&mut self, kind: RecordKind, a: PathBuf, b: PathBuf) -> Result<()> {
        let merge = self.handler(kind)?.merge.clone();
        self.summary.merges += 1;
        let temp = self.temp.clone();
        let name = format!("merge-{}-{}", kind, self.summary.merges);
        self.scheduler.submit(name, move || {
            let file = temp.create(kind.name())?;
            merge(&a, &b, &file)?;
            Ok(TaskOutcome::Merged {
                kind,
                file,
                sources: (a, b),
            })
        });
        Ok(())
    }

    fn enqueue(&mut self, kind: RecordKind, file: PathBuf, queues: &mut BTreeMap<RecordKind, MergeQueue>) -> Result<()> {
        let queue = queues
            .get_mut(&kind)
            .ok_or_else(|| ThesaurusError::Internal(format!("no merge queue for {}", kind)))?;
        if let Some((a, b)) = queue.push(file) {
            self.submit_merge(kind, a, b)?;
        }
        Ok(())
    }

    fn on_outcome(&mut self, outcome: TaskOutcome, queues: &mut BTreeMap<RecordKind, MergeQueue>) -> Result<()> {
        match outcome {
            TaskOutcome::Mapped { chunk, outputs } => {
                delete(&chunk)?;
                for (kind, file) in outputs {
                    let sort = self.handler(kind)?.sort.clone();
                    self.submit_sort(kind, sort, file);
                }
            }
            TaskOutcome::Sorted { kind, file, source } => {
                delete(&source)?;
                self.enqueue(kind, file, queues)?;
            }
            TaskOutcome::Merged { kind, file, sources } => {
                delete(&sources.0)?;
                delete(&sources.1)?;
                self.enqueue(kind, file, queues)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{record_order, weight_sum, Token, Weighted};
    use std::fs;
    use std::io::Write;
    use tempfile::tempdir;

    fn token_order() -> Comparator<Weighted<Token>> {
        record_order(|a: &Token, b: &Token| a.cmp(b))
    }

    fn sort_tokens(input: &str, chunk_size: usize, threads: usize) -> (String, PipelineSummary, usize) {
        let dir = tempdir().unwrap();
        let work = dir.path().join("work");
        fs::create_dir(&work).unwrap();
        let input_path = dir.path().join("input.tsv");
        let output = dir.path().join("output.tsv");
        fs::write(&input_path, input).unwrap();

        let temp = Arc::new(TempFiles::new(&work));
        let summary = Pipeline::new(temp.clone(), threads, ChunkStage::Sort(RecordKind::Entries))
            .handle(
                RecordKind::Entries,
                KindHandler::copy_to::<Weighted<Token>>(
                    token_order(),
                    Some(weight_sum()),
                    &output,
                    Weighted::<Token>::compact_columns(),
                ),
            )
            .run(Chunker::new(&input_path, chunk_size, temp))
            .unwrap();

        let leftovers = fs::read_dir(&work).unwrap().count();
        (fs::read_to_string(&output).unwrap(), summary, leftovers)
    }

    #[test]
    fn sorts_across_chunks_and_cleans_up_test() {
        let input = "5\t1\n3\t1\n5\t2\n1\t1\n3\t1\n9\t1\n1\t4\n";
        let (output, summary, leftovers) = sort_tokens(input, 2, 2);

        assert_eq!(output, "1\t5\n3\t2\n5\t3\n9\t1\n");
        assert_eq!(summary.chunks, 4);
        assert_eq!(summary.sorts, 4);
        assert_eq!(summary.merges, 3);
        assert_eq!(summary.records[&RecordKind::Entries], 4);
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn chunk_size_does_not_change_the_result_test() {
        let input: String = (0..300).map(|i| format!("{}\t1\n", (i * 37) % 101)).collect();
        let (reference, _, _) = sort_tokens(&input, 1000, 1);
        for chunk_size in [1, 7, 64] {
            let (output, _, leftovers) = sort_tokens(&input, chunk_size, 3);
            assert_eq!(output, reference);
            assert_eq!(leftovers, 0);
        }
    }

    #[test]
    fn empty_input_gives_empty_output_test() {
        let (output, summary, _) = sort_tokens("", 10, 2);
        assert_eq!(output, "");
        assert_eq!(summary.chunks, 0);
        assert_eq!(summary.records[&RecordKind::Entries], 0);
    }

    #[test]
    fn map_stage_fans_out_to_kinds_test() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("input.tsv");
        fs::write(&input, "1\n2\n1\n3\n").unwrap();
        let evens = dir.path().join("evens.tsv");
        let odds = dir.path().join("odds.tsv");

        // every line is a token: split into two kinds by parity
        let split: MapTask = Arc::new(|chunk: &Path, temp: &TempFiles| -> Result<Vec<(RecordKind, PathBuf)>> {
            let even = temp.create("even")?;
            let odd = temp.create("odd")?;
            let (mut e, mut o) = (fs::File::create(&even)?, fs::File::create(&odd)?);
            for line in fs::read_to_string(chunk)?.lines() {
                let token: u32 = line.parse().map_err(|_| ThesaurusError::Malformed(line.into()))?;
                let out = if token % 2 == 0 { &mut e } else { &mut o };
                writeln!(out, "{}\t1", token)?;
            }
            Ok(vec![(RecordKind::Entries, even), (RecordKind::Features, odd)])
        });

        let temp = Arc::new(TempFiles::new(dir.path()));
        let cols = <Weighted<Token> as Record>::compact_columns;
        Pipeline::new(temp.clone(), 2, ChunkStage::Map(split))
            .handle(
                RecordKind::Entries,
                KindHandler::copy_to::<Weighted<Token>>(token_order(), Some(weight_sum()), &evens, cols()),
            )
            .handle(
                RecordKind::Features,
                KindHandler::copy_to::<Weighted<Token>>(token_order(), Some(weight_sum()), &odds, cols()),
            )
            .run(Chunker::new(&input, 1, temp))
            .unwrap();

        assert_eq!(fs::read_to_string(&evens).unwrap(), "2\t1\n");
        assert_eq!(fs::read_to_string(&odds).unwrap(), "1\t2\n3\t1\n");
    }

    #[test]
    fn failing_task_aborts_the_run_test() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("input.tsv");
        fs::write(&input, "1\t1\n2\tnot-a-weight\n").unwrap();

        let temp = Arc::new(TempFiles::new(dir.path()));
        let result = Pipeline::new(temp.clone(), 2, ChunkStage::Sort(RecordKind::Entries))
            .handle(
                RecordKind::Entries,
                KindHandler::copy_to::<Weighted<Token>>(
                    token_order(),
                    Some(weight_sum()),
                    &dir.path().join("out.tsv"),
                    Weighted::<Token>::compact_columns(),
                ),
            )
            .run(Chunker::new(&input, 1, temp));

        match result {
            Err(ThesaurusError::Task { task, source }) => {
                assert!(task.starts_with("sort-entries"));
                assert!(matches!(*source, ThesaurusError::Parse { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
