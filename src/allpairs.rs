// imports
use crate::config::{check_distinct, check_input, check_k, check_output, AllPairsArgs, Candidates, Settings};
use crate::enumerator::PairedEnumerating;
use crate::error::{Result, ThesaurusError};
use crate::measure::Measure;
use crate::records::{sims_columns, RecordReader, RecordWriter, Token, TokenPair, Weighted};
use crate::vector::{SparseVector, VectorSource};
use crate::weighting::{Marginals, Weighting};

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::time::Instant;
use tracing::{debug, info, trace};

/// Options of one all-pairs scan.
#[derive(Debug, Clone, Copy)]
pub struct ScanOptions {
    pub k: usize,
    pub min_similarity: f64,
    pub reversed: bool,
    pub candidates: Candidates,
    pub include_self: bool,
}

/// One scored neighbour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbour {
    pub entry: Token,
    pub score: f64,
}

impl Neighbour {
    /// Best first: higher score, then lower entry id.
    fn rank(a: &Neighbour, b: &Neighbour) -> Ordering {
        b.score.total_cmp(&a.score).then(a.entry.cmp(&b.entry))
    }
}

// heap entry ordered so that the worst neighbour sits on top
struct Worst(Neighbour);

impl PartialEq for Worst {
    fn eq(&self, other: &Self) -> bool {
        Neighbour::rank(&self.0, &other.0) == Ordering::Equal
    }
}

impl Eq for Worst {}

impl PartialOrd for Worst {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Worst {
    fn cmp(&self, other: &Self) -> Ordering {
        Neighbour::rank(&self.0, &other.0)
    }
}

/// Keeps the k best neighbours seen so far.
pub struct TopK {
    k: usize,
    heap: BinaryHeap<Worst>,
}

impl TopK {
    pub fn new(k: usize) -> TopK {
        TopK {
            k,
            heap: BinaryHeap::new(),
        }
    }

    pub fn offer(&mut self, neighbour: Neighbour) {
        if self.k == 0 {
            return;
        }
        if self.heap.len() < self.k {
            self.heap.push(Worst(neighbour));
            return;
        }
        if let Some(worst) = self.heap.peek() {
            if Neighbour::rank(&neighbour, &worst.0) == Ordering::Less {
                self.heap.pop();
                self.heap.push(Worst(neighbour));
            }
        }
    }

    /// Best first.
    pub fn into_sorted(self) -> Vec<Neighbour> {
        let mut neighbours: Vec<Neighbour> = self.heap.into_iter().map(|w| w.0).collect();
        neighbours.sort_by(Neighbour::rank);
        neighbours
    }
}

/// Weighted vectors with their cached one-sided terms.
struct Prepared {
    entries: Vec<Token>,
    vectors: Vec<SparseVector>,
    left: Vec<f64>,
    right: Vec<f64>,
    // feature -> positions of the vectors holding it
    postings: HashMap<Token, Vec<u32>>,
}

impl Prepared {
    fn new(vectors: Vec<(Token, SparseVector)>, weighting: &dyn Weighting, measure: &dyn Measure) -> Result<Prepared> {
        let (lower, upper) = (weighting.lower_bound(), weighting.upper_bound());
        let weighted: Vec<(Token, SparseVector)> = vectors
            .into_par_iter()
            .map(|(entry, vector)| {
                let weighted = weighting.apply(entry, &vector);
                let out_of_range = weighted.iter().find(|(_, w)| !(lower..=upper).contains(w));
                match out_of_range {
                    Some((feature, w)) => Err(ThesaurusError::Malformed(format!(
                        "weight {} of entry {} and feature {} is outside [{}, {}]",
                        w, entry, feature, lower, upper
                    ))),
                    None => Ok((entry, weighted)),
                }
            })
            .collect::<Result<_>>()?;
        let (entries, vectors): (Vec<Token>, Vec<SparseVector>) = weighted.into_iter().unzip();
        let left = vectors.par_iter().map(|v| measure.left(v)).collect();
        let right = vectors.par_iter().map(|v| measure.right(v)).collect();

        let mut postings: HashMap<Token, Vec<u32>> = HashMap::new();
        for (position, vector) in vectors.iter().enumerate() {
            for feature in vector.indices() {
                postings.entry(*feature).or_default().push(position as u32);
            }
        }

        Ok(Prepared {
            entries,
            vectors,
            left,
            right,
            postings,
        })
    }

    fn candidates(&self, row: usize, options: &ScanOptions) -> Vec<usize> {
        let mut candidates: Vec<usize> = match options.candidates {
            Candidates::All => (0..self.vectors.len()).collect(),
            Candidates::Shared => {
                let mut seen: Vec<usize> = self.vectors[row]
                    .indices()
                    .iter()
                    .filter_map(|f| self.postings.get(f))
                    .flat_map(|positions| positions.iter().map(|p| *p as usize))
                    .collect();
                seen.sort_unstable();
                seen.dedup();
                seen
            }
        };
        if !options.include_self {
            candidates.retain(|c| *c != row);
        } else if options.candidates == Candidates::Shared && !candidates.contains(&row) {
            candidates.push(row);
        }
        candidates
    }

    fn score(&self, measure: &dyn Measure, row: usize, column: usize, reversed: bool) -> f64 {
        let (a, b) = (&self.vectors[row], &self.vectors[column]);
        if reversed {
            measure.combine(measure.shared(b, a), self.left[column], self.right[row])
        } else {
            measure.combine(measure.shared(a, b), self.left[row], self.right[column])
        }
    }

    fn neighbours(&self, measure: &dyn Measure, row: usize, options: &ScanOptions) -> Vec<Neighbour> {
        let mut top = TopK::new(options.k);
        for column in self.candidates(row, options) {
            let score = self.score(measure, row, column, options.reversed);
            if score.is_nan() || score < options.min_similarity {
                continue;
            }
            top.offer(Neighbour {
                entry: self.entries[column],
                score,
            });
        }
        top.into_sorted()
    }
}

pub struct AllPairs {}

impl AllPairs {

    /// Scores every entry against its candidates on `pool`, `block_size`
    /// rows at a time, and hands the best k of each row to `emit` in input
    /// order.
    pub fn scan<F>(
        pool: &ThreadPool,
        vectors: Vec<(Token, SparseVector)>,
        weighting: &dyn Weighting,
        measure: &dyn Measure,
        options: &ScanOptions,
        block_size: usize,
        mut emit: F,
    ) -> Result<()>
    where
        F: FnMut(Token, Vec<Neighbour>) -> Result<()>,
    {
        let prepared = pool.install(|| Prepared::new(vectors, weighting, measure))?;
        debug!(
            vectors = prepared.vectors.len(),
            features = prepared.postings.len(),
            "vectors prepared"
        );

        let rows = prepared.vectors.len();
        let block_size = block_size.max(1);
        let mut start = 0;
        while start < rows {
            let end = rows.min(start.saturating_add(block_size));
            let block: Vec<Vec<Neighbour>> = pool.install(|| {
                (start..end)
                    .into_par_iter()
                    .map(|row| prepared.neighbours(measure, row, options))
                    .collect()
            });
            for (row, neighbours) in (start..end).zip(block) {
                emit(prepared.entries[row], neighbours)?;
            }
            trace!(start, end, "block scored");
            start = end;
        }
        Ok(())
    }

    // runs all-pairs in 4 steps -
    // -> validation of the paths and options
    // -> vectorising the events, one vector per entry
    // -> weighting the vectors on the worker pool
    // -> scoring blocks of rows and writing each block as it finishes

    pub fn run(args: &AllPairsArgs, settings: &Settings) -> Result<u64> {

        check_input("input", &args.input)?;
        check_output("output", &args.output)?;
        check_k(args.k)?;
        let mut files = vec![("input", args.input.as_path()), ("output", args.output.as_path())];
        if let (Some(entries), Some(features)) = (&args.input_entries, &args.input_features) {
            check_input("entries input", entries)?;
            check_input("features input", features)?;
            files.push(("entries input", entries.as_path()));
            files.push(("features input", features.as_path()));
        }
        for (name, path) in settings.index_files() {
            check_output(name, path)?;
            files.push((name, path));
        }
        check_distinct(&files)?;

        let timer = Instant::now();
        info!("{}", settings);
        let measure = args.measure.build();
        if args.measure_reversed && measure.is_commutative() {
            info!(measure = ?args.measure, "measure is commutative, reversed scores equal forward scores");
        }

        // vectorise
        let columns: PairedEnumerating = settings.paired()?;
        let events = RecordReader::<Weighted<TokenPair>>::open(&args.input, columns.clone())?.with_charset(settings.charset);
        let vectors: Vec<(Token, SparseVector)> = VectorSource::new(events).collect::<Result<_>>()?;
        info!(entries = vectors.len(), "vectors built");

        // weighting
        let marginals = if args.weighting.needs_marginals() {
            Some(match (&args.input_entries, &args.input_features) {
                (Some(entries), Some(features)) => {
                    Marginals::from_files(entries, features, columns.entries.clone(), columns.features.clone())?
                }
                _ => Marginals::from_vectors(&vectors),
            })
        } else {
            None
        };
        let weighting = args.weighting.build(marginals);

        let options = ScanOptions {
            k: args.k,
            min_similarity: args.min_similarity,
            reversed: args.measure_reversed,
            candidates: args.candidates,
            include_self: args.include_self,
        };
        let pool = ThreadPoolBuilder::new()
            .num_threads(settings.threads)
            .thread_name(|i| format!("allpairs-{}", i))
            .build()?;

        // sims: entry, neighbour, score
        let entries = settings.output_column(&columns.entries);
        let mut writer = RecordWriter::<Weighted<TokenPair>>::create(&args.output, sims_columns(&entries))?;
        AllPairs::scan(
            &pool,
            vectors,
            weighting.as_ref(),
            measure.as_ref(),
            &options,
            settings.chunk_size,
            |entry, neighbours| {
                for neighbour in neighbours {
                    writer.write(Weighted::new(TokenPair::new(entry, neighbour.entry), neighbour.score))?;
                }
                Ok(())
            },
        )?;
        let written = writer.finish()?;

        columns.persist()?;
        columns.close()?;

        info!(sims = written, "finished all-pairs, took {} seconds ...", timer.elapsed().as_secs());
        Ok(written)
    }
}
