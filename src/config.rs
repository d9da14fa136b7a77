use crate::enumerator::{with_enumeration_flag, with_pair_enumeration_flag, Enumerating, PairedEnumerating};
use crate::error::{Result, ThesaurusError};
use crate::files_handling::Charset;
use crate::measure::MeasureKind;
use crate::records::RecordKind;
use crate::weighting::WeightingKind;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::fmt::Display;
use std::fs::{self, File, OpenOptions};
use std::io::BufReader;
use std::path::{Path, PathBuf};

pub const DEFAULT_CHUNK_SIZE: usize = 1_000_000;
pub const DEFAULT_K: usize = 100;

#[derive(Parser, Debug)]
#[command(name = "thesaurus_builder", version, about = "Build distributional thesauri from co-occurrence data")]
pub struct Cli {
    /// Debug level logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log level or filter directive, e.g. `trace` or `thesaurus_builder=debug`
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// JSON file with defaults for chunk_size, temporary_directory, threads and charset
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Count entry, feature and event frequencies of an instances file
    Count(CountArgs),
    /// Remove rare or unwanted entries and features
    Filter(FilterArgs),
    /// Sort a record file, summing the weights of duplicates
    Sort(SortArgs),
    /// Merge two sorted record files
    Merge(MergeArgs),
    /// Score every pair of entries and keep the nearest neighbours
    Allpairs(AllPairsArgs),
    /// Keep the k nearest neighbours of every entry of a sims file
    Knn(KnnArgs),
}

/// Options shared by every command.
#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    /// Character encoding of input and output files
    #[arg(long)]
    pub charset: Option<String>,

    /// Lines per chunk
    #[arg(short = 'C', long)]
    pub chunk_size: Option<usize>,

    /// Directory for intermediate files
    #[arg(short = 'T', long)]
    pub temporary_directory: Option<PathBuf>,

    /// Worker threads, 0 for one per core
    #[arg(long)]
    pub threads: Option<usize>,

    /// The entry column holds integer ids
    #[arg(long)]
    pub preindexed_entries: bool,

    /// The feature column holds integer ids
    #[arg(long)]
    pub preindexed_features: bool,

    /// String index for entries, loaded if present and saved afterwards
    #[arg(long)]
    pub entries_index_file: Option<PathBuf>,

    /// String index for features, loaded if present and saved afterwards
    #[arg(long)]
    pub features_index_file: Option<PathBuf>,

    /// Write integer ids instead of strings
    #[arg(long)]
    pub compact_output: bool,

    /// Write strings for pre-indexed columns, resolved through their index files
    #[arg(long, conflicts_with = "compact_output")]
    pub verbose_output: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CountArgs {
    /// Instances file: entry<TAB>feature[<TAB>feature...]
    #[arg(short, long)]
    pub input: PathBuf,

    #[arg(long)]
    pub output_entries: PathBuf,

    #[arg(long)]
    pub output_features: PathBuf,

    #[arg(long)]
    pub output_events: PathBuf,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args, Debug, Clone)]
pub struct FilterArgs {
    #[arg(long)]
    pub input_entries: PathBuf,

    #[arg(long)]
    pub input_features: PathBuf,

    #[arg(long)]
    pub input_events: PathBuf,

    #[arg(long)]
    pub output_entries: PathBuf,

    #[arg(long)]
    pub output_features: PathBuf,

    #[arg(long)]
    pub output_events: PathBuf,

    /// Minimum entry frequency
    #[arg(long, default_value_t = 0.0)]
    pub filter_entry_freq: f64,

    /// Minimum feature frequency
    #[arg(long, default_value_t = 0.0)]
    pub filter_feature_freq: f64,

    /// Minimum event frequency
    #[arg(long, default_value_t = 0.0)]
    pub filter_event_freq: f64,

    /// Keep only entries matching this regular expression
    #[arg(long)]
    pub filter_entry_pattern: Option<String>,

    /// Keep only features matching this regular expression
    #[arg(long)]
    pub filter_feature_pattern: Option<String>,

    /// Keep only entries listed in this file
    #[arg(long)]
    pub filter_entry_whitelist: Option<PathBuf>,

    /// Keep only features listed in this file
    #[arg(long)]
    pub filter_feature_whitelist: Option<PathBuf>,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args, Debug, Clone)]
pub struct SortArgs {
    #[arg(short, long)]
    pub input: PathBuf,

    #[arg(short, long)]
    pub output: PathBuf,

    #[arg(long, value_enum, default_value_t = RecordKind::Events)]
    pub kind: RecordKind,

    /// Sort in reverse order
    #[arg(short, long)]
    pub reverse: bool,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args, Debug, Clone)]
pub struct MergeArgs {
    #[arg(long)]
    pub input_a: PathBuf,

    #[arg(long)]
    pub input_b: PathBuf,

    #[arg(short, long)]
    pub output: PathBuf,

    #[arg(long, value_enum, default_value_t = RecordKind::Events)]
    pub kind: RecordKind,

    /// The inputs are sorted in reverse order
    #[arg(short, long)]
    pub reverse: bool,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Candidates {
    /// Only pairs sharing at least one feature
    #[default]
    Shared,
    /// Every pair
    All,
}

#[derive(Args, Debug, Clone)]
pub struct AllPairsArgs {
    /// Events file sorted by entry
    #[arg(short, long)]
    pub input: PathBuf,

    #[arg(short, long)]
    pub output: PathBuf,

    #[arg(short, long, value_enum)]
    pub measure: MeasureKind,

    /// Score each pair with its arguments swapped
    #[arg(long)]
    pub measure_reversed: bool,

    /// Neighbours kept per entry
    #[arg(short, long, default_value_t = DEFAULT_K)]
    pub k: usize,

    /// Scores below this are dropped
    #[arg(long, default_value_t = 0.0)]
    pub min_similarity: f64,

    #[arg(short, long, value_enum, default_value_t = WeightingKind::Null)]
    pub weighting: WeightingKind,

    #[arg(long, value_enum, default_value_t = Candidates::Shared)]
    pub candidates: Candidates,

    /// Also score every entry against itself
    #[arg(long)]
    pub include_self: bool,

    /// Entry frequencies for weightings that need marginals
    #[arg(long, requires = "input_features")]
    pub input_entries: Option<PathBuf>,

    /// Feature frequencies for weightings that need marginals
    #[arg(long, requires = "input_entries")]
    pub input_features: Option<PathBuf>,

    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args, Debug, Clone)]
pub struct KnnArgs {
    #[arg(short, long)]
    pub input: PathBuf,

    #[arg(short, long)]
    pub output: PathBuf,

    /// Neighbours kept per entry
    #[arg(short, long, default_value_t = DEFAULT_K)]
    pub k: usize,

    #[command(flatten)]
    pub common: CommonArgs,
}

/// Defaults read from the `--config` JSON file. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub chunk_size: Option<usize>,
    pub temporary_directory: Option<PathBuf>,
    pub threads: Option<usize>,
    pub charset: Option<String>,
}

impl Config {
    pub fn new(file: Option<&Path>) -> Result<Config> {
        let Some(file) = file else {
            return Ok(Config::default());
        };

        // parse input json
        let f = File::open(file)
            .map_err(|e| ThesaurusError::validation(format!("cannot open config file {:?}: {}", file, e)))?;
        let config: Config = serde_json::from_reader(BufReader::new(f))?;
        Ok(config)
    }
}

/// Resolved settings of one run: flag, then config file, then built-in default.
#[derive(Debug, Clone)]
pub struct Settings {
    pub chunk_size: usize,
    pub temporary_directory: PathBuf,
    pub threads: usize,
    pub charset: Charset,
    pub preindexed_entries: bool,
    pub preindexed_features: bool,
    pub entries_index_file: Option<PathBuf>,
    pub features_index_file: Option<PathBuf>,
    pub compact_output: bool,
    pub verbose_output: bool,
}

impl Display for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "chunk_size: {}, temporary_directory: {:?}, threads: {}, charset: {}, preindexed entries/features: {}/{}, compact/verbose output: {}/{}",
            self.chunk_size,
            self.temporary_directory,
            self.threads,
            self.charset,
            self.preindexed_entries,
            self.preindexed_features,
            self.compact_output,
            self.verbose_output
        )
    }
}

impl Settings {
    pub fn resolve(common: &CommonArgs, config: &Config) -> Result<Settings> {
        let chunk_size = common.chunk_size.or(config.chunk_size).unwrap_or(DEFAULT_CHUNK_SIZE);
        if chunk_size == 0 {
            return Err(ThesaurusError::validation("chunk size must be at least 1"));
        }

        let temporary_directory = common
            .temporary_directory
            .clone()
            .or_else(|| config.temporary_directory.clone())
            .unwrap_or_else(std::env::temp_dir);
        if !temporary_directory.is_dir() {
            return Err(ThesaurusError::validation(format!(
                "temporary directory {:?} is not a directory",
                temporary_directory
            )));
        }

        let charset = match common.charset.as_deref().or(config.charset.as_deref()) {
            Some(name) => Charset::parse(name)?,
            None => Charset::Utf8,
        };

        if common.verbose_output {
            if common.preindexed_entries && common.entries_index_file.is_none() {
                return Err(ThesaurusError::validation(
                    "--verbose-output on pre-indexed entries needs --entries-index-file",
                ));
            }
            if common.preindexed_features && common.features_index_file.is_none() {
                return Err(ThesaurusError::validation(
                    "--verbose-output on pre-indexed features needs --features-index-file",
                ));
            }
        }

        Ok(Settings {
            chunk_size,
            temporary_directory,
            threads: common.threads.or(config.threads).unwrap_or(0),
            charset,
            preindexed_entries: common.preindexed_entries,
            preindexed_features: common.preindexed_features,
            entries_index_file: common.entries_index_file.clone(),
            features_index_file: common.features_index_file.clone(),
            compact_output: common.compact_output,
            verbose_output: common.verbose_output,
        })
    }

    /// The entry column as this run reads it.
    pub fn entries(&self) -> Result<Enumerating> {
        Enumerating::open(self.preindexed_entries, self.entries_index_file.as_deref())
    }

    /// The feature column as this run reads it.
    pub fn features(&self) -> Result<Enumerating> {
        Enumerating::open(self.preindexed_features, self.features_index_file.as_deref())
    }

    /// Separate entry and feature columns. When both columns share one
    /// index file they share one enumerator.
    pub fn paired(&self) -> Result<PairedEnumerating> {
        let entries = self.entries()?;
        let shared_index = self.entries_index_file.is_some() && self.entries_index_file == self.features_index_file;
        let features = if shared_index && self.preindexed_entries == self.preindexed_features {
            entries.clone()
        } else {
            self.features()?
        };
        Ok(PairedEnumerating::new(entries, features))
    }

    /// A column as this run writes it: ids with `--compact-output`, strings
    /// with `--verbose-output`, otherwise the way it was read.
    pub fn output_column(&self, column: &Enumerating) -> Enumerating {
        if self.compact_output {
            with_enumeration_flag(column, true)
        } else if self.verbose_output {
            with_enumeration_flag(column, false)
        } else {
            column.clone()
        }
    }

    /// [`Settings::output_column`] for both columns.
    pub fn output_paired(&self, columns: &PairedEnumerating) -> PairedEnumerating {
        if self.compact_output {
            with_pair_enumeration_flag(columns, true)
        } else if self.verbose_output {
            with_pair_enumeration_flag(columns, false)
        } else {
            columns.clone()
        }
    }

    /// Index files written at the end of the run, checked like outputs.
    pub fn index_files(&self) -> Vec<(&'static str, &Path)> {
        let mut files = Vec::new();
        if let Some(f) = &self.entries_index_file {
            files.push(("entries index file", f.as_path()));
        }
        if let Some(f) = &self.features_index_file {
            if self.entries_index_file.as_ref() != Some(f) {
                files.push(("features index file", f.as_path()));
            }
        }
        files
    }
}

// fail-fast checks run before any task is submitted

pub fn check_input(name: &str, path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(ThesaurusError::validation(format!("{} is required", name)));
    }
    if !path.exists() {
        return Err(ThesaurusError::validation(format!("{} {:?} does not exist", name, path)));
    }
    if !path.is_file() {
        return Err(ThesaurusError::validation(format!("{} {:?} is not a regular file", name, path)));
    }
    File::open(path)
        .map_err(|e| ThesaurusError::validation(format!("{} {:?} is not readable: {}", name, path, e)))?;
    Ok(())
}

pub fn check_output(name: &str, path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(ThesaurusError::validation(format!("{} is required", name)));
    }
    if path.exists() {
        if !path.is_file() {
            return Err(ThesaurusError::validation(format!("{} {:?} is not a regular file", name, path)));
        }
        OpenOptions::new()
            .append(true)
            .open(path)
            .map_err(|e| ThesaurusError::validation(format!("{} {:?} is not writable: {}", name, path, e)))?;
        return Ok(());
    }
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if !parent.is_dir() {
        return Err(ThesaurusError::validation(format!(
            "{} {:?} cannot be created, {:?} is not a directory",
            name, path, parent
        )));
    }
    let writable = fs::metadata(parent).map(|m| !m.permissions().readonly()).unwrap_or(false);
    if !writable {
        return Err(ThesaurusError::validation(format!(
            "{} {:?} cannot be created in read-only {:?}",
            name, path, parent
        )));
    }
    Ok(())
}

fn resolved(path: &Path) -> PathBuf {
    if let Ok(p) = path.canonicalize() {
        return p;
    }
    // not created yet: resolve the directory it will live in
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => {
            let parent = if parent.as_os_str().is_empty() { Path::new(".") } else { parent };
            parent.canonicalize().map(|p| p.join(name)).unwrap_or_else(|_| path.to_path_buf())
        }
        _ => path.to_path_buf(),
    }
}

/// No two designated files may be the same file.
pub fn check_distinct(files: &[(&str, &Path)]) -> Result<()> {
    let resolved: Vec<PathBuf> = files.iter().map(|(_, p)| resolved(p)).collect();
    for i in 0..files.len() {
        for j in i + 1..files.len() {
            if resolved[i] == resolved[j] {
                return Err(ThesaurusError::validation(format!(
                    "{} and {} are the same file {:?}",
                    files[i].0, files[j].0, files[i].1
                )));
            }
        }
    }
    Ok(())
}

pub fn check_k(k: usize) -> Result<()> {
    if k == 0 {
        return Err(ThesaurusError::validation("k must be at least 1"));
    }
    Ok(())
}
