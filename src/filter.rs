//! Removes rare or unwanted entries and features from counted data.
//!
//! Rejected entries disappear together with their events. Rejected features
//! and rare events are folded into the `___FILTERED___` feature of their
//! entry, so the entry marginals stay what `count` wrote.

use crate::config::{check_distinct, check_input, check_output, FilterArgs, Settings};
use crate::enumerator::{Enumerating, FILTERED_ID};
use crate::error::{Result, ThesaurusError};
use crate::files_handling::read_word_list;
use crate::records::{RecordReader, RecordWriter, Token, TokenPair, Weighted};

use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

/// Acceptance rules for one column.
#[derive(Debug, Default)]
pub struct TokenFilter {
    min_freq: f64,
    pattern: Option<Regex>,
    whitelist: Option<HashSet<String>>,
}

impl TokenFilter {
    pub fn new(min_freq: f64, pattern: Option<&str>, whitelist: Option<&Path>) -> Result<TokenFilter> {
        let pattern = pattern.map(Regex::new).transpose()?;
        let whitelist = match whitelist {
            Some(path) => Some(read_word_list(path)?.into_iter().collect()),
            None => None,
        };
        Ok(TokenFilter {
            min_freq,
            pattern,
            whitelist,
        })
    }

    /// Whether the rules look at the token's string.
    pub fn needs_strings(&self) -> bool {
        self.pattern.is_some() || self.whitelist.is_some()
    }

    pub fn accepts(&self, value: &str, weight: f64) -> bool {
        if weight < self.min_freq {
            return false;
        }
        if let Some(pattern) = &self.pattern {
            if !pattern.is_match(value) {
                return false;
            }
        }
        if let Some(whitelist) = &self.whitelist {
            if !whitelist.contains(value) {
                return false;
            }
        }
        true
    }

    /// Ids of the accepted tokens of a frequency table.
    fn accepted(&self, table: &[Weighted<Token>], column: &Enumerating) -> Result<HashSet<Token>> {
        let mut accepted = HashSet::new();
        for token in table {
            let value = if self.needs_strings() {
                column.enumerator().value(token.record)?
            } else {
                String::new()
            };
            if self.accepts(&value, token.weight) {
                accepted.insert(token.record);
            }
        }
        Ok(accepted)
    }
}

pub struct FilterSummary {
    pub entries: u64,
    pub features: u64,
    pub events: u64,
}

pub struct Filter {}

impl Filter {

    /// Filters the events of one entry. Returns the surviving events sorted
    /// by feature with rejected weight on the filtered feature.
    pub fn filter_run(
        run: &[Weighted<TokenPair>],
        accepted_features: &HashSet<Token>,
        min_event_freq: f64,
    ) -> Vec<Weighted<TokenPair>> {
        let Some(first) = run.first() else {
            return Vec::new();
        };
        let entry = first.record.entry;

        let mut kept: BTreeMap<Token, f64> = BTreeMap::new();
        for event in run {
            let feature = if accepted_features.contains(&event.record.feature) && event.weight >= min_event_freq {
                event.record.feature
            } else {
                FILTERED_ID
            };
            *kept.entry(feature).or_insert(0.0) += event.weight;
        }
        kept.into_iter()
            .map(|(feature, weight)| Weighted::new(TokenPair::new(entry, feature), weight))
            .collect()
    }

    // runs the filter in 4 steps -
    // -> validation of the paths and the filter options
    // -> acceptance of entries and features from their frequency tables
    // -> one pass over the events, grouped by entry
    // -> writing of entries and recomputed features

    pub fn run(args: &FilterArgs, settings: &Settings) -> Result<FilterSummary> {

        let inputs = [
            ("entries input", args.input_entries.as_path()),
            ("features input", args.input_features.as_path()),
            ("events input", args.input_events.as_path()),
        ];
        let outputs = [
            ("entries output", args.output_entries.as_path()),
            ("features output", args.output_features.as_path()),
            ("events output", args.output_events.as_path()),
        ];
        for (name, path) in inputs {
            check_input(name, path)?;
        }
        for (name, path) in outputs.iter().copied().chain(settings.index_files()) {
            check_output(name, path)?;
        }
        let mut files: Vec<(&str, &Path)> = inputs.iter().chain(outputs.iter()).copied().collect();
        files.extend(settings.index_files());
        check_distinct(&files)?;

        let entry_filter = TokenFilter::new(
            args.filter_entry_freq,
            args.filter_entry_pattern.as_deref(),
            args.filter_entry_whitelist.as_deref(),
        )?;
        let feature_filter = TokenFilter::new(
            args.filter_feature_freq,
            args.filter_feature_pattern.as_deref(),
            args.filter_feature_whitelist.as_deref(),
        )?;
        if entry_filter.needs_strings() && settings.preindexed_entries && settings.entries_index_file.is_none() {
            return Err(ThesaurusError::validation(
                "entry pattern or whitelist on pre-indexed entries needs --entries-index-file",
            ));
        }
        if feature_filter.needs_strings() && settings.preindexed_features && settings.features_index_file.is_none() {
            return Err(ThesaurusError::validation(
                "feature pattern or whitelist on pre-indexed features needs --features-index-file",
            ));
        }

        let timer = Instant::now();
        info!("{}", settings);

        // frequency tables are vocabulary sized and fit in memory
        let columns = settings.paired()?;
        let entries: Vec<Weighted<Token>> = RecordReader::<Weighted<Token>>::open(&args.input_entries, columns.entries.clone())?
            .with_charset(settings.charset)
            .collect::<Result<_>>()?;
        let features: Vec<Weighted<Token>> = RecordReader::<Weighted<Token>>::open(&args.input_features, columns.features.clone())?
            .with_charset(settings.charset)
            .collect::<Result<_>>()?;
        let accepted_entries = entry_filter.accepted(&entries, &columns.entries)?;
        let mut accepted_features = feature_filter.accepted(&features, &columns.features)?;
        accepted_features.remove(&FILTERED_ID);
        info!(
            entries = entries.len(),
            accepted_entries = accepted_entries.len(),
            features = features.len(),
            accepted_features = accepted_features.len(),
            "filters applied"
        );

        let output = settings.output_paired(&columns);

        // events: one contiguous run per entry
        let mut feature_totals: HashMap<Token, f64> = HashMap::new();
        let mut writer = RecordWriter::<Weighted<TokenPair>>::create(&args.output_events, output.clone())?;
        let mut run: Vec<Weighted<TokenPair>> = Vec::new();
        let mut flush = |run: &mut Vec<Weighted<TokenPair>>, writer: &mut RecordWriter<Weighted<TokenPair>>| -> Result<()> {
            if run.is_empty() || !accepted_entries.contains(&run[0].record.entry) {
                run.clear();
                return Ok(());
            }
            for event in Filter::filter_run(run, &accepted_features, args.filter_event_freq) {
                *feature_totals.entry(event.record.feature).or_insert(0.0) += event.weight;
                writer.write(event)?;
            }
            run.clear();
            Ok(())
        };
        let events = RecordReader::<Weighted<TokenPair>>::open(&args.input_events, columns.clone())?.with_charset(settings.charset);
        for event in events {
            let event = event?;
            if run.last().map_or(false, |last| last.record.entry != event.record.entry) {
                flush(&mut run, &mut writer)?;
            }
            run.push(event);
        }
        flush(&mut run, &mut writer)?;
        let events_written = writer.finish()?;

        // entries keep their original weights
        let mut writer = RecordWriter::<Weighted<Token>>::create(&args.output_entries, output.entries.clone())?;
        for entry in entries.into_iter().filter(|e| accepted_entries.contains(&e.record)) {
            writer.write(entry)?;
        }
        let entries_written = writer.finish()?;

        // features are recomputed from the surviving events, in id order
        let mut totals: Vec<(Token, f64)> = feature_totals.into_iter().collect();
        totals.sort_by_key(|(feature, _)| *feature);
        let mut writer = RecordWriter::<Weighted<Token>>::create(&args.output_features, output.features.clone())?;
        for (feature, weight) in totals {
            writer.write(Weighted::new(feature, weight))?;
        }
        let features_written = writer.finish()?;

        columns.persist()?;
        columns.close()?;

        debug!(events_written, entries_written, features_written, "filter outputs written");
        info!("finished filtering, took {} seconds ...", timer.elapsed().as_secs());
        Ok(FilterSummary {
            entries: entries_written,
            features: features_written,
            events: events_written,
        })
    }
}
