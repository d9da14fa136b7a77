//! Bidirectional string ↔ id mapping and the column views built on top of it.
//!
//! An [`Enumerator`] assigns ids. An [`Enumerating`] pairs an enumerator with
//! the one flag that says whether a column is already written as integer
//! ids. [`PairedEnumerating`] carries the entry and feature columns of a
//! two-column record. Views are composed with [`as_paired`],
//! [`as_entry_only`], [`as_feature_only`] and [`with_enumeration_flag`].

use crate::error::{Result, ThesaurusError};
use crate::files_handling::{open_reader, OutputFile};
use crate::records::Token;

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Placeholder string for entries or features removed by filtering. Fresh
/// enumerators always give it id 0.
pub const FILTERED_STRING: &str = "___FILTERED___";
pub const FILTERED_ID: Token = 0;

pub trait Enumerator: Send + Sync + Debug {
    /// Id of `value`, assigning the next free id on first use.
    fn id(&self, value: &str) -> Result<Token>;

    fn value(&self, id: Token) -> Result<String>;

    /// Write the mapping to its backing file, if it has one.
    fn persist(&self) -> Result<()>;

    fn close(&self) -> Result<()>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
struct Mapping {
    ids: HashMap<String, Token>,
    values: BTreeMap<Token, String>,
    // one past the largest id, wider than a token so it cannot overflow
    next_id: u64,
}

impl Mapping {
    fn insert(&mut self, id: Token, value: String) {
        self.values.insert(id, value.clone());
        self.ids.insert(value, id);
        self.next_id = self.next_id.max(u64::from(id) + 1);
    }

    fn assign(&mut self, value: &str) -> Result<Token> {
        let id = Token::try_from(self.next_id)
            .map_err(|_| ThesaurusError::Enumerator(format!("no id left for {:?}", value)))?;
        self.insert(id, value.to_owned());
        Ok(id)
    }
}

/// In-memory enumerator, optionally backed by an `id\tstring` file.
#[derive(Debug)]
pub struct MemoryEnumerator {
    mapping: RwLock<Mapping>,
    file: Option<PathBuf>,
}

impl MemoryEnumerator {
    /// A fresh enumerator with the filtered marker at id 0.
    pub fn new() -> MemoryEnumerator {
        let mut mapping = Mapping::default();
        mapping.insert(FILTERED_ID, FILTERED_STRING.to_owned());
        MemoryEnumerator {
            mapping: RwLock::new(mapping),
            file: None,
        }
    }

    /// Load `file` if it exists, otherwise start fresh. `persist` writes back
    /// to the same file.
    pub fn open(file: &Path) -> Result<MemoryEnumerator> {
        let mut enumerator = if file.exists() {
            MemoryEnumerator::load(file)?
        } else {
            debug!(file = ?file, "creating new string index");
            MemoryEnumerator::new()
        };
        enumerator.file = Some(file.to_path_buf());
        Ok(enumerator)
    }

    fn load(file: &Path) -> Result<MemoryEnumerator> {
        info!(file = ?file, "loading string index");
        let mut mapping = Mapping::default();
        for (i, line) in open_reader(file)?.lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let (id, value) = line
                .split_once('\t')
                .ok_or_else(|| ThesaurusError::Malformed("expected id<TAB>string".into()).at(file, i as u64 + 1))?;
            let id: Token = id
                .parse()
                .map_err(|_| ThesaurusError::Malformed(format!("bad id {:?}", id)).at(file, i as u64 + 1))?;
            mapping.insert(id, value.to_owned());
        }
        Ok(MemoryEnumerator {
            mapping: RwLock::new(mapping),
            file: None,
        })
    }
}

impl Default for MemoryEnumerator {
    fn default() -> Self {
        MemoryEnumerator::new()
    }
}

impl Enumerator for MemoryEnumerator {
    fn id(&self, value: &str) -> Result<Token> {
        if let Some(id) = self.mapping.read().ids.get(value) {
            return Ok(*id);
        }
        // another thread may have assigned it between the two locks
        let mut mapping = self.mapping.write();
        if let Some(id) = mapping.ids.get(value) {
            return Ok(*id);
        }
        mapping.assign(value)
    }

    fn value(&self, id: Token) -> Result<String> {
        self.mapping
            .read()
            .values
            .get(&id)
            .cloned()
            .ok_or_else(|| ThesaurusError::Enumerator(format!("unknown id {}", id)))
    }

    fn persist(&self) -> Result<()> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        info!(file = ?file, "saving string index");
        let mapping = self.mapping.read();
        let mut out = OutputFile::create(file)?;
        for (id, value) in &mapping.values {
            writeln!(out, "{}\t{}", id, value)?;
        }
        out.finish()
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn len(&self) -> usize {
        self.mapping.read().ids.len()
    }
}

/// Stands in for a missing enumerator on a pre-indexed column; any lookup is
/// an error.
#[derive(Debug, Default)]
pub struct NullEnumerator;

impl Enumerator for NullEnumerator {
    fn id(&self, value: &str) -> Result<Token> {
        Err(ThesaurusError::Enumerator(format!(
            "no string index available to enumerate {:?}",
            value
        )))
    }

    fn value(&self, id: Token) -> Result<String> {
        Err(ThesaurusError::Enumerator(format!(
            "no string index available to resolve id {}",
            id
        )))
    }

    fn persist(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn len(&self) -> usize {
        0
    }
}

/// One column: its enumerator and whether the column holds integer ids.
#[derive(Debug, Clone)]
pub struct Enumerating {
    enumerator: Arc<dyn Enumerator>,
    enumerated: bool,
}

impl Enumerating {
    pub fn new(enumerator: Arc<dyn Enumerator>, enumerated: bool) -> Enumerating {
        Enumerating {
            enumerator,
            enumerated,
        }
    }

    /// Integer ids in, integer ids out, no enumerator behind it.
    pub fn compact() -> Enumerating {
        Enumerating::new(Arc::new(NullEnumerator), true)
    }

    /// Open the column for a run: a pre-indexed column without an index file
    /// gets a null enumerator, everything else a memory enumerator.
    pub fn open(enumerated: bool, index_file: Option<&Path>) -> Result<Enumerating> {
        let enumerator: Arc<dyn Enumerator> = match (enumerated, index_file) {
            (_, Some(file)) => Arc::new(MemoryEnumerator::open(file)?),
            (true, None) => Arc::new(NullEnumerator),
            (false, None) => Arc::new(MemoryEnumerator::new()),
        };
        Ok(Enumerating::new(enumerator, enumerated))
    }

    pub fn is_enumerated(&self) -> bool {
        self.enumerated
    }

    pub fn enumerator(&self) -> &Arc<dyn Enumerator> {
        &self.enumerator
    }

    /// Read one field of this column into a token.
    pub fn decode(&self, field: &str) -> Result<Token> {
        if self.enumerated {
            field
                .parse()
                .map_err(|_| ThesaurusError::Malformed(format!("expected integer id, found {:?}", field)))
        } else {
            self.enumerator.id(field)
        }
    }

    /// Write one token of this column.
    pub fn encode(&self, token: Token) -> Result<String> {
        if self.enumerated {
            Ok(token.to_string())
        } else {
            self.enumerator.value(token)
        }
    }

    pub fn persist(&self) -> Result<()> {
        self.enumerator.persist()
    }

    pub fn close(&self) -> Result<()> {
        self.enumerator.close()
    }
}

/// Entry and feature columns of a two-column record.
#[derive(Debug, Clone)]
pub struct PairedEnumerating {
    pub entries: Enumerating,
    pub features: Enumerating,
}

impl PairedEnumerating {
    pub fn new(entries: Enumerating, features: Enumerating) -> PairedEnumerating {
        PairedEnumerating { entries, features }
    }

    pub fn compact() -> PairedEnumerating {
        as_paired(&Enumerating::compact())
    }

    fn shares_enumerator(&self) -> bool {
        Arc::ptr_eq(&self.entries.enumerator, &self.features.enumerator)
    }

    pub fn persist(&self) -> Result<()> {
        self.entries.persist()?;
        if !self.shares_enumerator() {
            self.features.persist()?;
        }
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        self.entries.close()?;
        if !self.shares_enumerator() {
            self.features.close()?;
        }
        Ok(())
    }
}

/// Use one column for both roles, so entry and feature ids share a space.
pub fn as_paired(single: &Enumerating) -> PairedEnumerating {
    PairedEnumerating::new(single.clone(), single.clone())
}

pub fn as_entry_only(paired: &PairedEnumerating) -> Enumerating {
    paired.entries.clone()
}

pub fn as_feature_only(paired: &PairedEnumerating) -> Enumerating {
    paired.features.clone()
}

/// Same enumerator, different answer to "is this column integer-encoded".
pub fn with_enumeration_flag(delegate: &Enumerating, enabled: bool) -> Enumerating {
    Enumerating::new(delegate.enumerator.clone(), enabled)
}

/// [`with_enumeration_flag`] applied to both columns.
pub fn with_pair_enumeration_flag(delegate: &PairedEnumerating, enabled: bool) -> PairedEnumerating {
    PairedEnumerating::new(
        with_enumeration_flag(&delegate.entries, enabled),
        with_enumeration_flag(&delegate.features, enabled),
    )
}
