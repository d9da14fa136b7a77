pub mod allpairs;
pub mod chunker;
pub mod config;
pub mod count;
pub mod enumerator;
pub mod error;
pub mod files_handling;
pub mod filter;
pub mod knn;
pub mod logging;
pub mod measure;
pub mod merge;
pub mod pipeline;
pub mod records;
pub mod run;
pub mod scheduler;
pub mod sort;
pub mod vector;
pub mod weighting;

pub use error::{Result, ThesaurusError};
pub use run::Run;
