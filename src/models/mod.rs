pub mod record;

pub use record::{CorpusLine, FileRecord};
