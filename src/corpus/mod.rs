mod error;
mod evaluation;
mod fields;
mod protocols;
mod windows;

pub use error::CorpusError;
pub use evaluation::{evaluation_chunks, load_evaluation_cases, parse_evaluation_case};
pub use protocols::{build_chunks, load_protocol_records, parse_protocol_line};
pub use windows::{build_index_units, chunk_words};
