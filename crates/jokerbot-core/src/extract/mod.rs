mod extractor;
mod gate;

pub use extractor::{
    ExtractionError, ExtractionResult, Extractor, ExtractorConfig, MatchSet, PhraseSet,
    DEFAULT_MATCH_PATTERN,
};
pub use gate::{should_process, EventGate};
