//! Shared utility functions for evo-forge.
//!
//! Currently JSON extraction from completion-service responses.

pub mod json_extraction;

pub use json_extraction::{
    analyze_json_structure, extract_last_valid_json_object, find_matching_brace,
    parse_json_object, try_extract_json_object, JsonExtractionError, JsonExtractionResult,
    JsonStructureAnalysis,
};
