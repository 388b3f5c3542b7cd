//! Language registry and project language detection.
//!
//! Maps each language to what the resolver can do with it: whether a SCIP
//! index can be built and how its reference roles are encoded, which analyzer
//! to launch for live queries, and how expensive each analyzer instance is.
mod detect;
mod registry;

pub use detect::{count_languages, detect_project_language, oldest_source_mtime, relative_path};
pub use registry::{
    roles, AnalyzerCommand, Framing, GenerateCommand, IndexSupport, LanguageCapabilities,
    LanguageRegistry, ResourceProfile, RolePolicy,
};
