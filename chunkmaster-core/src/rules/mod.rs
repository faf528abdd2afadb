// Main rules module - delegates to semantic sub-modules
// This file coordinates the rule system but actual implementations are in:
// - engine.rs: RestructureEngine, the PartRule trait and part assembly
// - segmenter.rs: intro / parts / conclusion segmentation
// - fields.rs: objective, concepts, reflection and instruction prompt
// - substructures.rs: nucleus steps, routes and pitfalls
// - metadata.rs: positional metadata and in-text overrides
// - sanitizer.rs: strips consumed labels from part bodies
// - hierarchy_repair.rs: achievement / sub-challenge nesting repair
// - validation.rs: read-only checks over the built model
// - labels.rs, fragment_ops.rs: shared label and fragment helpers

pub mod engine;
pub mod fields;
pub mod fragment_ops;
pub mod hierarchy_repair;
pub mod labels;
pub mod metadata;
pub mod sanitizer;
pub mod segmenter;
pub mod substructures;
pub mod validation;

pub use engine::*;
