//! Deterministic batch structuring for image-generation prompts.
//!
//! The library plans a batch up front (a manifest of shot categories and
//! poses), compiles it into a strict directive for a generative model,
//! reconciles the model's positional JSON response back onto the plan, and
//! optionally drives image synthesis with a sanitize-and-retry pass. An
//! anti-repetition log keeps scene settings fresh across batches, and
//! session state autosaves so interrupted runs resume.

pub mod config;
pub mod directive;
pub mod errors;
pub mod generation;
pub mod identity;
pub mod image;
pub mod manifest;
pub mod orchestrator;
pub mod persist;
pub mod reconcile;
pub mod repetition;
pub mod session;
