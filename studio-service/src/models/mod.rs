//! Domain models for the studio service.

pub mod dialogue;
pub mod edit;
pub mod image;

pub use dialogue::{DialogueTurn, Role, Transcript};
pub use edit::{EditLimits, EditSession, GenerationJob, GenerationKind};
pub use image::{AspectRatio, ImageBlob};
