pub mod chat;
pub mod credential_gate;
pub mod image_edit;
pub mod metrics;
pub mod providers;
pub mod workspace;

pub use chat::ChatConversation;
pub use credential_gate::CredentialGate;
pub use image_edit::ImageEditor;
pub use workspace::{WorkspaceUser, Workspaces};
