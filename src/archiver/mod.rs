pub mod link_type;
pub mod local;
pub mod monolith;
pub mod orchestrator;
pub mod pipeline;
pub mod producers;
pub mod readability;
pub mod settings;

pub use link_type::{classify_content_type, ImageExtension, LinkTypeResolver, ProbeError, ResolvedType};
pub use local::LocalProducers;
pub use monolith::{create_complete_html, MonolithConfig};
pub use orchestrator::{reconcile_title, ArchiveError, Archiver};
pub use producers::ArtifactProducers;
pub use settings::ArchivalSettings;
