use serde::{Deserialize, Serialize};

use crate::constants::UNAVAILABLE;

/// Classified kind of a link's target resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Url,
    Pdf,
    Image,
}

impl LinkType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Url => "url",
            Self::Pdf => "pdf",
            Self::Image => "image",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "url" => Some(Self::Url),
            "pdf" => Some(Self::Pdf),
            "image" => Some(Self::Image),
            _ => None,
        }
    }
}

/// How (and whether) a user wants links auto-tagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiTaggingMethod {
    Disabled,
    /// Let the model invent tags freely.
    Generate,
    /// Only pick from the user's predefined tag list.
    Predefined,
    /// Only pick from tags the user already has.
    Existing,
}

impl AiTaggingMethod {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Generate => "generate",
            Self::Predefined => "predefined",
            Self::Existing => "existing",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "disabled" => Some(Self::Disabled),
            "generate" => Some(Self::Generate),
            "predefined" => Some(Self::Predefined),
            "existing" => Some(Self::Existing),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

/// One of the per-link artifact status columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactField {
    Readable,
    Image,
    Monolith,
    Pdf,
    Preview,
}

impl ArtifactField {
    pub const ALL: [Self; 5] = [
        Self::Readable,
        Self::Image,
        Self::Monolith,
        Self::Pdf,
        Self::Preview,
    ];

    #[must_use]
    pub fn column(&self) -> &'static str {
        match self {
            Self::Readable => "readable",
            Self::Image => "image",
            Self::Monolith => "monolith",
            Self::Pdf => "pdf",
            Self::Preview => "preview",
        }
    }
}

/// A bookmarked link.
///
/// Artifact columns are NULL until a run has either stored the artifact (a path
/// relative to the storage root) or given up on it (`"unavailable"`).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Link {
    pub id: i64,
    pub collection_id: i64,
    pub owner_id: i64,
    pub name: String,
    pub url: Option<String>,
    #[sqlx(rename = "type")]
    pub link_type: String,
    pub readable: Option<String>,
    pub image: Option<String>,
    pub monolith: Option<String>,
    pub pdf: Option<String>,
    pub preview: Option<String>,
    pub ai_tagged: bool,
    pub last_preserved: Option<String>,
    pub created_at: String,
}

impl Link {
    #[must_use]
    pub fn type_enum(&self) -> Option<LinkType> {
        LinkType::from_str(&self.link_type)
    }

    #[must_use]
    pub fn artifact(&self, field: ArtifactField) -> Option<&str> {
        match field {
            ArtifactField::Readable => self.readable.as_deref(),
            ArtifactField::Image => self.image.as_deref(),
            ArtifactField::Monolith => self.monolith.as_deref(),
            ArtifactField::Pdf => self.pdf.as_deref(),
            ArtifactField::Preview => self.preview.as_deref(),
        }
    }

    /// Whether a previous run already settled this artifact.
    #[must_use]
    pub fn is_populated(&self, field: ArtifactField) -> bool {
        self.artifact(field).is_some()
    }

    /// Whether the artifact is a stored file (not `"unavailable"`).
    #[must_use]
    pub fn has_stored(&self, field: ArtifactField) -> bool {
        self.artifact(field).is_some_and(|v| v != UNAVAILABLE)
    }
}

/// Owner of links and tags, carrying archival defaults.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub ai_tagging_method: String,
    /// JSON array of tag names used by the `predefined` tagging method.
    pub ai_predefined_tags: Option<String>,
    pub archive_as_screenshot: bool,
    pub archive_as_monolith: bool,
    pub archive_as_pdf: bool,
    pub archive_as_readable: bool,
    pub archive_as_wayback: bool,
}

impl User {
    /// Unknown values are treated as disabled.
    #[must_use]
    pub fn tagging_method(&self) -> AiTaggingMethod {
        AiTaggingMethod::from_str(&self.ai_tagging_method).unwrap_or(AiTaggingMethod::Disabled)
    }

    #[must_use]
    pub fn predefined_tags(&self) -> Vec<String> {
        self.ai_predefined_tags
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }
}

/// A tag, optionally carrying archival overrides.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tag {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub archive_as_screenshot: Option<bool>,
    pub archive_as_monolith: Option<bool>,
    pub archive_as_pdf: Option<bool>,
    pub archive_as_readable: Option<bool>,
    pub archive_as_wayback: Option<bool>,
    pub ai_tag: Option<bool>,
}

impl Tag {
    /// A tag takes part in archival settings once it turns an override on.
    ///
    /// Overrides that are only ever `false` add nothing to the OR across tags,
    /// so such a tag leaves the owner's defaults in effect.
    #[must_use]
    pub fn is_archival(&self) -> bool {
        [
            self.archive_as_screenshot,
            self.archive_as_monolith,
            self.archive_as_pdf,
            self.archive_as_readable,
            self.archive_as_wayback,
            self.ai_tag,
        ]
        .into_iter()
        .any(|flag| flag.unwrap_or(false))
    }
}

/// Everything the orchestrator needs to archive one link.
#[derive(Debug, Clone)]
pub struct ArchivalTarget {
    pub link: Link,
    pub owner: User,
    pub tags: Vec<Tag>,
}

/// Partial update of a link. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkPatch {
    pub name: Option<String>,
    pub link_type: Option<LinkType>,
    pub readable: Option<String>,
    pub image: Option<String>,
    pub monolith: Option<String>,
    pub pdf: Option<String>,
    pub preview: Option<String>,
    pub ai_tagged: Option<bool>,
    pub last_preserved: Option<String>,
}

impl LinkPatch {
    /// Patch setting a single artifact column.
    #[must_use]
    pub fn artifact(field: ArtifactField, value: impl Into<String>) -> Self {
        let mut patch = Self::default();
        patch.set_artifact(field, value);
        patch
    }

    pub fn set_artifact(&mut self, field: ArtifactField, value: impl Into<String>) {
        let value = Some(value.into());
        match field {
            ArtifactField::Readable => self.readable = value,
            ArtifactField::Image => self.image = value,
            ArtifactField::Monolith => self.monolith = value,
            ArtifactField::Pdf => self.pdf = value,
            ArtifactField::Preview => self.preview = value,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Data for inserting a new user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub ai_tagging_method: AiTaggingMethod,
    pub ai_predefined_tags: Vec<String>,
    pub archive_as_screenshot: bool,
    pub archive_as_monolith: bool,
    pub archive_as_pdf: bool,
    pub archive_as_readable: bool,
    pub archive_as_wayback: bool,
}

impl Default for NewUser {
    fn default() -> Self {
        Self {
            username: "user".to_string(),
            ai_tagging_method: AiTaggingMethod::Disabled,
            ai_predefined_tags: Vec::new(),
            archive_as_screenshot: true,
            archive_as_monolith: true,
            archive_as_pdf: false,
            archive_as_readable: true,
            archive_as_wayback: false,
        }
    }
}

/// Data for inserting a new link.
#[derive(Debug, Clone)]
pub struct NewLink {
    pub collection_id: i64,
    pub owner_id: i64,
    pub name: String,
    pub url: Option<String>,
}

/// Data for inserting a new tag.
#[derive(Debug, Clone, Default)]
pub struct NewTag {
    pub owner_id: i64,
    pub name: String,
    pub archive_as_screenshot: Option<bool>,
    pub archive_as_monolith: Option<bool>,
    pub archive_as_pdf: Option<bool>,
    pub archive_as_readable: Option<bool>,
    pub archive_as_wayback: Option<bool>,
    pub ai_tag: Option<bool>,
}
