use crate::db::{Tag, User};

/// Which artifacts to produce for one link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchivalSettings {
    pub screenshot: bool,
    pub monolith: bool,
    pub pdf: bool,
    pub readable: bool,
    pub wayback: bool,
    pub ai_tag: bool,
}

impl ArchivalSettings {
    /// Effective settings for a link.
    ///
    /// If any attached tag turns an override on, only those tags decide (OR
    /// across them, unset counting as false). Otherwise the owner's defaults
    /// apply.
    #[must_use]
    pub fn resolve(owner: &User, tags: &[Tag]) -> Self {
        let archival: Vec<&Tag> = tags.iter().filter(|t| t.is_archival()).collect();

        if archival.is_empty() {
            return Self {
                screenshot: owner.archive_as_screenshot,
                monolith: owner.archive_as_monolith,
                pdf: owner.archive_as_pdf,
                readable: owner.archive_as_readable,
                wayback: owner.archive_as_wayback,
                ai_tag: owner.tagging_method().is_enabled(),
            };
        }

        let any = |f: fn(&Tag) -> Option<bool>| archival.iter().any(|t| f(t).unwrap_or(false));
        Self {
            screenshot: any(|t| t.archive_as_screenshot),
            monolith: any(|t| t.archive_as_monolith),
            pdf: any(|t| t.archive_as_pdf),
            readable: any(|t| t.archive_as_readable),
            wayback: any(|t| t.archive_as_wayback),
            ai_tag: any(|t| t.ai_tag),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> User {
        User {
            id: 1,
            username: "alice".to_string(),
            ai_tagging_method: "generate".to_string(),
            ai_predefined_tags: None,
            archive_as_screenshot: true,
            archive_as_monolith: true,
            archive_as_pdf: false,
            archive_as_readable: true,
            archive_as_wayback: false,
        }
    }

    fn tag(name: &str) -> Tag {
        Tag {
            id: 0,
            owner_id: 1,
            name: name.to_string(),
            archive_as_screenshot: None,
            archive_as_monolith: None,
            archive_as_pdf: None,
            archive_as_readable: None,
            archive_as_wayback: None,
            ai_tag: None,
        }
    }

    #[test]
    fn test_owner_defaults_without_archival_tags() {
        let settings = ArchivalSettings::resolve(&owner(), &[tag("plain")]);
        assert_eq!(
            settings,
            ArchivalSettings {
                screenshot: true,
                monolith: true,
                pdf: false,
                readable: true,
                wayback: false,
                ai_tag: true,
            }
        );
    }

    #[test]
    fn test_archival_tags_replace_defaults_entirely() {
        let pdf_only = Tag {
            archive_as_pdf: Some(true),
            ..tag("papers")
        };
        let wayback = Tag {
            archive_as_wayback: Some(true),
            archive_as_screenshot: Some(false),
            ..tag("web")
        };

        let settings = ArchivalSettings::resolve(&owner(), &[pdf_only, wayback, tag("plain")]);
        assert_eq!(
            settings,
            ArchivalSettings {
                screenshot: false,
                monolith: false,
                pdf: true,
                readable: false,
                wayback: true,
                ai_tag: false,
            }
        );
    }

    #[test]
    fn test_tag_with_only_false_overrides_keeps_owner_defaults() {
        let opt_out = Tag {
            archive_as_screenshot: Some(false),
            archive_as_pdf: Some(false),
            ..tag("no-screens")
        };
        assert!(!opt_out.is_archival());

        let settings = ArchivalSettings::resolve(&owner(), &[opt_out]);
        assert_eq!(settings, ArchivalSettings::resolve(&owner(), &[]));
        assert!(settings.screenshot);
        assert!(settings.monolith);
        assert!(settings.readable);
    }

    #[test]
    fn test_disabled_tagging_owner() {
        let owner = User {
            ai_tagging_method: "disabled".to_string(),
            ..owner()
        };
        assert!(!ArchivalSettings::resolve(&owner, &[]).ai_tag);
    }
}
