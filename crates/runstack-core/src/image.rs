//! Container image references.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::StackConfig;

/// A registry image reference: `gcr.io/my-project/my-api:v1`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageRef {
    pub registry: String,
    pub project: String,
    pub name: String,
    pub tag: Option<String>,
}

#[derive(Debug, Error)]
pub enum ImageRefError {
    #[error("invalid image reference: {0}")]
    Invalid(String),
}

impl ImageRef {
    /// The image a stack builds: `<registry>/<project>/<stack name>[:tag]`.
    pub fn for_stack(config: &StackConfig) -> Self {
        ImageRef {
            registry: config.image.registry.clone(),
            project: config.provider.project.clone(),
            name: config.stack.name.clone(),
            tag: config.image.tag.clone(),
        }
    }

    pub fn parse(reference: &str) -> Result<Self, ImageRefError> {
        let invalid = || ImageRefError::Invalid(reference.to_string());
        let (registry, rest) = reference.split_once('/').ok_or_else(invalid)?;
        let (project, name_tag) = rest.split_once('/').ok_or_else(invalid)?;
        let (name, tag) = match name_tag.rsplit_once(':') {
            Some((name, tag)) if !tag.is_empty() => (name, Some(tag.to_string())),
            Some(_) => return Err(invalid()),
            None => (name_tag, None),
        };
        if registry.is_empty() || project.is_empty() || name.is_empty() {
            return Err(invalid());
        }
        Ok(ImageRef {
            registry: registry.to_string(),
            project: project.to_string(),
            name: name.to_string(),
            tag,
        })
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.registry, self.project, self.name)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_untagged() {
        let image = ImageRef::parse("gcr.io/proj1/svc1").unwrap();
        assert_eq!(image.registry, "gcr.io");
        assert_eq!(image.project, "proj1");
        assert_eq!(image.name, "svc1");
        assert_eq!(image.tag, None);
    }

    #[test]
    fn test_parse_tagged() {
        let image = ImageRef::parse("gcr.io/proj1/svc1:v2").unwrap();
        assert_eq!(image.tag.as_deref(), Some("v2"));
        assert_eq!(image.to_string(), "gcr.io/proj1/svc1:v2");
    }

    #[test]
    fn test_parse_rejects_short() {
        assert!(ImageRef::parse("svc1").is_err());
        assert!(ImageRef::parse("gcr.io/svc1").is_err());
        assert!(ImageRef::parse("gcr.io/proj1/svc1:").is_err());
    }
}
