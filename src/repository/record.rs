use serde::{Deserialize, Serialize};

pub const FORMAT_VERSION: &str = "1";

/// Metadata stored next to every image as `index.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ImageRecord {
    pub format_version: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub build: String,
}

impl ImageRecord {
    pub fn new(version: &str, created: &str, description: &str, build: &str) -> Self {
        ImageRecord {
            format_version: FORMAT_VERSION.to_string(),
            version: version.to_string(),
            created: created.to_string(),
            description: description.to_string(),
            build: build.to_string(),
        }
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }
}
