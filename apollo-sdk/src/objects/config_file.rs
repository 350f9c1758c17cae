use serde::{Deserialize, Serialize};

/// Output format of a rendered config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigFileFormat {
    Properties,
    Json,
}

impl ConfigFileFormat {
    /// Tag used as the first component of a config file cache key.
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigFileFormat::Properties => "properties",
            ConfigFileFormat::Json => "json",
        }
    }

    /// `Content-Type` the server answers with.
    pub fn content_type(self) -> &'static str {
        match self {
            ConfigFileFormat::Properties => "text/plain;charset=UTF-8",
            ConfigFileFormat::Json => "application/json;charset=UTF-8",
        }
    }
}

impl std::fmt::Display for ConfigFileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
