//! Logical service types served by the router.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A logical AI service. The set is closed and fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceType {
    Chat,
    Embedding,
    Rerank,
    Tts,
    Stt,
    #[serde(alias = "imgGen", alias = "img_gen")]
    ImgGen,
    #[serde(alias = "imgEdit", alias = "img_edit")]
    ImgEdit,
}

impl ServiceType {
    pub const ALL: [ServiceType; 7] = [
        ServiceType::Chat,
        ServiceType::Embedding,
        ServiceType::Rerank,
        ServiceType::Tts,
        ServiceType::Stt,
        ServiceType::ImgGen,
        ServiceType::ImgEdit,
    ];

    /// Key used in configuration files and scope keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Chat => "chat",
            ServiceType::Embedding => "embedding",
            ServiceType::Rerank => "rerank",
            ServiceType::Tts => "tts",
            ServiceType::Stt => "stt",
            ServiceType::ImgGen => "img-gen",
            ServiceType::ImgEdit => "img-edit",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string names no known service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown service type: {0}")]
pub struct UnknownServiceType(pub String);

impl FromStr for ServiceType {
    type Err = UnknownServiceType;

    /// Accepts `img-gen`, `imgGen`, `img_gen` and case variants of each.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .flat_map(char::to_lowercase)
            .collect();

        match normalized.as_str() {
            "chat" => Ok(ServiceType::Chat),
            "embedding" => Ok(ServiceType::Embedding),
            "rerank" => Ok(ServiceType::Rerank),
            "tts" => Ok(ServiceType::Tts),
            "stt" => Ok(ServiceType::Stt),
            "imggen" => Ok(ServiceType::ImgGen),
            "imgedit" => Ok(ServiceType::ImgEdit),
            _ => Err(UnknownServiceType(s.to_string())),
        }
    }
}
