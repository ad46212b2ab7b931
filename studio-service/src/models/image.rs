//! Image payloads and the data-URL encoding they travel in.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Media type assumed when a data-URL does not declare an `image/*` type.
pub const DEFAULT_IMAGE_MIME: &str = "image/png";

/// Binary image content plus its declared media type.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageBlob {
    mime_type: String,
    bytes: Vec<u8>,
}

impl ImageBlob {
    pub fn new(mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            bytes,
        }
    }

    /// Parse `data:<mime>;base64,<payload>`.
    ///
    /// A missing or non-image media type falls back to `image/png`; the
    /// payload must be valid base64.
    pub fn from_data_url(data_url: &str) -> Result<Self, ValidationError> {
        let rest = data_url
            .strip_prefix("data:")
            .ok_or(ValidationError::MalformedDataUrl)?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or(ValidationError::MalformedDataUrl)?;
        let media = header
            .strip_suffix(";base64")
            .ok_or(ValidationError::MalformedDataUrl)?;

        let mime_type = if is_image_mime(media) {
            media.to_string()
        } else {
            DEFAULT_IMAGE_MIME.to_string()
        };

        let bytes = STANDARD
            .decode(payload.trim())
            .map_err(|_| ValidationError::MalformedDataUrl)?;

        Ok(Self { mime_type, bytes })
    }

    /// Build a blob from base64 text as returned inline by the provider.
    pub fn from_base64(mime_type: &str, data: &str) -> Result<Self, base64::DecodeError> {
        Ok(Self::new(mime_type, STANDARD.decode(data)?))
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

// Keep multi-megabyte payloads out of debug logs.
impl fmt::Debug for ImageBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageBlob")
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl Serialize for ImageBlob {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_data_url())
    }
}

impl<'de> Deserialize<'de> for ImageBlob {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ImageBlob::from_data_url(&raw).map_err(serde::de::Error::custom)
    }
}

/// `image/<word>` with a non-empty alphanumeric subtype.
pub fn is_image_mime(media: &str) -> bool {
    media
        .strip_prefix("image/")
        .map(|sub| !sub.is_empty() && sub.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(false)
}

/// Output aspect ratios the image model accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
    #[default]
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "4:3")]
    Standard,
    #[serde(rename = "3:4")]
    StandardPortrait,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 5] = [
        AspectRatio::Landscape,
        AspectRatio::Portrait,
        AspectRatio::Square,
        AspectRatio::Standard,
        AspectRatio::StandardPortrait,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Landscape => "16:9",
            AspectRatio::Portrait => "9:16",
            AspectRatio::Square => "1:1",
            AspectRatio::Standard => "4:3",
            AspectRatio::StandardPortrait => "3:4",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AspectRatio::ALL
            .into_iter()
            .find(|ratio| ratio.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownAspectRatio(s.to_string()))
    }
}
