//! Small closed vocabularies shared across layers.

use serde::{Deserialize, Serialize};

/// Image format tag persisted with every photo.
///
/// The numeric discriminants are part of the stored format and must not
/// be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhotoExt {
    Jpg = 1,
    Png = 2,
    Gif = 3,
}

impl PhotoExt {
    pub fn as_str(self) -> &'static str {
        match self {
            PhotoExt::Jpg => "jpg",
            PhotoExt::Png => "png",
            PhotoExt::Gif => "gif",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "jpg" | "jpeg" => Some(PhotoExt::Jpg),
            "png" => Some(PhotoExt::Png),
            "gif" => Some(PhotoExt::Gif),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ext_parse_accepts_known_formats() {
        assert_eq!(PhotoExt::parse("jpg"), Some(PhotoExt::Jpg));
        assert_eq!(PhotoExt::parse("jpeg"), Some(PhotoExt::Jpg));
        assert_eq!(PhotoExt::parse("png"), Some(PhotoExt::Png));
        assert_eq!(PhotoExt::parse("gif"), Some(PhotoExt::Gif));
        assert_eq!(PhotoExt::parse("bmp"), None);
    }

    #[test]
    fn ext_as_str_roundtrip() {
        for ext in [PhotoExt::Jpg, PhotoExt::Png, PhotoExt::Gif] {
            assert_eq!(PhotoExt::parse(ext.as_str()), Some(ext));
        }
    }
}
