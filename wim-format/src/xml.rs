//! The XML metadata resource: a UTF-16LE-encoded XML document listing
//! every image in the container.
//!
//! The resource is read and written through `wim-format`'s normal
//! resource engine like any other resource; this module only concerns
//! itself with the text inside it. We model the document with `serde` and
//! `quick-xml`'s serializer/deserializer rather than hand-rolling a
//! tag-by-tag writer.

use serde::{Deserialize, Serialize};

use crate::error::FormatResult;

/// A single `<IMAGE>` element: the per-image record stored in the
/// container's XML metadata resource.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename = "IMAGE")]
pub struct ImageXmlInfo {
    /// 1-based image index, stored as the `INDEX` attribute.
    #[serde(rename = "@INDEX")]
    pub index: u32,
    /// Display name of the image.
    #[serde(rename = "NAME", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Free-text description.
    #[serde(rename = "DESCRIPTION", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Display name shown by image-selection UIs.
    #[serde(rename = "DISPLAYNAME", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Number of directories in the image.
    #[serde(rename = "DIRCOUNT")]
    pub dir_count: u64,
    /// Number of files in the image.
    #[serde(rename = "FILECOUNT")]
    pub file_count: u64,
    /// Total uncompressed size in bytes of every stream in the image
    /// (counting duplicates once per reference, not deduplicated).
    #[serde(rename = "TOTALBYTES")]
    pub total_bytes: u64,
    /// Total bytes saved in this image by hard links to files already
    /// counted.
    #[serde(rename = "HARDLINKBYTES", default)]
    pub hard_link_bytes: u64,
    /// Windows-format filetime of image creation.
    #[serde(rename = "CREATIONTIME", default)]
    pub creation_time: WimTimestamp,
    /// Windows-format filetime of the last modification to this image.
    #[serde(rename = "LASTMODIFICATIONTIME", default)]
    pub last_modification_time: WimTimestamp,
}

/// A Windows FILETIME split into high/low 32-bit halves, matching the
/// `<HIGHPART>`/`<LOWPART>` children wimlib's XML uses instead of a single
/// 64-bit integer (kept for readability by tools that only understand
/// 32-bit integers).
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WimTimestamp {
    /// High 32 bits of the FILETIME.
    #[serde(rename = "HIGHPART")]
    pub high_part: u32,
    /// Low 32 bits of the FILETIME.
    #[serde(rename = "LOWPART")]
    pub low_part: u32,
}

impl WimTimestamp {
    /// Builds a timestamp from a raw 64-bit Windows FILETIME.
    pub fn from_filetime(filetime: u64) -> Self {
        Self {
            high_part: (filetime >> 32) as u32,
            low_part: filetime as u32,
        }
    }

    /// Recovers the raw 64-bit Windows FILETIME.
    pub fn to_filetime(self) -> u64 {
        ((self.high_part as u64) << 32) | self.low_part as u64
    }
}

/// The full contents of the XML metadata resource.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename = "WIM")]
pub struct WimXmlData {
    /// Sum of every part's on-disk size, for spanned sets.
    #[serde(rename = "TOTALBYTES", default)]
    pub total_bytes: u64,
    /// One record per image, in image-index order. The blob table's
    /// ordering of metadata-flagged entries is the authoritative image
    /// index; this list must agree with it.
    #[serde(rename = "IMAGE", default)]
    pub images: Vec<ImageXmlInfo>,
}

impl WimXmlData {
    /// Parses a UTF-16LE-encoded XML document (the literal bytes of the
    /// XML metadata resource) into [`WimXmlData`].
    pub fn parse(utf16le_bytes: &[u8]) -> FormatResult<Self> {
        let text = decode_utf16le(utf16le_bytes)?;
        // The document may carry a leading BOM or trailing NUL the way
        // wimlib's writer emits it; quick-xml tolerates a BOM but not a
        // trailing NUL terminator, so trim both before parsing.
        let trimmed = text.trim_end_matches('\0');
        let data: Self = quick_xml::de::from_str(trimmed)
            .map_err(|e| crate::error::FormatError::InvalidMetadataResource(e.to_string()))?;
        Ok(data)
    }

    /// Serializes this structure to UTF-16LE bytes with a leading BOM,
    /// matching the on-disk encoding of the real format.
    pub fn to_bytes(&self) -> FormatResult<Vec<u8>> {
        let text = quick_xml::se::to_string(self)
            .map_err(|e| crate::error::FormatError::InvalidMetadataResource(e.to_string()))?;
        Ok(encode_utf16le(&text))
    }
}

fn decode_utf16le(bytes: &[u8]) -> FormatResult<String> {
    let mut bytes = bytes;
    // Skip a UTF-16LE byte-order mark if present.
    if bytes.starts_with(&[0xFF, 0xFE]) {
        bytes = &bytes[2..];
    }
    if bytes.len() % 2 != 0 {
        return Err(crate::error::FormatError::InvalidMetadataResource(
            "XML resource has an odd byte length for UTF-16".to_string(),
        )
        .into());
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units)
        .map_err(|e| crate::error::FormatError::InvalidMetadataResource(e.to_string()).into())
}

fn encode_utf16le(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() * 2 + 2);
    out.extend_from_slice(&[0xFF, 0xFE]);
    for unit in text.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_utf16() {
        let data = WimXmlData {
            total_bytes: 1234,
            images: vec![ImageXmlInfo {
                index: 1,
                name: Some("A".to_string()),
                dir_count: 1,
                file_count: 1,
                total_bytes: 6,
                ..Default::default()
            }],
        };
        let bytes = data.to_bytes().unwrap();
        let parsed = WimXmlData::parse(&bytes).unwrap();
        assert_eq!(parsed, data);
    }
}
