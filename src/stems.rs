//! Separation parameters: stem layout, output format and bitrate.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Invalid separation parameter. The message is shown to the client as-is.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParamError {
    #[error("Stems must be one of: 2stems, 4stems, 5stems (got '{0}')")]
    Stems(String),
    #[error("Format must be one of: {allowed} (got '{got}')")]
    Format { got: String, allowed: String },
    #[error("Bitrate must be in format like '320k' or a number (got '{0}')")]
    Bitrate(String),
}

// ---------------------------------------------------------------------------
// StemType
// ---------------------------------------------------------------------------

/// Which pretrained model to run, named after the number of stems it yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StemType {
    #[serde(rename = "2stems")]
    TwoStems,
    #[serde(rename = "4stems")]
    FourStems,
    #[serde(rename = "5stems")]
    FiveStems,
}

impl StemType {
    pub const ALL: [StemType; 3] = [Self::TwoStems, Self::FourStems, Self::FiveStems];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TwoStems => "2stems",
            Self::FourStems => "4stems",
            Self::FiveStems => "5stems",
        }
    }

    /// Instrument names the model writes, one file each.
    pub fn stem_names(&self) -> &'static [&'static str] {
        match self {
            Self::TwoStems => &["vocals", "accompaniment"],
            Self::FourStems => &["vocals", "drums", "bass", "other"],
            Self::FiveStems => &["vocals", "drums", "bass", "piano", "other"],
        }
    }

    /// Model descriptor passed to `spleeter separate -p`.
    pub fn model_name(&self) -> String {
        format!("spleeter:{}", self.as_str())
    }
}

impl fmt::Display for StemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StemType {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|stems| stems.as_str() == s)
            .ok_or_else(|| ParamError::Stems(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// OutputFormat
// ---------------------------------------------------------------------------

/// Container/codec of the produced stem files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Aac,
    Flac,
    M4a,
    Mp3,
    Ogg,
    Wav,
}

impl OutputFormat {
    /// Alphabetical, which is also the order used in error messages.
    pub const ALL: [OutputFormat; 6] = [
        Self::Aac,
        Self::Flac,
        Self::M4a,
        Self::Mp3,
        Self::Ogg,
        Self::Wav,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aac => "aac",
            Self::Flac => "flac",
            Self::M4a => "m4a",
            Self::Mp3 => "mp3",
            Self::Ogg => "ogg",
            Self::Wav => "wav",
        }
    }

    fn allowed_list() -> String {
        Self::ALL.map(|f| f.as_str()).join(", ")
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|format| format.as_str() == lower)
            .ok_or_else(|| ParamError::Format {
                got: s.to_string(),
                allowed: Self::allowed_list(),
            })
    }
}

// ---------------------------------------------------------------------------
// Bitrate
// ---------------------------------------------------------------------------

/// Encoder bitrate: digits with an optional `k` suffix (`320k`, `128000`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitrate(String);

impl Bitrate {
    pub fn parse(value: &str) -> Result<Self, ParamError> {
        let digits = value.strip_suffix('k').unwrap_or(value);
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(ParamError::Bitrate(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Bitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stem_names_per_layout() {
        assert_eq!(StemType::TwoStems.stem_names(), ["vocals", "accompaniment"]);
        assert_eq!(StemType::FourStems.stem_names().len(), 4);
        assert_eq!(
            StemType::FiveStems.stem_names(),
            ["vocals", "drums", "bass", "piano", "other"]
        );
    }

    #[test]
    fn stem_type_parses_wire_names() {
        assert_eq!("4stems".parse::<StemType>().unwrap(), StemType::FourStems);
        assert!("4".parse::<StemType>().is_err());
        assert!("4STEMS".parse::<StemType>().is_err());
    }

    #[test]
    fn stem_type_serializes_as_wire_name() {
        let json = serde_json::to_string(&StemType::FiveStems).unwrap();
        assert_eq!(json, "\"5stems\"");
    }

    #[test]
    fn model_name_prefixes_spleeter() {
        assert_eq!(StemType::TwoStems.model_name(), "spleeter:2stems");
    }

    #[test]
    fn format_is_case_insensitive() {
        assert_eq!("MP3".parse::<OutputFormat>().unwrap(), OutputFormat::Mp3);
        assert_eq!("Flac".parse::<OutputFormat>().unwrap(), OutputFormat::Flac);
    }

    #[test]
    fn unknown_format_lists_allowed_sorted() {
        let err = "opus".parse::<OutputFormat>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Format must be one of: aac, flac, m4a, mp3, ogg, wav (got 'opus')"
        );
    }

    #[test]
    fn bitrate_accepts_k_suffix_and_plain_number() {
        assert_eq!(Bitrate::parse("320k").unwrap().as_str(), "320k");
        assert_eq!(Bitrate::parse("128000").unwrap().as_str(), "128000");
    }

    #[test]
    fn bitrate_rejects_malformed() {
        assert!(Bitrate::parse("").is_err());
        assert!(Bitrate::parse("k").is_err());
        assert!(Bitrate::parse("fast").is_err());
        assert!(Bitrate::parse("320kbps").is_err());
        assert!(Bitrate::parse("-320k").is_err());
    }
}
