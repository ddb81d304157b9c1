//! Encode stage: typed value ↔ bytes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::PipelineError;

/// Wire format of the data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFormat {
    /// Compact JSON. Maps are BTreeMaps, so output is canonical.
    #[default]
    Json,
    /// Indented JSON, for saves meant to be read by people.
    PrettyJson,
    /// MessagePack with named fields.
    #[serde(rename = "msgpack")]
    MessagePack,
}

impl DataFormat {
    /// Encode `value`.
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, PipelineError> {
        match self {
            DataFormat::Json => serde_json::to_vec(value).map_err(|e| PipelineError::Encode(e.to_string())),
            DataFormat::PrettyJson => {
                serde_json::to_vec_pretty(value).map_err(|e| PipelineError::Encode(e.to_string()))
            }
            // Named so optional fields skipped on write don't shift positions.
            DataFormat::MessagePack => {
                rmp_serde::to_vec_named(value).map_err(|e| PipelineError::Encode(e.to_string()))
            }
        }
    }

    /// Decode bytes produced by [`encode`](DataFormat::encode).
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, PipelineError> {
        match self {
            DataFormat::Json | DataFormat::PrettyJson => {
                serde_json::from_slice(bytes).map_err(|e| PipelineError::Decode(e.to_string()))
            }
            DataFormat::MessagePack => {
                rmp_serde::from_slice(bytes).map_err(|e| PipelineError::Decode(e.to_string()))
            }
        }
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DataFormat::Json => "json",
            DataFormat::PrettyJson => "pretty_json",
            DataFormat::MessagePack => "msgpack",
        })
    }
}

impl std::str::FromStr for DataFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(DataFormat::Json),
            "pretty_json" | "pretty" => Ok(DataFormat::PrettyJson),
            "msgpack" | "messagepack" => Ok(DataFormat::MessagePack),
            other => Err(format!("unknown data format '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
        tags: BTreeMap<String, u32>,
    }

    fn sample() -> Sample {
        let mut tags = BTreeMap::new();
        tags.insert("b".to_string(), 2);
        tags.insert("a".to_string(), 1);
        Sample {
            name: "player".to_string(),
            note: None,
            tags,
        }
    }

    #[test]
    fn test_every_format_decodes_its_own_output() {
        for format in [DataFormat::Json, DataFormat::PrettyJson, DataFormat::MessagePack] {
            let bytes = format.encode(&sample()).unwrap();
            let back: Sample = format.decode(&bytes).unwrap();
            assert_eq!(back, sample(), "format {}", format);
        }
    }

    #[test]
    fn test_json_is_deterministic() {
        let a = DataFormat::Json.encode(&sample()).unwrap();
        let b = DataFormat::Json.encode(&sample()).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            String::from_utf8(a).unwrap(),
            r#"{"name":"player","tags":{"a":1,"b":2}}"#
        );
    }

    #[test]
    fn test_decode_garbage_is_error() {
        let err = DataFormat::Json.decode::<Sample>(b"{not json").unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("msgpack".parse::<DataFormat>().unwrap(), DataFormat::MessagePack);
        assert_eq!("PRETTY_JSON".parse::<DataFormat>().unwrap(), DataFormat::PrettyJson);
        assert!("yaml".parse::<DataFormat>().is_err());
    }
}
