use serde::{Deserialize, Deserializer};

use crate::{
    error::{Error, Result},
    statistics::Value,
};

/// Dump statistics the engine records for one snapshot. Times are in
/// microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DumpStats {
    #[serde(alias = "freezingTime", deserialize_with = "de_u64")]
    pub freezing_time: u64,
    #[serde(alias = "frozenTime", deserialize_with = "de_u64")]
    pub frozen_time: u64,
    #[serde(alias = "memdumpTime", deserialize_with = "de_u64")]
    pub memdump_time: u64,
    #[serde(alias = "memwriteTime", deserialize_with = "de_u64")]
    pub memwrite_time: u64,
    #[serde(alias = "pagesScanned", deserialize_with = "de_u64")]
    pub pages_scanned: u64,
    #[serde(alias = "pagesSkippedParent", deserialize_with = "de_u64")]
    pub pages_skipped_parent: u64,
    #[serde(alias = "pagesWritten", deserialize_with = "de_u64")]
    pub pages_written: u64,
}

#[derive(Deserialize)]
struct StatsImage {
    entries: Vec<StatsEntry>,
}

#[derive(Deserialize)]
struct StatsEntry {
    dump: Option<DumpStats>,
}

// Decoders render 64-bit integers either as numbers or as strings.
fn de_u64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrString {
        Num(u64),
        Str(String),
    }

    match NumOrString::deserialize(deserializer)? {
        NumOrString::Num(n) => Ok(n),
        NumOrString::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

impl DumpStats {
    /// Parses the JSON rendering of a `stats-dump` image.
    pub fn from_image_json(json: &str) -> Result<Self> {
        let image: StatsImage = serde_json::from_str(json)?;

        image
            .entries
            .into_iter()
            .next()
            .ok_or_else(|| Error::InvalidStats("stats image has no entries".to_string()))?
            .dump
            .ok_or_else(|| Error::InvalidStats("stats entry has no dump record".to_string()))
    }

    pub fn statistics(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("pages_written", Value::Int(self.pages_written)),
            ("pages_scanned", Value::Int(self.pages_scanned)),
            ("pages_skipped_parent", Value::Int(self.pages_skipped_parent)),
            ("freezing_time_us", Value::Int(self.freezing_time)),
            ("frozen_time_us", Value::Int(self.frozen_time)),
            ("memdump_time_us", Value::Int(self.memdump_time)),
            ("memwrite_time_us", Value::Int(self.memwrite_time)),
        ]
    }
}
