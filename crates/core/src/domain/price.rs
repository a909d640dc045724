use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetalType {
    Gold,
    Silver,
}

impl MetalType {
    pub const ALL: [MetalType; 2] = [MetalType::Gold, MetalType::Silver];

    pub fn as_str(self) -> &'static str {
        match self {
            MetalType::Gold => "gold",
            MetalType::Silver => "silver",
        }
    }
}

impl fmt::Display for MetalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetalType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gold" => Ok(MetalType::Gold),
            "silver" => Ok(MetalType::Silver),
            other => anyhow::bail!("unknown metal type: {other:?}"),
        }
    }
}

/// One stored price per (date, metal).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPriceRecord {
    pub date: NaiveDate,
    pub metal_type: MetalType,
    pub price: f64,
}

/// Both spot prices extracted from a single feed response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub gold: f64,
    pub silver: f64,
}

impl Quote {
    pub fn price(&self, metal: MetalType) -> f64 {
        match metal {
            MetalType::Gold => self.gold,
            MetalType::Silver => self.silver,
        }
    }

    pub fn pairs(&self) -> [(MetalType, f64); 2] {
        [(MetalType::Gold, self.gold), (MetalType::Silver, self.silver)]
    }
}
