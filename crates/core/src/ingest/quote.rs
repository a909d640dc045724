use crate::config::Settings;
use crate::domain::price::{MetalType, Quote};
use crate::error::ParseError;

/// Where each metal's quote sits in the feed text and how it is scaled.
#[derive(Debug, Clone)]
pub struct QuotePatterns {
    pub gold_key: String,
    pub silver_key: String,
    /// The feed reports silver multiplied by this factor.
    pub silver_divisor: f64,
}

impl Default for QuotePatterns {
    fn default() -> Self {
        Self {
            gold_key: "hq_str_gds_AUTD".to_string(),
            silver_key: "hq_str_gds_AGTD".to_string(),
            silver_divisor: 1000.0,
        }
    }
}

impl QuotePatterns {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            gold_key: settings.gold_quote_key.clone(),
            silver_key: settings.silver_quote_key.clone(),
            silver_divisor: settings.silver_price_divisor,
        }
    }

    fn key(&self, metal: MetalType) -> &str {
        match metal {
            MetalType::Gold => &self.gold_key,
            MetalType::Silver => &self.silver_key,
        }
    }
}

/// Extracts both prices or fails; a feed missing either metal yields no quote at all.
pub fn parse_quotes(text: &str, patterns: &QuotePatterns) -> Result<Quote, ParseError> {
    let gold = find_spot_price(text, patterns.key(MetalType::Gold), MetalType::Gold)?;
    let raw_silver = find_spot_price(text, patterns.key(MetalType::Silver), MetalType::Silver)?;
    let silver = round_to(raw_silver / patterns.silver_divisor, 4);

    if silver <= 0.0 {
        return Err(ParseError::InvalidPrice {
            metal: MetalType::Silver,
            raw: raw_silver.to_string(),
        });
    }

    Ok(Quote { gold, silver })
}

/// First `KEY="<decimal>,` occurrence whose leading field is a positive decimal.
fn find_spot_price(text: &str, key: &str, metal: MetalType) -> Result<f64, ParseError> {
    let needle = format!("{key}=\"");
    let mut rejected: Option<String> = None;

    for (idx, _) in text.match_indices(&needle) {
        let rest = &text[idx + needle.len()..];
        let field_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let field = &rest[..field_len];
        if field.is_empty() || !rest[field_len..].starts_with(',') {
            continue;
        }

        match field.parse::<f64>() {
            Ok(v) if v > 0.0 && v.is_finite() => return Ok(v),
            _ => {
                rejected.get_or_insert_with(|| field.to_string());
            }
        }
    }

    match rejected {
        Some(raw) => Err(ParseError::InvalidPrice { metal, raw }),
        None => Err(ParseError::MetalNotFound(metal)),
    }
}

fn round_to(v: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (v * factor).round() / factor
}
