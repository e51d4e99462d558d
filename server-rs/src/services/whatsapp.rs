//! Turns a pasted WhatsApp thread into candidate transfer requests.
//!
//! The completion model only extracts fields; everything it returns is
//! normalized here so the UI gets enum values, short position codes and
//! whole-euro amounts regardless of how the message was phrased.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::completion::{extract_json, CompletionError, TextCompletionClient};
use crate::models::request::{DealType, Priority};

pub const SYSTEM_PROMPT: &str = r#"You extract football transfer requests from chat messages between agents and clubs.
Reply with JSON only, no prose, in this shape:
{"requests": [{
  "club": string, "country": string|null, "league": string|null,
  "position": string, "dealTypes": [string],
  "transferFeeMin": string|number|null, "transferFeeMax": string|number|null,
  "salaryMin": string|number|null, "salaryMax": string|number|null,
  "ageMin": number|null, "ageMax": number|null,
  "priority": "LOW"|"MEDIUM"|"HIGH"|"URGENT"|null, "notes": string|null,
  "confidence": {"<field>": number between 0 and 1}
}]}
One entry per distinct club need. Keep money as written (e.g. "€2.5M", "500k").
Use null for anything the message does not state."#;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    requests: Vec<RawCandidate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawCandidate {
    club: Option<String>,
    country: Option<String>,
    league: Option<String>,
    position: Option<String>,
    #[serde(alias = "dealType")]
    deal_types: Value,
    transfer_fee_min: Value,
    transfer_fee_max: Value,
    salary_min: Value,
    salary_max: Value,
    age_min: Option<i16>,
    age_max: Option<i16>,
    priority: Option<String>,
    notes: Option<String>,
    confidence: BTreeMap<String, f64>,
}

/// One parsed request, in the same field names bulk create accepts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestCandidate {
    pub club: String,
    pub country: Option<String>,
    pub league: Option<String>,
    pub position: String,
    pub deal_types: Vec<DealType>,
    pub priority: Option<Priority>,
    pub age_min: Option<i16>,
    pub age_max: Option<i16>,
    #[serde(rename = "transferFeeMinEUR")]
    pub transfer_fee_min_eur: Option<i64>,
    #[serde(rename = "transferFeeMaxEUR")]
    pub transfer_fee_max_eur: Option<i64>,
    #[serde(rename = "salaryMinEUR")]
    pub salary_min_eur: Option<i64>,
    #[serde(rename = "salaryMaxEUR")]
    pub salary_max_eur: Option<i64>,
    pub notes: Option<String>,
    pub confidence: BTreeMap<String, f64>,
    pub overall_confidence: f64,
}

pub async fn parse_message(
    client: &TextCompletionClient,
    text: &str,
) -> Result<Vec<RequestCandidate>, CompletionError> {
    let reply = client.complete(SYSTEM_PROMPT, text).await?;
    parse_reply(&reply)
}

pub fn parse_reply(reply: &str) -> Result<Vec<RequestCandidate>, CompletionError> {
    let json = extract_json(reply);
    // Models sometimes answer with the bare array.
    let raw: Vec<RawCandidate> = match serde_json::from_str::<Envelope>(json) {
        Ok(envelope) => envelope.requests,
        Err(_) => serde_json::from_str(json)
            .map_err(|e| CompletionError::Decode(format!("candidate list: {e}")))?,
    };
    Ok(raw.into_iter().filter_map(normalize).collect())
}

fn normalize(raw: RawCandidate) -> Option<RequestCandidate> {
    let club = clean(raw.club)?;

    let mut deal_types = Vec::new();
    for label in deal_labels(&raw.deal_types) {
        if let Some(deal) = deal_type_synonym(&label) {
            if !deal_types.contains(&deal) {
                deal_types.push(deal);
            }
        }
    }
    if deal_types.is_empty() {
        deal_types.push(DealType::Transfer);
    }

    let confidence: BTreeMap<String, f64> = raw
        .confidence
        .into_iter()
        .map(|(field, score)| (field, clamp_confidence(score)))
        .collect();
    let overall_confidence = mean(confidence.values().copied());

    Some(RequestCandidate {
        club,
        country: clean(raw.country),
        league: clean(raw.league),
        position: raw
            .position
            .as_deref()
            .map(position_code)
            .unwrap_or_default(),
        deal_types,
        priority: raw
            .priority
            .and_then(|p| p.trim().parse::<Priority>().ok()),
        age_min: raw.age_min,
        age_max: raw.age_max,
        transfer_fee_min_eur: money(&raw.transfer_fee_min),
        transfer_fee_max_eur: money(&raw.transfer_fee_max),
        salary_min_eur: money(&raw.salary_min),
        salary_max_eur: money(&raw.salary_max),
        notes: clean(raw.notes),
        confidence,
        overall_confidence,
    })
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("null"))
}

fn deal_labels(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => s.split([',', '/']).map(str::to_string).collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

pub fn deal_type_synonym(label: &str) -> Option<DealType> {
    let key: String = label
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect();
    let key = key.split_whitespace().collect::<Vec<_>>().join(" ");
    match key.as_str() {
        "transfer" | "permanent" | "buy" | "purchase" | "sale" | "permanent transfer" => {
            Some(DealType::Transfer)
        }
        "loan" | "dry loan" | "season loan" | "loan only" => Some(DealType::Loan),
        "loan with option" | "loan with option to buy" | "loan option" | "loan obligation"
        | "loan with obligation" | "option to buy" => Some(DealType::LoanWithOption),
        "free" | "free agent" | "free transfer" | "bosman" | "out of contract" => {
            Some(DealType::FreeAgent)
        }
        other => other.replace(' ', "_").parse().ok(),
    }
}

/// Maps common position names to the short codes the UI filters on.
/// Unknown labels pass through uppercased.
pub fn position_code(label: &str) -> String {
    let key = label.trim().to_ascii_lowercase().replace(['-', '_'], " ");
    let code = match key.as_str() {
        "goalkeeper" | "keeper" | "goalie" | "gk" => "GK",
        "centre back" | "center back" | "central defender" | "cb" => "CB",
        "right back" | "rb" => "RB",
        "left back" | "lb" => "LB",
        "right wing back" | "rwb" => "RWB",
        "left wing back" | "lwb" => "LWB",
        "defensive midfielder" | "holding midfielder" | "dm" | "cdm" | "number 6" | "6" => "CDM",
        "central midfielder" | "centre midfielder" | "center midfielder" | "midfielder" | "cm"
        | "number 8" | "8" => "CM",
        "attacking midfielder" | "playmaker" | "am" | "cam" | "number 10" | "10" => "CAM",
        "right winger" | "right wing" | "rw" => "RW",
        "left winger" | "left wing" | "lw" => "LW",
        "winger" | "wide forward" => "W",
        "striker" | "centre forward" | "center forward" | "forward" | "st" | "cf"
        | "number 9" | "9" => "ST",
        _ => return label.trim().to_ascii_uppercase(),
    };
    code.to_string()
}

fn money(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .filter(|v| *v >= 0),
        Value::String(s) => parse_eur_amount(s),
        _ => None,
    }
}

/// Reads amounts such as `"€2.5M"`, `"500k"`, `"1,2 mio"` or `"750000"`
/// as whole euros.
pub fn parse_eur_amount(raw: &str) -> Option<i64> {
    let lower = raw.trim().to_ascii_lowercase();
    let stripped = lower
        .trim_start_matches('€')
        .trim_start_matches("eur")
        .trim_end_matches('€')
        .trim_end_matches("eur")
        .trim();

    let split = stripped
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == ','))
        .unwrap_or(stripped.len());
    let (number, suffix) = stripped.split_at(split);
    let multiplier: f64 = match suffix.trim() {
        "" => 1.0,
        "k" | "thousand" => 1_000.0,
        "m" | "mil" | "mio" | "mln" | "million" | "millions" => 1_000_000.0,
        "b" | "bn" | "billion" => 1_000_000_000.0,
        _ => return None,
    };

    let number = normalize_separators(number, multiplier > 1.0)?;
    let value: f64 = number.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * multiplier).round() as i64)
}

/// `1,5` with a suffix is a decimal comma; `1,500,000` without one is
/// thousands grouping.
fn normalize_separators(number: &str, has_suffix: bool) -> Option<String> {
    if number.is_empty() {
        return None;
    }
    if number.contains('.') && number.contains(',') {
        return Some(number.replace(',', ""));
    }
    if number.contains(',') {
        return Some(if has_suffix {
            number.replace(',', ".")
        } else {
            number.replace(',', "")
        });
    }
    Some(number.to_string())
}

fn clamp_confidence(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0u32), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        0.0
    } else {
        sum / f64::from(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn money_strings_become_whole_euros() {
        assert_eq!(parse_eur_amount("€2.5M"), Some(2_500_000));
        assert_eq!(parse_eur_amount("500k"), Some(500_000));
        assert_eq!(parse_eur_amount("1,2 mio"), Some(1_200_000));
        assert_eq!(parse_eur_amount("750000"), Some(750_000));
        assert_eq!(parse_eur_amount("1,500,000"), Some(1_500_000));
        assert_eq!(parse_eur_amount("3 million EUR"), Some(3_000_000));
        assert_eq!(parse_eur_amount("lots"), None);
        assert_eq!(parse_eur_amount(""), None);
    }

    #[test]
    fn deal_type_synonyms() {
        assert_eq!(deal_type_synonym("Loan"), Some(DealType::Loan));
        assert_eq!(
            deal_type_synonym("loan with option to buy"),
            Some(DealType::LoanWithOption)
        );
        assert_eq!(deal_type_synonym("LOAN_WITH_OPTION"), Some(DealType::LoanWithOption));
        assert_eq!(deal_type_synonym("Bosman"), Some(DealType::FreeAgent));
        assert_eq!(deal_type_synonym("permanent"), Some(DealType::Transfer));
        assert_eq!(deal_type_synonym("swap"), None);
    }

    #[test]
    fn positions_map_to_codes() {
        assert_eq!(position_code("Centre-Back"), "CB");
        assert_eq!(position_code("striker"), "ST");
        assert_eq!(position_code("number 10"), "CAM");
        assert_eq!(position_code("sweeper"), "SWEEPER");
    }

    #[test]
    fn reply_is_normalized_and_clubless_candidates_dropped() {
        let reply = r#"```json
{"requests": [
  {"club": "Brentford", "position": "left back", "dealTypes": ["loan", "option to buy"],
   "transferFeeMax": "€2.5M", "salaryMax": 40000, "priority": "high",
   "confidence": {"club": 1.4, "position": 0.6, "transferFeeMax": -0.2}},
  {"club": "  ", "position": "ST", "confidence": {"club": 0.1}}
]}
```"#;
        let out = parse_reply(reply).unwrap();
        assert_eq!(out.len(), 1);
        let c = &out[0];
        assert_eq!(c.club, "Brentford");
        assert_eq!(c.position, "LB");
        assert_eq!(c.deal_types, vec![DealType::Loan, DealType::LoanWithOption]);
        assert_eq!(c.transfer_fee_max_eur, Some(2_500_000));
        assert_eq!(c.salary_max_eur, Some(40_000));
        assert_eq!(c.priority, Some(Priority::High));
        assert_eq!(c.confidence["club"], 1.0);
        assert_eq!(c.confidence["transferFeeMax"], 0.0);
        assert!((c.overall_confidence - (1.0 + 0.6 + 0.0) / 3.0).abs() < 1e-9);
    }

    #[test]
    fn bare_array_reply_is_accepted() {
        let out = parse_reply(r#"[{"club": "AZ", "position": "GK", "dealType": "free"}]"#).unwrap();
        assert_eq!(out[0].deal_types, vec![DealType::FreeAgent]);
        assert_eq!(out[0].overall_confidence, 0.0);
    }

    #[test]
    fn missing_deal_type_defaults_to_transfer() {
        let out = parse_reply(r#"{"requests": [{"club": "PSV", "position": "CM"}]}"#).unwrap();
        assert_eq!(out[0].deal_types, vec![DealType::Transfer]);
    }

    #[test]
    fn unparseable_reply_is_an_error() {
        assert!(parse_reply("sorry, I cannot help").is_err());
    }
}
