use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use super::deserialize_some;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Display, EnumString,
)]
#[sqlx(type_name = "request_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum RequestStatus {
    Open,
    InProgress,
    OfferSent,
    Agreement,
    Completed,
    Cancelled,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 6] = [
        RequestStatus::Open,
        RequestStatus::InProgress,
        RequestStatus::OfferSent,
        RequestStatus::Agreement,
        RequestStatus::Completed,
        RequestStatus::Cancelled,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Cancelled)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Display, EnumString,
)]
#[sqlx(type_name = "request_priority", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

/// Persisted as a comma-joined string in `requests.deal_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum DealType {
    Transfer,
    Loan,
    LoanWithOption,
    FreeAgent,
}

pub fn parse_deal_types(raw: &str) -> Vec<DealType> {
    let mut out = Vec::new();
    for part in raw.split(',') {
        if let Ok(deal) = part.trim().parse::<DealType>() {
            if !out.contains(&deal) {
                out.push(deal);
            }
        }
    }
    out
}

pub fn join_deal_types(deals: &[DealType]) -> String {
    let mut seen: Vec<DealType> = Vec::with_capacity(deals.len());
    for deal in deals {
        if !seen.contains(deal) {
            seen.push(*deal);
        }
    }
    seen.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TransferRequest {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub club: String,
    pub country: Option<String>,
    pub league: Option<String>,
    pub position: String,
    pub deal_type: String,
    pub status: RequestStatus,
    pub priority: Priority,
    pub window_open: Option<NaiveDate>,
    pub window_close: Option<NaiveDate>,
    pub age_min: Option<i16>,
    pub age_max: Option<i16>,
    pub fee_min: Option<i64>,
    pub fee_max: Option<i64>,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub bonus: Option<i64>,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Wire shape the dashboard expects; money fields carry their currency.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestView {
    pub id: Uuid,
    pub club: String,
    pub country: Option<String>,
    pub league: Option<String>,
    pub position: String,
    pub deal_types: Vec<DealType>,
    pub status: RequestStatus,
    pub priority: Priority,
    pub transfer_window_open: Option<NaiveDate>,
    pub transfer_window_close: Option<NaiveDate>,
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
    #[serde(rename = "bonusEUR")]
    pub bonus_eur: Option<i64>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<TransferRequest> for RequestView {
    fn from(r: TransferRequest) -> Self {
        Self {
            id: r.id,
            deal_types: parse_deal_types(&r.deal_type),
            club: r.club,
            country: r.country,
            league: r.league,
            position: r.position,
            status: r.status,
            priority: r.priority,
            transfer_window_open: r.window_open,
            transfer_window_close: r.window_close,
            age_min: r.age_min,
            age_max: r.age_max,
            transfer_fee_min_eur: r.fee_min,
            transfer_fee_max_eur: r.fee_max,
            salary_min_eur: r.salary_min,
            salary_max_eur: r.salary_max,
            bonus_eur: r.bonus,
            notes: r.notes,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequestBody {
    pub club: String,
    pub country: Option<String>,
    pub league: Option<String>,
    pub position: String,
    #[serde(default)]
    pub deal_types: Vec<DealType>,
    pub status: Option<RequestStatus>,
    pub priority: Option<Priority>,
    pub transfer_window_open: Option<NaiveDate>,
    pub transfer_window_close: Option<NaiveDate>,
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
    #[serde(rename = "bonusEUR")]
    pub bonus_eur: Option<i64>,
    pub notes: Option<String>,
}

impl CreateRequestBody {
    /// Returns a user-facing message for the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.club.trim().is_empty() {
            return Err("Club is required".into());
        }
        if self.position.trim().is_empty() {
            return Err("Position is required".into());
        }
        check_ranges(
            (self.transfer_window_open, self.transfer_window_close),
            (self.age_min, self.age_max),
            (self.transfer_fee_min_eur, self.transfer_fee_max_eur),
            (self.salary_min_eur, self.salary_max_eur),
            self.bonus_eur,
        )
    }

    pub fn deal_type_column(&self) -> String {
        if self.deal_types.is_empty() {
            DealType::Transfer.to_string()
        } else {
            join_deal_types(&self.deal_types)
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequestBody {
    pub club: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub country: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub league: Option<Option<String>>,
    pub position: Option<String>,
    pub deal_types: Option<Vec<DealType>>,
    pub status: Option<RequestStatus>,
    pub priority: Option<Priority>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub transfer_window_open: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub transfer_window_close: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub age_min: Option<Option<i16>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub age_max: Option<Option<i16>>,
    #[serde(default, rename = "transferFeeMinEUR", deserialize_with = "deserialize_some")]
    pub transfer_fee_min_eur: Option<Option<i64>>,
    #[serde(default, rename = "transferFeeMaxEUR", deserialize_with = "deserialize_some")]
    pub transfer_fee_max_eur: Option<Option<i64>>,
    #[serde(default, rename = "salaryMinEUR", deserialize_with = "deserialize_some")]
    pub salary_min_eur: Option<Option<i64>>,
    #[serde(default, rename = "salaryMaxEUR", deserialize_with = "deserialize_some")]
    pub salary_max_eur: Option<Option<i64>>,
    #[serde(default, rename = "bonusEUR", deserialize_with = "deserialize_some")]
    pub bonus_eur: Option<Option<i64>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub notes: Option<Option<String>>,
}

impl UpdateRequestBody {
    /// Validates the patch applied on top of the stored row.
    pub fn validate_against(&self, current: &TransferRequest) -> Result<(), String> {
        if self.club.as_deref().is_some_and(|c| c.trim().is_empty()) {
            return Err("Club cannot be empty".into());
        }
        if self.position.as_deref().is_some_and(|p| p.trim().is_empty()) {
            return Err("Position cannot be empty".into());
        }
        if self.deal_types.as_ref().is_some_and(Vec::is_empty) {
            return Err("At least one deal type is required".into());
        }
        let pick = |patch: Option<Option<i64>>, stored: Option<i64>| patch.unwrap_or(stored);
        check_ranges(
            (
                self.transfer_window_open.unwrap_or(current.window_open),
                self.transfer_window_close.unwrap_or(current.window_close),
            ),
            (
                self.age_min.unwrap_or(current.age_min),
                self.age_max.unwrap_or(current.age_max),
            ),
            (
                pick(self.transfer_fee_min_eur, current.fee_min),
                pick(self.transfer_fee_max_eur, current.fee_max),
            ),
            (
                pick(self.salary_min_eur, current.salary_min),
                pick(self.salary_max_eur, current.salary_max),
            ),
            pick(self.bonus_eur, current.bonus),
        )
    }
}

fn check_ranges(
    window: (Option<NaiveDate>, Option<NaiveDate>),
    age: (Option<i16>, Option<i16>),
    fee: (Option<i64>, Option<i64>),
    salary: (Option<i64>, Option<i64>),
    bonus: Option<i64>,
) -> Result<(), String> {
    if let (Some(open), Some(close)) = window {
        if close < open {
            return Err("Transfer window closes before it opens".into());
        }
    }
    if let (Some(min), Some(max)) = age {
        if min > max {
            return Err("Minimum age exceeds maximum age".into());
        }
    }
    for (label, (min, max)) in [("Transfer fee", fee), ("Salary", salary)] {
        if min.is_some_and(|v| v < 0) || max.is_some_and(|v| v < 0) {
            return Err(format!("{label} cannot be negative"));
        }
        if let (Some(min), Some(max)) = (min, max) {
            if min > max {
                return Err(format!("{label} minimum exceeds maximum"));
            }
        }
    }
    if bonus.is_some_and(|b| b < 0) {
        return Err("Bonus cannot be negative".into());
    }
    Ok(())
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestQuery {
    pub status: Option<RequestStatus>,
    pub priority: Option<Priority>,
    pub position: Option<String>,
    pub deal_type: Option<DealType>,
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct BulkStatusBody {
    pub ids: Vec<Uuid>,
    pub status: RequestStatus,
}

#[derive(Debug, Deserialize)]
pub struct BulkCreateBody {
    pub requests: Vec<CreateRequestBody>,
}

#[derive(Debug, Deserialize)]
pub struct ParseMessageBody {
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deal_types_round_trip_through_column() {
        let joined = join_deal_types(&[DealType::Loan, DealType::Transfer, DealType::Loan]);
        assert_eq!(joined, "LOAN,TRANSFER");
        assert_eq!(parse_deal_types(&joined), vec![DealType::Loan, DealType::Transfer]);
    }

    #[test]
    fn unknown_deal_types_in_column_are_skipped() {
        assert_eq!(
            parse_deal_types("transfer, swap ,FREE_AGENT"),
            vec![DealType::Transfer, DealType::FreeAgent]
        );
        assert!(parse_deal_types("").is_empty());
    }

    #[test]
    fn status_set_is_closed() {
        assert_eq!(RequestStatus::ALL.len(), 6);
        assert!("OFFER_SENT".parse::<RequestStatus>().is_ok());
        assert!("NEGOTIATING".parse::<RequestStatus>().is_err());
        assert!(serde_json::from_str::<RequestStatus>("\"ARCHIVED\"").is_err());
        assert!(RequestStatus::Completed.is_terminal());
        assert!(!RequestStatus::Agreement.is_terminal());
    }

    fn body() -> CreateRequestBody {
        serde_json::from_value(serde_json::json!({
            "club": "Brentford",
            "position": "CB",
            "dealTypes": ["LOAN", "LOAN_WITH_OPTION"],
            "transferFeeMinEUR": 1_000_000,
            "transferFeeMaxEUR": 3_000_000
        }))
        .unwrap()
    }

    #[test]
    fn create_body_uses_eur_field_names() {
        let b = body();
        assert_eq!(b.transfer_fee_max_eur, Some(3_000_000));
        assert_eq!(b.deal_type_column(), "LOAN,LOAN_WITH_OPTION");
        assert!(b.validate().is_ok());
    }

    #[test]
    fn inverted_ranges_are_rejected() {
        let mut b = body();
        b.transfer_fee_min_eur = Some(5_000_000);
        assert_eq!(
            b.validate().unwrap_err(),
            "Transfer fee minimum exceeds maximum"
        );

        let mut b = body();
        b.transfer_window_open = NaiveDate::from_ymd_opt(2025, 9, 1);
        b.transfer_window_close = NaiveDate::from_ymd_opt(2025, 6, 1);
        assert!(b.validate().is_err());

        let mut b = body();
        b.club = "  ".into();
        assert_eq!(b.validate().unwrap_err(), "Club is required");
    }

    #[test]
    fn empty_deal_types_default_to_transfer() {
        let mut b = body();
        b.deal_types.clear();
        assert_eq!(b.deal_type_column(), "TRANSFER");
    }
}
