use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::deserialize_some;
use crate::services::mandate;

pub const FREE_AGENT: &str = "Free Agent";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Player {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub nationality: Option<String>,
    pub positions: Vec<String>,
    pub club: Option<String>,
    pub contract_expiry: Option<NaiveDate>,
    pub agency_contract_expiry: Option<NaiveDate>,
    pub rating_physical: Option<i16>,
    pub rating_technical: Option<i16>,
    pub rating_mental: Option<i16>,
    pub avatar_url: Option<String>,
    pub notes: Option<String>,
    pub tags: Vec<String>,
    pub mandate_clubs: Option<Vec<String>>,
    pub mandate_expiry: Option<NaiveDate>,
    pub mandate_description: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Representation rights held for a player.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mandate {
    #[serde(default)]
    pub clubs: Vec<String>,
    pub expiry: Option<NaiveDate>,
    pub description: Option<String>,
}

impl Mandate {
    pub fn is_empty(&self) -> bool {
        self.clubs.is_empty() && self.expiry.is_none() && self.description.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ratings {
    pub physical: Option<i16>,
    pub technical: Option<i16>,
    pub mental: Option<i16>,
    pub overall: Option<i16>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub age: Option<i32>,
    pub nationality: Option<String>,
    pub positions: Vec<String>,
    pub club: Option<String>,
    pub is_free_agent: bool,
    pub contract_expiry: Option<NaiveDate>,
    pub agency_contract_expiry: Option<NaiveDate>,
    pub ratings: Ratings,
    pub avatar_url: Option<String>,
    pub notes: Option<String>,
    pub tags: Vec<String>,
    pub mandate: Option<Mandate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PlayerView {
    pub fn new(p: Player, today: NaiveDate) -> Self {
        let structured = Mandate {
            clubs: p.mandate_clubs.unwrap_or_default(),
            expiry: p.mandate_expiry,
            description: p.mandate_description,
        };
        // Rows written before the structured columns existed keep the
        // mandate inside the notes.
        let (notes, mandate) = if structured.is_empty() {
            match p.notes.as_deref().map(mandate::split_notes) {
                Some((rest, legacy)) => (rest, legacy),
                None => (None, None),
            }
        } else {
            (p.notes, Some(structured))
        };

        Self {
            id: p.id,
            full_name: format!("{} {}", p.first_name, p.last_name),
            first_name: p.first_name,
            last_name: p.last_name,
            age: p.date_of_birth.and_then(|dob| age_on(dob, today)),
            date_of_birth: p.date_of_birth,
            nationality: p.nationality,
            positions: p.positions,
            is_free_agent: p.club.is_none(),
            club: p.club,
            contract_expiry: p.contract_expiry,
            agency_contract_expiry: p.agency_contract_expiry,
            ratings: Ratings {
                overall: overall_rating(&[p.rating_physical, p.rating_technical, p.rating_mental]),
                physical: p.rating_physical,
                technical: p.rating_technical,
                mental: p.rating_mental,
            },
            avatar_url: p.avatar_url,
            notes,
            tags: p.tags,
            mandate,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePlayerRequest {
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub nationality: Option<String>,
    #[serde(default)]
    pub positions: Vec<String>,
    pub club: Option<String>,
    pub contract_expiry: Option<NaiveDate>,
    pub agency_contract_expiry: Option<NaiveDate>,
    pub rating_physical: Option<i16>,
    pub rating_technical: Option<i16>,
    pub rating_mental: Option<i16>,
    pub avatar_url: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub mandate: Option<Mandate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePlayerRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub date_of_birth: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub nationality: Option<Option<String>>,
    pub positions: Option<Vec<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub club: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub contract_expiry: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub agency_contract_expiry: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub rating_physical: Option<Option<i16>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub rating_technical: Option<Option<i16>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub rating_mental: Option<Option<i16>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub avatar_url: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub notes: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub mandate: Option<Option<Mandate>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerQuery {
    pub search: Option<String>,
    pub position: Option<String>,
    pub nationality: Option<String>,
    pub tag: Option<String>,
    pub free_agent: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Blank input and the "Free Agent" placeholder both mean no club.
pub fn normalize_club(club: Option<&str>) -> Option<String> {
    let club = club?.trim();
    if club.is_empty() || club.eq_ignore_ascii_case(FREE_AGENT) {
        None
    } else {
        Some(club.to_string())
    }
}

pub fn valid_rating(rating: Option<i16>) -> bool {
    rating.map_or(true, |r| (0..=100).contains(&r))
}

/// Rounded mean of the sub-scores that are present.
pub fn overall_rating(scores: &[Option<i16>]) -> Option<i16> {
    let present: Vec<i32> = scores.iter().flatten().map(|&s| i32::from(s)).collect();
    if present.is_empty() {
        return None;
    }
    let len = present.len() as i32;
    let sum: i32 = present.iter().sum();
    i16::try_from((sum + len / 2) / len).ok()
}

pub fn age_on(dob: NaiveDate, today: NaiveDate) -> Option<i32> {
    if dob > today {
        return None;
    }
    let mut age = today.year() - dob.year();
    if (today.month(), today.day()) < (dob.month(), dob.day()) {
        age -= 1;
    }
    Some(age)
}

/// Trims entries and drops blanks and duplicates, keeping order.
pub fn clean_list(items: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        let item = item.trim();
        if !item.is_empty() && !out.iter().any(|seen| seen.eq_ignore_ascii_case(item)) {
            out.push(item.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn free_agent_club_is_stored_as_null() {
        assert_eq!(normalize_club(Some("Free Agent")), None);
        assert_eq!(normalize_club(Some("free agent ")), None);
        assert_eq!(normalize_club(Some("   ")), None);
        assert_eq!(normalize_club(None), None);
        assert_eq!(normalize_club(Some(" Feyenoord ")), Some("Feyenoord".into()));
    }

    #[test]
    fn overall_uses_present_scores_only() {
        assert_eq!(overall_rating(&[Some(80), Some(70), Some(75)]), Some(75));
        assert_eq!(overall_rating(&[Some(81), None, Some(70)]), Some(76));
        assert_eq!(overall_rating(&[None, None, None]), None);
    }

    #[test]
    fn age_respects_birthday() {
        assert_eq!(age_on(date(2000, 6, 15), date(2024, 6, 14)), Some(23));
        assert_eq!(age_on(date(2000, 6, 15), date(2024, 6, 15)), Some(24));
        assert_eq!(age_on(date(2030, 1, 1), date(2024, 1, 1)), None);
    }

    #[test]
    fn ratings_bounded() {
        assert!(valid_rating(None));
        assert!(valid_rating(Some(0)));
        assert!(valid_rating(Some(100)));
        assert!(!valid_rating(Some(101)));
        assert!(!valid_rating(Some(-1)));
    }

    #[test]
    fn lists_are_deduplicated() {
        let raw = vec![" ST ".to_string(), "st".into(), "".into(), "CAM".into()];
        assert_eq!(clean_list(&raw), vec!["ST".to_string(), "CAM".to_string()]);
    }

    fn sample_player() -> Player {
        let now = Utc::now();
        Player {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            first_name: "Jan".into(),
            last_name: "de Vries".into(),
            date_of_birth: Some(date(2001, 3, 2)),
            nationality: Some("NL".into()),
            positions: vec!["CB".into()],
            club: None,
            contract_expiry: None,
            agency_contract_expiry: None,
            rating_physical: Some(70),
            rating_technical: None,
            rating_mental: Some(80),
            avatar_url: None,
            notes: Some(
                "Strong in the air.\n[MANDATE]\nClubs: PSV, AZ\nExpiry: 2026-06-30\n[/MANDATE]"
                    .into(),
            ),
            tags: vec![],
            mandate_clubs: None,
            mandate_expiry: None,
            mandate_description: None,
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn view_lifts_legacy_mandate_out_of_notes() {
        let view = PlayerView::new(sample_player(), date(2024, 1, 1));
        assert!(view.is_free_agent);
        assert_eq!(view.age, Some(22));
        assert_eq!(view.ratings.overall, Some(75));
        assert_eq!(view.notes.as_deref(), Some("Strong in the air."));
        let mandate = view.mandate.unwrap();
        assert_eq!(mandate.clubs, vec!["PSV".to_string(), "AZ".to_string()]);
        assert_eq!(mandate.expiry, Some(date(2026, 6, 30)));
    }

    #[test]
    fn structured_mandate_wins_over_notes() {
        let mut p = sample_player();
        p.mandate_clubs = Some(vec!["Ajax".into()]);
        let view = PlayerView::new(p, date(2024, 1, 1));
        assert_eq!(view.mandate.unwrap().clubs, vec!["Ajax".to_string()]);
        assert!(view.notes.unwrap().contains("[MANDATE]"));
    }
}
