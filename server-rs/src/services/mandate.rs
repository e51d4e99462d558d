//! Reads the mandate block older clients embedded in player notes:
//!
//! ```text
//! [MANDATE]
//! Clubs: PSV, AZ
//! Expiry: 2026-06-30
//! Description: Exclusive for the Eredivisie
//! [/MANDATE]
//! ```

use chrono::NaiveDate;

use crate::models::player::Mandate;

const OPEN: &str = "[MANDATE]";
const CLOSE: &str = "[/MANDATE]";

/// Splits notes into the free text around the block and the parsed mandate.
/// Notes without a block come back unchanged with no mandate.
pub fn split_notes(notes: &str) -> (Option<String>, Option<Mandate>) {
    let Some(start) = notes.find(OPEN) else {
        return (non_empty(notes), None);
    };
    let body_start = start + OPEN.len();
    let (body, after) = match notes[body_start..].find(CLOSE) {
        Some(len) => (
            &notes[body_start..body_start + len],
            &notes[body_start + len + CLOSE.len()..],
        ),
        None => (&notes[body_start..], ""),
    };

    let before = notes[..start].trim_end();
    let after = after.trim_start();
    let rest = match (before.is_empty(), after.is_empty()) {
        (true, true) => String::new(),
        (false, true) => before.to_string(),
        (true, false) => after.to_string(),
        (false, false) => format!("{before}\n{after}"),
    };

    let mandate = parse_block(body);
    (non_empty(&rest), (!mandate.is_empty()).then_some(mandate))
}

fn parse_block(body: &str) -> Mandate {
    let mut mandate = Mandate::default();
    for line in body.lines() {
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match label.trim().to_ascii_lowercase().as_str() {
            "clubs" | "club" => {
                mandate.clubs = value
                    .split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(String::from)
                    .collect();
            }
            "expiry" | "expires" => {
                mandate.expiry = parse_date(value);
            }
            "description" => mandate.description = Some(value.to_string()),
            _ => {}
        }
    }
    mandate
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%d/%m/%Y"))
        .or_else(|_| NaiveDate::parse_from_str(value, "%d.%m.%Y"))
        .ok()
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notes_without_block_pass_through() {
        assert_eq!(
            split_notes("  Quick winger "),
            (Some("Quick winger".to_string()), None)
        );
        assert_eq!(split_notes("   "), (None, None));
    }

    #[test]
    fn block_is_parsed_and_removed() {
        let notes = "Left footed.\n[MANDATE]\nClubs: Celtic, Rangers\nExpiry: 30/06/2026\nDescription: Scotland only\n[/MANDATE]\nWatch again in March.";
        let (rest, mandate) = split_notes(notes);
        assert_eq!(rest.as_deref(), Some("Left footed.\nWatch again in March."));
        let mandate = mandate.unwrap();
        assert_eq!(mandate.clubs, vec!["Celtic".to_string(), "Rangers".to_string()]);
        assert_eq!(mandate.expiry, NaiveDate::from_ymd_opt(2026, 6, 30));
        assert_eq!(mandate.description.as_deref(), Some("Scotland only"));
    }

    #[test]
    fn unterminated_block_runs_to_end() {
        let (rest, mandate) = split_notes("[MANDATE]\nClubs: Brann");
        assert_eq!(rest, None);
        assert_eq!(mandate.unwrap().clubs, vec!["Brann".to_string()]);
    }

    #[test]
    fn empty_block_yields_no_mandate() {
        let (rest, mandate) = split_notes("Note\n[MANDATE]\n[/MANDATE]");
        assert_eq!(rest.as_deref(), Some("Note"));
        assert!(mandate.is_none());
    }

    #[test]
    fn bad_date_is_ignored() {
        let (_, mandate) = split_notes("[MANDATE]\nExpiry: soon\nClubs: Molde\n[/MANDATE]");
        let mandate = mandate.unwrap();
        assert_eq!(mandate.expiry, None);
        assert_eq!(mandate.clubs, vec!["Molde".to_string()]);
    }
}
