pub mod calendar;
pub mod invitation;
pub mod player;
pub mod request;
pub mod tenant;
pub mod trial;
pub mod user;

pub use calendar::*;
pub use invitation::*;
pub use player::*;
pub use request::*;
pub use tenant::*;
pub use trial::*;
pub use user::*;

use serde::{Deserialize, Deserializer};

/// Lets PATCH bodies tell "field absent" (`None`) from "set to null"
/// (`Some(None)`). Use with `#[serde(default, deserialize_with = ...)]`.
pub fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::deserialize_some;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Patch {
        #[serde(default, deserialize_with = "deserialize_some")]
        club: Option<Option<String>>,
    }

    #[test]
    fn absent_null_and_value_are_distinct() {
        let absent: Patch = serde_json::from_str("{}").unwrap();
        let null: Patch = serde_json::from_str(r#"{"club": null}"#).unwrap();
        let value: Patch = serde_json::from_str(r#"{"club": "Ajax"}"#).unwrap();
        assert_eq!(absent.club, None);
        assert_eq!(null.club, Some(None));
        assert_eq!(value.club, Some(Some("Ajax".to_string())));
    }
}
