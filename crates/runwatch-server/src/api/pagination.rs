use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer};

/// `limit`/`offset` query parameters; numbers may arrive as strings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaginationParams {
    #[serde(default, deserialize_with = "deserialize_optional_u64")]
    pub limit: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_optional_u64")]
    pub offset: Option<u64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum U64Input {
    Number(u64),
    Text(String),
}

pub(crate) fn deserialize_optional_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<U64Input>::deserialize(deserializer)? {
        None => Ok(None),
        Some(U64Input::Number(n)) => Ok(Some(n)),
        Some(U64Input::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(U64Input::Text(text)) => text.trim().parse::<u64>().map(Some).map_err(DeError::custom),
    }
}

const DEFAULT_PAGE_LIMIT: u64 = 20;
const MAX_PAGE_LIMIT: u64 = 1000;

impl PaginationParams {
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT) as usize
    }

    pub fn offset(&self) -> usize {
        self.offset.unwrap_or(0) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_clamped() {
        let p = PaginationParams { limit: Some(5000), offset: None };
        assert_eq!(p.limit(), 1000);
        assert_eq!(PaginationParams::default().limit(), 20);
        assert_eq!(PaginationParams { limit: Some(0), offset: Some(3) }.limit(), 1);
    }

    #[test]
    fn numbers_may_be_strings() {
        let p: PaginationParams = serde_json::from_str(r#"{"limit":"15","offset":2}"#).unwrap();
        assert_eq!((p.limit(), p.offset()), (15, 2));
    }
}
