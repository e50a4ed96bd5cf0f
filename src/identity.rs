use crate::errors::{AppError, AppResult};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

const DOMAIN_PREFIX_LEN: usize = 3;
const TIMESTAMP_DIGITS: i64 = 1_000_000;

static IDENTIFIER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s-]+-[^\s-]{1,3}-[0-9]{6}(-[2-9][0-9]*|-[1-9][0-9]+)?$").expect("valid identifier regex")
});

/// Derives `<initials>-<domain prefix>-<last 6 digits of epoch millis>`.
///
/// No uniqueness check happens here; the store resolves collisions.
pub fn generate(name: &str, domain: &str, now: DateTime<Utc>) -> AppResult<String> {
    let initials: String = name
        .split_whitespace()
        .filter_map(|token| token.chars().next())
        .flat_map(char::to_uppercase)
        .collect();
    if initials.is_empty() {
        return Err(AppError::InvalidInput(
            "metric name must contain at least one non-whitespace character".to_string(),
        ));
    }

    let domain = domain.trim();
    if domain.is_empty() {
        return Err(AppError::InvalidInput("domain cannot be empty".to_string()));
    }
    let domain_prefix: String = domain
        .chars()
        .take(DOMAIN_PREFIX_LEN)
        .flat_map(char::to_uppercase)
        .collect();

    let segment = now.timestamp_millis().rem_euclid(TIMESTAMP_DIGITS);
    Ok(format!("{}-{}-{:06}", initials, domain_prefix, segment))
}

/// Collision candidate for the `n`th contract sharing `base`.
pub fn with_suffix(base: &str, n: u32) -> String {
    format!("{}-{}", base, n)
}

pub fn is_well_formed(id: &str) -> bool {
    IDENTIFIER_RE.is_match(id)
}

#[cfg(test)]
mod tests {
    use super::{generate, is_well_formed, with_suffix};
    use crate::errors::AppError;
    use chrono::{TimeZone, Utc};

    fn at_millis(millis: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).single().expect("valid timestamp")
    }

    #[test]
    fn builds_initials_prefix_and_timestamp() {
        let id = generate("Monthly Active Users", "Engagement", at_millis(1_718_000_123_456)).expect("id");
        assert_eq!(id, "MAU-ENG-123456");
        assert!(is_well_formed(&id));
    }

    #[test]
    fn skips_repeated_whitespace_and_uppercases() {
        let id = generate("  net   revenue\tretention ", "finance", at_millis(1_700_000_000_042)).expect("id");
        assert_eq!(id, "NRR-FIN-000042");
    }

    #[test]
    fn short_domain_is_used_whole() {
        let id = generate("Churn", "hr", at_millis(1_700_000_654_321)).expect("id");
        assert_eq!(id, "C-HR-654321");
        assert!(is_well_formed(&id));
    }

    #[test]
    fn empty_inputs_are_rejected() {
        let now = at_millis(1_700_000_000_000);
        assert!(matches!(generate("", "Sales", now), Err(AppError::InvalidInput(_))));
        assert!(matches!(generate("   ", "Sales", now), Err(AppError::InvalidInput(_))));
        assert!(matches!(generate("Revenue", " ", now), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn suffixed_identifiers_stay_well_formed() {
        let base = generate("Gross Margin", "Finance", at_millis(1_700_000_111_111)).expect("id");
        assert!(is_well_formed(&with_suffix(&base, 2)));
        assert!(is_well_formed(&with_suffix(&base, 10)));
        assert!(!is_well_formed(&with_suffix(&base, 1)));
        assert!(!is_well_formed("GM-FIN-12345"));
    }
}
