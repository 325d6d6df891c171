//! Region identifier validation.
//!
//! Region ids appear inside deterministic alert keys (`{region}_{instance}_{threshold}`),
//! so they must never contain the `_` separator.

/// Maximum accepted region id length.
pub const MAX_REGION_LEN: usize = 64;

/// Checks that `region` looks like a cloud region id (`us-east-1`, `ap-guangzhou`).
///
/// Accepted: lowercase ASCII letters, digits and single hyphens, starting
/// with a letter and not ending with a hyphen.
///
/// # Examples
///
/// ```
/// use runwatch_common::region::validate_region;
///
/// assert!(validate_region("us-east-1").is_ok());
/// assert!(validate_region("eu_west_1").is_err());
/// assert!(validate_region("").is_err());
/// ```
pub fn validate_region(region: &str) -> Result<(), String> {
    if region.is_empty() {
        return Err("region must not be empty".to_string());
    }
    if region.len() > MAX_REGION_LEN {
        return Err(format!(
            "region '{region}' is longer than {MAX_REGION_LEN} characters"
        ));
    }
    if !region.starts_with(|c: char| c.is_ascii_lowercase()) {
        return Err(format!("region '{region}' must start with a lowercase letter"));
    }
    if region.ends_with('-') || region.contains("--") {
        return Err(format!("region '{region}' has a dangling hyphen"));
    }
    if let Some(bad) = region
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
    {
        return Err(format!("region '{region}' contains invalid character '{bad}'"));
    }
    Ok(())
}
