use quotefeed_core::QuoteError;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;

pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client, QuoteError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| QuoteError::Upstream(format!("Failed to build HTTP client: {}", e)))
}

/// GET a vendor endpoint and decode its JSON body. Non-2xx statuses become
/// upstream errors carrying the status and body.
pub(crate) async fn get_json(
    client: &reqwest::Client,
    vendor: &str,
    url: &str,
    query: &[(&str, &str)],
    timeout: Duration,
) -> Result<serde_json::Value, QuoteError> {
    let response = client.get(url).query(query).send().await.map_err(|e| {
        if e.is_timeout() {
            QuoteError::Timeout(timeout)
        } else {
            QuoteError::Upstream(format!("{} request failed: {}", vendor, e))
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(QuoteError::Upstream(format!(
            "{} status {}: {}",
            vendor,
            status.as_u16(),
            body
        )));
    }

    response
        .json::<serde_json::Value>()
        .await
        .map_err(|e| QuoteError::Upstream(format!("{} returned malformed JSON: {}", vendor, e)))
}

/// Parse a vendor number that may arrive as a string ("12.34", "0.56%").
pub(crate) fn parse_decimal(raw: &str, field: &str) -> Result<Decimal, QuoteError> {
    let trimmed = raw.trim().trim_end_matches('%');
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|_| QuoteError::Upstream(format!("Invalid {} value: {:?}", field, raw)))
}

/// Convert a vendor float, rejecting NaN and infinities.
pub(crate) fn float_to_decimal(value: f64, field: &str) -> Result<Decimal, QuoteError> {
    Decimal::try_from(value)
        .map_err(|_| QuoteError::Upstream(format!("Invalid {} value: {}", field, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_decimal_variants() {
        assert_eq!(parse_decimal("189.8400", "price").unwrap(), dec!(189.8400));
        assert_eq!(parse_decimal("-0.4502%", "change").unwrap(), dec!(-0.4502));
        assert!(parse_decimal("n/a", "price").is_err());
    }

    #[test]
    fn test_float_to_decimal() {
        assert_eq!(float_to_decimal(12.5, "c").unwrap(), dec!(12.5));
        assert!(float_to_decimal(f64::NAN, "c").is_err());
    }
}
