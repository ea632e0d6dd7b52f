//! Certificate expiry inspection.

use chrono::{DateTime, Utc};
use thiserror::Error;
use x509_parser::parse_x509_certificate;

const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CertificateError {
    #[error("peer certificate not available")]
    Missing,
    #[error("failed to parse peer certificate: {0}")]
    Parse(String),
}

/// Whole days from `now` until the certificate's `notAfter`.
///
/// Floors toward negative infinity, so an expired certificate reports a
/// negative count.
pub fn days_until_expiry(der: &[u8], now: DateTime<Utc>) -> Result<i64, CertificateError> {
    let (_, cert) = parse_x509_certificate(der).map_err(|e| CertificateError::Parse(e.to_string()))?;
    let not_after = cert.validity().not_after.timestamp();
    Ok((not_after - now.timestamp()).div_euclid(SECONDS_PER_DAY))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use x509_parser::pem::parse_x509_pem;

    // Self-signed, notAfter = 2024-01-31T00:00:00Z
    const EXPIRING_PEM: &[u8] = include_bytes!("../../testdata/expiring.pem");

    fn der() -> Vec<u8> {
        let (_, pem) = parse_x509_pem(EXPIRING_PEM).unwrap();
        pem.contents
    }

    #[test]
    fn test_days_until_expiry() {
        let now = Utc.with_ymd_and_hms(2024, 1, 16, 0, 0, 0).unwrap();
        assert_eq!(days_until_expiry(&der(), now).unwrap(), 15);

        let almost = Utc.with_ymd_and_hms(2024, 1, 30, 12, 0, 0).unwrap();
        assert_eq!(days_until_expiry(&der(), almost).unwrap(), 0);
    }

    #[test]
    fn test_expired_certificate_is_negative() {
        let now = Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap();
        assert_eq!(days_until_expiry(&der(), now).unwrap(), -2);
    }

    #[test]
    fn test_garbage_is_parse_error() {
        let err = days_until_expiry(b"not a certificate", Utc::now()).unwrap_err();
        assert!(matches!(err, CertificateError::Parse(_)));
    }
}
