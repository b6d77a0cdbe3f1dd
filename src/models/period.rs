use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::BillingError;

/// 账期 (YYYYMM)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(try_from = "String", into = "String")]
#[sqlx(transparent)]
pub struct Period(String);

impl Period {
    pub fn parse(raw: &str) -> Result<Self, BillingError> {
        let valid = raw.len() == 6 && raw.bytes().all(|b| b.is_ascii_digit());
        if !valid {
            return Err(BillingError::InvalidPeriod(raw.to_string()));
        }
        let month: u32 = raw[4..].parse().map_err(|_| BillingError::InvalidPeriod(raw.to_string()))?;
        if !(1..=12).contains(&month) {
            return Err(BillingError::InvalidPeriod(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn year(&self) -> i32 {
        self.0[..4].parse().unwrap_or_default()
    }

    pub fn month(&self) -> u32 {
        self.0[4..].parse().unwrap_or(1)
    }

    /// 账期首日
    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year(), self.month(), 1).unwrap_or_default()
    }

    /// 账期末日
    pub fn last_day(&self) -> NaiveDate {
        let (year, month) = if self.month() == 12 {
            (self.year() + 1, 1)
        } else {
            (self.year(), self.month() + 1)
        };
        NaiveDate::from_ymd_opt(year, month, 1)
            .and_then(|d| d.pred_opt())
            .unwrap_or_default()
    }
}

impl FromStr for Period {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Period {
    type Error = BillingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Period> for String {
    fn from(period: Period) -> Self {
        period.0
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_six_digit_periods() {
        let period = Period::parse("202402").unwrap();
        assert_eq!(period.year(), 2024);
        assert_eq!(period.month(), 2);
        assert_eq!(period.first_day(), NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert_eq!(period.last_day(), NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
    }

    #[test]
    fn december_ends_on_the_31st() {
        let period = Period::parse("202312").unwrap();
        assert_eq!(period.last_day(), NaiveDate::from_ymd_opt(2023, 12, 31).unwrap());
    }

    #[test]
    fn rejects_other_bucketings() {
        for raw in ["2024-02", "20242", "2024021", "2024AB", "202413", "202400", ""] {
            assert!(
                matches!(Period::parse(raw), Err(BillingError::InvalidPeriod(_))),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn deserializes_through_validation() {
        let ok: Period = serde_json::from_str("\"202401\"").unwrap();
        assert_eq!(ok.as_str(), "202401");
        assert!(serde_json::from_str::<Period>("\"2024-01\"").is_err());
    }
}
