//! Period labels, granularities and seasonal periods

use crate::{MortalityError, Result};
use chrono::Month;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ordered period identifier, e.g. `2020 W05` or `2019/20`.
pub type Label = String;

/// Temporal bucket size of a timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
    #[serde(rename = "fluseason")]
    FluSeason,
    #[serde(rename = "midyear")]
    MidYear,
}

impl Granularity {
    pub const ALL: [Granularity; 6] = [
        Granularity::Weekly,
        Granularity::Monthly,
        Granularity::Quarterly,
        Granularity::Yearly,
        Granularity::FluSeason,
        Granularity::MidYear,
    ];

    /// Seasonal period code understood by the regression service
    pub fn seasonal_period(self) -> u8 {
        match self {
            Granularity::Weekly => 4,
            Granularity::Monthly => 3,
            Granularity::Quarterly => 2,
            Granularity::Yearly | Granularity::FluSeason | Granularity::MidYear => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Weekly => "weekly",
            Granularity::Monthly => "monthly",
            Granularity::Quarterly => "quarterly",
            Granularity::Yearly => "yearly",
            Granularity::FluSeason => "fluseason",
            Granularity::MidYear => "midyear",
        }
    }

    /// Period-alignment hint for the first label of a series.
    ///
    /// Formats: `YYYYWnn`, `YYYY-MM`, `YYYYQn`, `YYYY`. Season labels
    /// (`2019/20`) use their starting year.
    pub fn alignment_hint(self, label: &str) -> Result<String> {
        let invalid = || MortalityError::InvalidLabel {
            label: label.to_string(),
            granularity: self.to_string(),
        };
        let label = label.trim();

        match self {
            Granularity::Weekly => {
                let (year, week) = split_year(label, 'W').ok_or_else(invalid)?;
                let week: u32 = week.parse().map_err(|_| invalid())?;
                if !(1..=53).contains(&week) {
                    return Err(invalid());
                }
                Ok(format!("{}W{:02}", year, week))
            }
            Granularity::Monthly => {
                let (year, month) = label.split_once(' ').ok_or_else(invalid)?;
                let year = parse_year(year).ok_or_else(invalid)?;
                let month = Month::from_str(month.trim()).map_err(|_| invalid())?;
                Ok(format!("{}-{:02}", year, month.number_from_month()))
            }
            Granularity::Quarterly => {
                let (year, quarter) = split_year(label, 'Q').ok_or_else(invalid)?;
                let quarter: u32 = quarter.parse().map_err(|_| invalid())?;
                if !(1..=4).contains(&quarter) {
                    return Err(invalid());
                }
                Ok(format!("{}Q{}", year, quarter))
            }
            Granularity::Yearly => {
                let year = parse_year(label).ok_or_else(invalid)?;
                Ok(year.to_string())
            }
            Granularity::FluSeason | Granularity::MidYear => {
                let (start, _) = label.split_once('/').ok_or_else(invalid)?;
                let year = parse_year(start).ok_or_else(invalid)?;
                Ok(year.to_string())
            }
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = MortalityError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "weekly" => Ok(Granularity::Weekly),
            "monthly" => Ok(Granularity::Monthly),
            "quarterly" => Ok(Granularity::Quarterly),
            "yearly" => Ok(Granularity::Yearly),
            "fluseason" | "flu_season" => Ok(Granularity::FluSeason),
            "midyear" | "mid_year" => Ok(Granularity::MidYear),
            other => Err(MortalityError::UnknownVariant {
                kind: "granularity",
                value: other.to_string(),
            }),
        }
    }
}

/// Splits `2020 W05`, `2020-W05` or `2020W05` style labels.
fn split_year(label: &str, marker: char) -> Option<(i32, &str)> {
    let pos = label.find(marker)?;
    let year = label[..pos].trim_end_matches(|c: char| c == ' ' || c == '-');
    Some((parse_year(year)?, label[pos + 1..].trim()))
}

fn parse_year(s: &str) -> Option<i32> {
    let s = s.trim();
    if s.len() != 4 {
        return None;
    }
    s.parse().ok()
}
