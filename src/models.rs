use chrono::{Datelike, NaiveDate};

use crate::error::{ImportError, Result};

/// Transactions sharing a calendar day, shown collapsed or expanded.
#[allow(dead_code)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionGroup {
    pub id: i64,
    pub day: u32,
    pub month: u32,
    pub year: i32,
    pub expanded: bool,
}

#[allow(dead_code)]
impl TransactionGroup {
    pub fn new(id: i64, date: NaiveDate, expanded: bool) -> Self {
        Self {
            id,
            day: date.day(),
            month: date.month(),
            year: date.year(),
            expanded,
        }
    }

    /// The group's date, or `None` when the fields do not form a calendar date.
    pub fn date(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)
    }

    pub fn validate(&self) -> Result<()> {
        match self.date() {
            Some(_) => Ok(()),
            None => Err(ImportError::InvalidGroup(format!(
                "{:04}-{:02}-{:02} is not a calendar date",
                self.year, self.month, self.day
            ))),
        }
    }

    pub fn with_expanded(&self, expanded: bool) -> Self {
        Self {
            expanded,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_splits_date() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let group = TransactionGroup::new(7, date, true);
        assert_eq!((group.day, group.month, group.year), (29, 2, 2024));
        assert_eq!(group.date(), Some(date));
        assert!(group.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_impossible_dates() {
        let group = TransactionGroup {
            id: 1,
            day: 29,
            month: 2,
            year: 2023,
            expanded: false,
        };
        assert_eq!(group.date(), None);
        assert!(matches!(group.validate(), Err(ImportError::InvalidGroup(_))));
    }

    #[test]
    fn test_with_expanded_keeps_other_fields() {
        let date = NaiveDate::from_ymd_opt(2017, 5, 1).unwrap();
        let group = TransactionGroup::new(3, date, false);
        let toggled = group.with_expanded(true);
        assert!(toggled.expanded);
        assert_eq!(toggled.with_expanded(false), group);
    }
}
