use std::collections::BTreeMap;

use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A catalog entry. Names are unique within the catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogTask {
    pub name: String,
}

impl CatalogTask {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A checkable copy of a catalog task, owned by exactly one date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskInstance {
    pub name: String,
    pub done: bool,
}

impl TaskInstance {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            done: false,
        }
    }
}

/// Per-date instance lists, keyed and serialized as `YYYY-MM-DD`.
pub type TasksByDate = BTreeMap<NaiveDate, Vec<TaskInstance>>;

/// Inclusive span of calendar days. `end < start` is a valid, empty range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn single(day: NaiveDate) -> Self {
        Self {
            start: day,
            end: day,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    pub fn days(&self) -> Vec<NaiveDate> {
        crate::datetime::dates_in_range(self.start, self.end)
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}..{}",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }
}

/// Per-name totals, in the order names are first met scanning the range.
pub type TaskStats = IndexMap<String, StatsEntry>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsEntry {
    pub total: u32,
    pub completed: u32,
}

impl StatsEntry {
    /// Completion rate rounded to a whole percent. Entries only exist with `total >= 1`.
    pub fn percent(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        (f64::from(self.completed) / f64::from(self.total) * 100.0).round() as u32
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{StatsEntry, TaskInstance, TasksByDate};

    #[test]
    fn percent_rounds_to_nearest() {
        let one_of_three = StatsEntry {
            total: 3,
            completed: 1,
        };
        assert_eq!(one_of_three.percent(), 33);

        let two_of_three = StatsEntry {
            total: 3,
            completed: 2,
        };
        assert_eq!(two_of_three.percent(), 67);
    }

    #[test]
    fn tasks_by_date_uses_iso_keys() {
        let mut map = TasksByDate::new();
        let day = NaiveDate::from_ymd_opt(2024, 1, 2).expect("valid date");
        map.insert(day, vec![TaskInstance::pending("Exercise")]);

        let json = serde_json::to_string(&map).expect("serialize");
        assert_eq!(json, r#"{"2024-01-02":[{"name":"Exercise","done":false}]}"#);

        let back: TasksByDate = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, map);
    }
}
