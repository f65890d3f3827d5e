use tracing::{instrument, trace};

use crate::model::{DateRange, TaskStats, TasksByDate};

/// Per-name completion totals over `range`, ordered by first appearance.
/// Dates without an entry contribute nothing and are left unmaterialized;
/// names with no instance inside the range are absent.
#[instrument(skip(tasks_by_date), fields(range = %range))]
pub fn compute_stats(tasks_by_date: &TasksByDate, range: DateRange) -> TaskStats {
    let mut stats = TaskStats::new();
    if range.is_empty() {
        return stats;
    }

    for (day, instances) in tasks_by_date.range(range.start..=range.end) {
        trace!(day = %day, count = instances.len(), "aggregating day");
        for instance in instances {
            let entry = stats.entry(instance.name.clone()).or_default();
            entry.total += 1;
            if instance.done {
                entry.completed += 1;
            }
        }
    }

    stats
}
