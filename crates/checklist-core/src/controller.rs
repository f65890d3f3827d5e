//! Single owner of the checklist state.
//!
//! Every user action is a [`Command`]. `Controller::apply` runs the transition
//! against [`ChecklistState`] and then writes whichever persisted fields it
//! dirtied through the injected [`KeyValueStore`].

use std::collections::BTreeSet;

use chrono::NaiveDate;
use tracing::{debug, info, instrument};

use crate::datetime::{Clock, trailing_window};
use crate::model::{DateRange, TaskInstance, TaskStats};
use crate::state::{ChecklistState, Dirty};
use crate::stats::compute_stats;
use crate::storage::{CorruptPolicy, KeyValueStore, load_state, save_dirty};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetTitle(String),
    AddTask(String),
    /// Adds a task over `range` without touching the session's creation range.
    AddTaskOver { name: String, range: DateRange },
    ToggleDone { date: NaiveDate, name: String },
    ToggleSelection(String),
    DeleteSelected,
    DeleteTasks(BTreeSet<String>),
    ViewDate(NaiveDate),
    SetCreationRange(DateRange),
    SetStatsRange(DateRange),
    /// Drops explicit ranges so both follow the trailing windows again.
    FollowToday,
    Reset,
}

/// Lengths, in days, of the trailing windows used until a caller sets explicit
/// ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Windows {
    pub creation_days: u32,
    pub stats_days: u32,
}

impl Default for Windows {
    fn default() -> Self {
        Self {
            creation_days: 7,
            stats_days: 7,
        }
    }
}

#[derive(Debug)]
pub struct Controller<S: KeyValueStore> {
    store: S,
    state: ChecklistState,
    selection: BTreeSet<String>,
    today: NaiveDate,
    view_date: NaiveDate,
    windows: Windows,
    creation_range: DateRange,
    creation_pinned: bool,
    stats_range: DateRange,
    stats_pinned: bool,
}

impl<S: KeyValueStore> Controller<S> {
    #[instrument(skip(store))]
    pub fn open(
        store: S,
        policy: CorruptPolicy,
        today: NaiveDate,
        windows: Windows,
    ) -> anyhow::Result<Self> {
        let state = load_state(&store, policy)?;
        info!(
            tasks = state.catalog.len(),
            dates = state.tasks_by_date.len(),
            "opened checklist"
        );
        Ok(Self {
            store,
            state,
            selection: BTreeSet::new(),
            today,
            view_date: today,
            windows,
            creation_range: trailing_window(today, windows.creation_days),
            creation_pinned: false,
            stats_range: trailing_window(today, windows.stats_days),
            stats_pinned: false,
        })
    }

    pub fn state(&self) -> &ChecklistState {
        &self.state
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn selection(&self) -> &BTreeSet<String> {
        &self.selection
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    pub fn view_date(&self) -> NaiveDate {
        self.view_date
    }

    pub fn creation_range(&self) -> DateRange {
        self.creation_range
    }

    pub fn stats_range(&self) -> DateRange {
        self.stats_range
    }

    /// Runs one transition and persists what it changed.
    #[instrument(skip(self))]
    pub fn apply(&mut self, command: Command) -> anyhow::Result<Dirty> {
        let dirty = match command {
            Command::SetTitle(title) => self.state.set_title(&title),
            Command::AddTask(name) => self.state.add_task(&name, self.creation_range),
            Command::AddTaskOver { name, range } => self.state.add_task(&name, range),
            Command::ToggleDone { date, name } => self.state.toggle_done(date, &name),
            Command::ToggleSelection(name) => {
                if !self.selection.remove(&name) {
                    self.selection.insert(name);
                }
                Dirty::NONE
            }
            Command::DeleteSelected => {
                let names = std::mem::take(&mut self.selection);
                self.state.delete_tasks(&names)
            }
            Command::DeleteTasks(names) => {
                self.selection.clear();
                self.state.delete_tasks(&names)
            }
            Command::ViewDate(date) => {
                self.view_date = date;
                Dirty::NONE
            }
            Command::SetCreationRange(range) => {
                self.creation_range = range;
                self.creation_pinned = true;
                Dirty::NONE
            }
            Command::SetStatsRange(range) => {
                self.stats_range = range;
                self.stats_pinned = true;
                Dirty::NONE
            }
            Command::FollowToday => {
                self.creation_pinned = false;
                self.stats_pinned = false;
                self.refresh_windows();
                Dirty::NONE
            }
            Command::Reset => {
                self.selection.clear();
                let dirty = self.state.clear();
                self.store.clear()?;
                info!("reset all checklist state");
                return Ok(dirty);
            }
        };

        self.commit(dirty)?;
        Ok(dirty)
    }

    /// Instances for the viewed date, materializing it on first access.
    pub fn current_instances(&mut self) -> anyhow::Result<Vec<TaskInstance>> {
        self.instances_on(self.view_date)
    }

    /// Instances for `date`, materializing it on first access. The viewed
    /// date is left alone.
    #[instrument(skip(self), fields(date = %date))]
    pub fn instances_on(&mut self, date: NaiveDate) -> anyhow::Result<Vec<TaskInstance>> {
        let (instances, dirty) = self.state.ensure_instances(date);
        let instances = instances.to_vec();
        self.commit(dirty)?;
        Ok(instances)
    }

    pub fn stats(&self) -> TaskStats {
        self.stats_over(self.stats_range)
    }

    pub fn stats_over(&self, range: DateRange) -> TaskStats {
        compute_stats(&self.state.tasks_by_date, range)
    }

    /// Moves `today`, the viewed date and any range still on its trailing
    /// window forward when the clock reports a new calendar day. Returns
    /// whether a rollover happened.
    #[instrument(skip(self, clock))]
    pub fn tick<C: Clock + ?Sized>(&mut self, clock: &C) -> bool {
        let now = clock.today();
        if now == self.today {
            return false;
        }
        info!(from = %self.today, to = %now, "calendar day rolled over");
        self.today = now;
        self.view_date = now;
        self.refresh_windows();
        true
    }

    fn refresh_windows(&mut self) {
        if !self.creation_pinned {
            self.creation_range = trailing_window(self.today, self.windows.creation_days);
        }
        if !self.stats_pinned {
            self.stats_range = trailing_window(self.today, self.windows.stats_days);
        }
        debug!(
            creation = %self.creation_range,
            stats = %self.stats_range,
            "ranges refreshed"
        );
    }

    fn commit(&mut self, dirty: Dirty) -> anyhow::Result<()> {
        if dirty.is_clean() {
            debug!("no persisted fields changed");
            return Ok(());
        }
        save_dirty(&mut self.store, &self.state, dirty)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::NaiveDate;

    use super::{Command, Controller, Windows};
    use crate::datetime::FixedClock;
    use crate::model::{DateRange, StatsEntry, TaskInstance};
    use crate::storage::{
        CATALOG_SLOT, CorruptPolicy, KeyValueStore, MemoryStore, TASKS_BY_DATE_SLOT, TITLE_SLOT,
    };

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).expect("valid date")
    }

    fn controller(today: NaiveDate) -> Controller<MemoryStore> {
        Controller::open(
            MemoryStore::new(),
            CorruptPolicy::Fail,
            today,
            Windows::default(),
        )
        .expect("open controller")
    }

    #[test]
    fn add_then_toggle_then_stats() {
        let mut ctl = controller(day(3));
        ctl.apply(Command::SetCreationRange(DateRange::new(day(1), day(3))))
            .expect("range");
        ctl.apply(Command::AddTask("Exercise".to_string()))
            .expect("add");

        assert_eq!(ctl.state().tasks_by_date.len(), 3);

        ctl.apply(Command::ToggleDone {
            date: day(2),
            name: "Exercise".to_string(),
        })
        .expect("toggle");
        ctl.apply(Command::SetStatsRange(DateRange::new(day(1), day(3))))
            .expect("stats range");

        let stats = ctl.stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(
            stats["Exercise"],
            StatsEntry {
                total: 3,
                completed: 1
            }
        );
        assert_eq!(stats["Exercise"].percent(), 33);
    }

    #[test]
    fn every_transition_persists_its_fields() {
        let mut ctl = controller(day(1));
        ctl.apply(Command::SetTitle("Habits".to_string()))
            .expect("title");
        ctl.apply(Command::AddTask("Read".to_string())).expect("add");

        let store = ctl.store();
        assert_eq!(
            store.get(TITLE_SLOT).expect("get").as_deref(),
            Some("Habits")
        );
        assert_eq!(
            store.get(CATALOG_SLOT).expect("get").as_deref(),
            Some(r#"[{"name":"Read"}]"#)
        );
        assert!(store.get(TASKS_BY_DATE_SLOT).expect("get").is_some());
    }

    #[test]
    fn viewing_a_new_date_materializes_and_persists_it() {
        let mut ctl = controller(day(1));
        ctl.apply(Command::SetCreationRange(DateRange::new(day(2), day(1))))
            .expect("empty range");
        ctl.apply(Command::AddTask("Read".to_string())).expect("add");
        assert!(ctl.state().tasks_by_date.is_empty());

        ctl.apply(Command::ViewDate(day(9))).expect("view");
        let instances = ctl.current_instances().expect("instances");
        assert_eq!(instances, vec![TaskInstance::pending("Read")]);

        let stored = ctl
            .store()
            .get(TASKS_BY_DATE_SLOT)
            .expect("get")
            .expect("persisted");
        assert!(stored.contains("2024-01-09"));
    }

    #[test]
    fn selection_drives_deletion_and_is_cleared() {
        let mut ctl = controller(day(1));
        for name in ["Read", "Walk", "Stretch"] {
            ctl.apply(Command::AddTask(name.to_string())).expect("add");
        }
        ctl.apply(Command::ToggleSelection("Read".to_string()))
            .expect("select");
        ctl.apply(Command::ToggleSelection("Walk".to_string()))
            .expect("select");
        ctl.apply(Command::ToggleSelection("Walk".to_string()))
            .expect("unselect");
        assert_eq!(ctl.selection().len(), 1);

        ctl.apply(Command::DeleteSelected).expect("delete");
        assert!(ctl.selection().is_empty());
        let names: Vec<&str> = ctl
            .state()
            .catalog
            .iter()
            .map(|task| task.name.as_str())
            .collect();
        assert_eq!(names, vec!["Walk", "Stretch"]);
    }

    #[test]
    fn delete_tasks_clears_selection() {
        let mut ctl = controller(day(1));
        ctl.apply(Command::AddTask("Read".to_string())).expect("add");
        ctl.apply(Command::ToggleSelection("Read".to_string()))
            .expect("select");

        let names: BTreeSet<String> = ["Read".to_string()].into_iter().collect();
        ctl.apply(Command::DeleteTasks(names)).expect("delete");
        assert!(ctl.selection().is_empty());
        assert!(ctl.state().catalog.is_empty());
    }

    #[test]
    fn reset_wipes_state_selection_and_store() {
        let mut ctl = controller(day(1));
        ctl.apply(Command::SetTitle("Habits".to_string()))
            .expect("title");
        ctl.apply(Command::AddTask("Read".to_string())).expect("add");
        ctl.apply(Command::ToggleSelection("Read".to_string()))
            .expect("select");

        ctl.apply(Command::Reset).expect("reset");

        assert!(ctl.state().title.is_empty());
        assert!(ctl.state().catalog.is_empty());
        assert!(ctl.state().tasks_by_date.is_empty());
        assert!(ctl.selection().is_empty());
        assert!(ctl.store().is_empty());
    }

    #[test]
    fn tick_follows_day_rollover() {
        let mut ctl = controller(day(1));
        ctl.apply(Command::ViewDate(day(5))).expect("view");

        let clock = FixedClock::new(day(1));
        assert!(!ctl.tick(&clock));
        assert_eq!(ctl.view_date(), day(5));

        clock.set(day(2));
        assert!(ctl.tick(&clock));
        assert_eq!(ctl.today(), day(2));
        assert_eq!(ctl.view_date(), day(2));
        assert!(!ctl.tick(&clock));
    }

    #[test]
    fn rollover_moves_trailing_windows() {
        let mut ctl = controller(day(8));
        assert_eq!(ctl.creation_range(), DateRange::new(day(2), day(8)));

        let clock = FixedClock::new(day(9));
        assert!(ctl.tick(&clock));
        assert_eq!(ctl.creation_range(), DateRange::new(day(3), day(9)));
        assert_eq!(ctl.stats_range(), DateRange::new(day(3), day(9)));

        ctl.current_instances().expect("materialize new today");
        ctl.apply(Command::AddTask("Read".to_string())).expect("add");
        assert_eq!(
            ctl.state().instances(day(9)).expect("new today"),
            &[TaskInstance::pending("Read")]
        );
    }

    #[test]
    fn explicit_ranges_survive_rollover_until_released() {
        let mut ctl = controller(day(8));
        let pinned = DateRange::new(day(1), day(2));
        ctl.apply(Command::SetStatsRange(pinned)).expect("stats range");

        let clock = FixedClock::new(day(9));
        ctl.tick(&clock);
        assert_eq!(ctl.stats_range(), pinned);
        assert_eq!(ctl.creation_range(), DateRange::new(day(3), day(9)));

        ctl.apply(Command::FollowToday).expect("follow");
        assert_eq!(ctl.stats_range(), DateRange::new(day(3), day(9)));
        clock.set(day(10));
        ctl.tick(&clock);
        assert_eq!(ctl.stats_range(), DateRange::new(day(4), day(10)));
    }

    #[test]
    fn one_off_add_keeps_session_creation_range() {
        let mut ctl = controller(day(8));
        let before = ctl.creation_range();
        ctl.apply(Command::AddTaskOver {
            name: "Read".to_string(),
            range: DateRange::single(day(20)),
        })
        .expect("add");

        assert_eq!(ctl.creation_range(), before);
        let days: Vec<NaiveDate> = ctl.state().tasks_by_date.keys().copied().collect();
        assert_eq!(days, vec![day(20)]);
    }

    #[test]
    fn instances_on_keeps_view_date() {
        let mut ctl = controller(day(8));
        ctl.apply(Command::AddTask("Read".to_string())).expect("add");
        let instances = ctl.instances_on(day(15)).expect("materialize");
        assert_eq!(instances, vec![TaskInstance::pending("Read")]);
        assert_eq!(ctl.view_date(), day(8));
    }
}
