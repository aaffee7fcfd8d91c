//! Log file naming with same-day splits
//!
//! The active log file is `{year}-{month}-{day}_{split}.log` (no zero padding).
//! The split resets to 1 whenever the local date changes and otherwise only
//! grows.

use std::path::Path;
use std::sync::Mutex;

use chrono::{Datelike, Local, NaiveDate};

/// Suffix shared by every uncompressed log file
pub const ROTATION_SUFFIX: &str = ".log";

/// Date and split of the log file currently being written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationState {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub split: u32,
}

impl Default for RotationState {
    fn default() -> Self {
        Self {
            year: 1970,
            month: 1,
            day: 1,
            split: 1,
        }
    }
}

impl RotationState {
    /// Move to `date`, resetting the split if the day changed
    fn refresh(&mut self, date: NaiveDate) {
        if (date.year(), date.month(), date.day()) != (self.year, self.month, self.day) {
            self.split = 1;
            self.year = date.year();
            self.month = date.month();
            self.day = date.day();
        }
    }

    /// File name derived from this state
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}-{}_{}{}",
            self.year, self.month, self.day, self.split, ROTATION_SUFFIX
        )
    }
}

/// Computes the name of the active log file
#[derive(Debug, Default)]
pub struct RotationNamer {
    state: Mutex<RotationState>,
}

impl RotationNamer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the file to write to right now
    pub fn current_file_name(&self) -> String {
        self.file_name_for(Local::now().date_naive())
    }

    /// Name of the file to write to on `date`
    pub fn file_name_for(&self, date: NaiveDate) -> String {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.refresh(date);
        state.file_name()
    }

    /// Skip past split numbers already taken in `log_dir`
    ///
    /// Must run once before the first write so that several processes sharing
    /// one log directory never append to each other's files. A check that
    /// straddles midnight may race; that is accepted.
    pub fn advance_split_if_taken(&self, log_dir: &Path) {
        self.advance_split_for(Local::now().date_naive(), log_dir)
    }

    /// Like [`advance_split_if_taken`](Self::advance_split_if_taken) for a fixed date
    pub fn advance_split_for(&self, date: NaiveDate, log_dir: &Path) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.refresh(date);
        while log_dir.join(state.file_name()).exists() {
            state.split += 1;
        }
    }

    /// Snapshot of the rotation state
    pub fn state(&self) -> RotationState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
