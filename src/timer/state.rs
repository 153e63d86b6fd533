use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::models::{FocusSession, Subject};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum TimerStatus {
    #[default]
    Idle,
    Running,
}

/// A significant change of focus state. Ticks are not transitions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TimerTransition {
    Started,
    Switched,
    Paused,
    Resumed,
}

/// Read-only view of the timer handed to the heartbeat publisher and the shell.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FocusSnapshot {
    pub status: TimerStatus,
    pub active_subject_id: Option<String>,
    pub subject_label: Option<String>,
    pub elapsed_seconds: u64,
    pub subject_total_seconds: u64,
}

#[derive(Debug, Clone, Default)]
pub struct TimerState {
    session: FocusSession,
    subjects: Vec<Subject>,
}

impl TimerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from persisted values. The session comes back paused; an active
    /// subject that no longer exists is dropped.
    pub fn restore(session: FocusSession, subjects: Vec<Subject>) -> Self {
        let mut session = session.into_inert();
        let known = session
            .active_subject_id
            .as_ref()
            .map(|id| subjects.iter().any(|s| &s.id == id))
            .unwrap_or(false);
        if !known {
            session.active_subject_id = None;
        }

        Self { session, subjects }
    }

    pub fn status(&self) -> TimerStatus {
        if self.session.running {
            TimerStatus::Running
        } else {
            TimerStatus::Idle
        }
    }

    pub fn session(&self) -> &FocusSession {
        &self.session
    }

    pub fn subjects(&self) -> &[Subject] {
        &self.subjects
    }

    pub fn subject(&self, id: &str) -> Option<&Subject> {
        self.subjects.iter().find(|s| s.id == id)
    }

    pub fn active_subject(&self) -> Option<&Subject> {
        self.session
            .active_subject_id
            .as_deref()
            .and_then(|id| self.subject(id))
    }

    /// Register a subject, or rename an existing one without touching its total.
    pub fn add_subject(&mut self, id: &str, display_name: &str) -> Subject {
        match self.subjects.iter_mut().find(|s| s.id == id) {
            Some(existing) => {
                existing.display_name = display_name.to_string();
                existing.clone()
            }
            None => {
                let subject = Subject::new(id, display_name);
                self.subjects.push(subject.clone());
                subject
            }
        }
    }

    /// Focus on `id`. A different subject resets elapsed time; the same,
    /// paused subject resumes without a reset; the same, running subject is
    /// left alone.
    pub fn select_subject(&mut self, id: &str) -> Result<Option<TimerTransition>> {
        if self.subject(id).is_none() {
            bail!("unknown subject '{id}'");
        }

        let same = self.session.active_subject_id.as_deref() == Some(id);
        let transition = match (same, self.session.running) {
            (true, true) => None,
            (true, false) => {
                self.session.running = true;
                Some(TimerTransition::Resumed)
            }
            (false, was_running) => {
                self.session.active_subject_id = Some(id.to_string());
                self.session.elapsed_seconds = 0;
                self.session.running = true;
                if was_running {
                    Some(TimerTransition::Switched)
                } else {
                    Some(TimerTransition::Started)
                }
            }
        };

        Ok(transition)
    }

    pub fn pause(&mut self) -> Option<TimerTransition> {
        if !self.session.running {
            return None;
        }
        self.session.running = false;
        Some(TimerTransition::Paused)
    }

    pub fn resume(&mut self) -> Option<TimerTransition> {
        if self.session.running || self.active_subject().is_none() {
            return None;
        }
        self.session.running = true;
        Some(TimerTransition::Resumed)
    }

    /// One second of focus. Session elapsed and the subject total move together
    /// or not at all. Returns whether anything advanced.
    pub fn tick(&mut self) -> bool {
        if !self.session.running {
            return false;
        }
        let Some(active_id) = self.session.active_subject_id.as_deref() else {
            return false;
        };
        let Some(subject) = self.subjects.iter_mut().find(|s| s.id == active_id) else {
            return false;
        };

        subject.total_accumulated_seconds = subject.total_accumulated_seconds.saturating_add(1);
        self.session.elapsed_seconds = self.session.elapsed_seconds.saturating_add(1);
        true
    }

    pub fn snapshot(&self) -> FocusSnapshot {
        let active = self.active_subject();
        FocusSnapshot {
            status: self.status(),
            active_subject_id: self.session.active_subject_id.clone(),
            subject_label: active.map(|s| s.display_name.clone()),
            elapsed_seconds: self.session.elapsed_seconds,
            subject_total_seconds: active.map(|s| s.total_accumulated_seconds).unwrap_or(0),
        }
    }
}
