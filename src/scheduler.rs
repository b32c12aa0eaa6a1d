//! Cooperative task scheduler. Long-running behaviors (movement, stuck
//! checks, retreat monitoring, tactic timers) are registered here as plain
//! data and dispatched by the engine each tick. A task is keyed by the subject
//! it acts on and the behavior it performs; registering the same key again
//! replaces the pending task, and cancelling a subject drops all its tasks.

use crate::host::AgentId;
use crate::military::squad::SquadId;
use crate::military::tactics::TacticStep;
use crate::raid::RaidId;
use glam::DVec3;
use log::*;
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Subject {
    Global,
    Raid(RaidId),
    Squad(SquadId),
    Agent(AgentId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Behavior {
    Movement,
    StuckCheck,
    StuckPush,
    Coordination,
    RetreatCheck,
    RetreatMonitor,
    Tactic(TacticStep),
    Cleanup,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TaskKey {
    pub subject: Subject,
    pub behavior: Behavior,
}

/// Work the engine knows how to run.
#[derive(Clone, Debug, PartialEq)]
pub enum Task {
    /// Advance every navigating agent along its path.
    MovementPass,
    StuckPass,
    /// Delayed horizontal shove after a stuck jump.
    StuckPush { agent: AgentId, goal: DVec3 },
    CoordinationPass(RaidId),
    RetreatCheck(RaidId),
    RetreatMonitor(AgentId),
    Tactic { squad: SquadId, step: TacticStep },
    Cleanup,
}

impl Task {
    pub fn key(&self) -> TaskKey {
        let (subject, behavior) = match self {
            Task::MovementPass => (Subject::Global, Behavior::Movement),
            Task::StuckPass => (Subject::Global, Behavior::StuckCheck),
            Task::StuckPush { agent, .. } => (Subject::Agent(*agent), Behavior::StuckPush),
            Task::CoordinationPass(raid) => (Subject::Raid(*raid), Behavior::Coordination),
            Task::RetreatCheck(raid) => (Subject::Raid(*raid), Behavior::RetreatCheck),
            Task::RetreatMonitor(agent) => (Subject::Agent(*agent), Behavior::RetreatMonitor),
            Task::Tactic { squad, step } => (Subject::Squad(*squad), Behavior::Tactic(*step)),
            Task::Cleanup => (Subject::Global, Behavior::Cleanup),
        };

        TaskKey { subject, behavior }
    }
}

/// What a handler wants done with its task after running.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskResult {
    Running,
    Done,
}

#[derive(Clone, Debug)]
struct ScheduledTask {
    task: Task,
    next_run: u64,
    period: Option<u64>,
    sequence: u64,
}

#[derive(Default)]
pub struct TaskScheduler {
    tasks: HashMap<TaskKey, ScheduledTask>,
    next_sequence: u64,
}

impl TaskScheduler {
    pub fn new() -> TaskScheduler {
        TaskScheduler::default()
    }

    fn insert(&mut self, task: Task, next_run: u64, period: Option<u64>) {
        let key = task.key();
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        if self.tasks.contains_key(&key) {
            trace!("Replacing scheduled task {:?}", key);
        }

        self.tasks.insert(
            key,
            ScheduledTask {
                task,
                next_run,
                period,
                sequence,
            },
        );
    }

    /// Run once at `at`.
    pub fn schedule_once(&mut self, task: Task, at: u64) {
        self.insert(task, at, None);
    }

    /// Run at `first_run` and then every `period` ticks until cancelled or done.
    pub fn schedule_repeating(&mut self, task: Task, first_run: u64, period: u64) {
        self.insert(task, first_run, Some(period.max(1)));
    }

    pub fn cancel(&mut self, key: &TaskKey) -> bool {
        self.tasks.remove(key).is_some()
    }

    /// Drop every task acting on `subject`.
    pub fn cancel_subject(&mut self, subject: Subject) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|key, _| key.subject != subject);
        before - self.tasks.len()
    }

    pub fn is_scheduled(&self, key: &TaskKey) -> bool {
        self.tasks.contains_key(key)
    }

    pub fn next_run(&self, key: &TaskKey) -> Option<u64> {
        self.tasks.get(key).map(|entry| entry.next_run)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks due at `now`, in registration order. One-shot tasks are removed;
    /// repeating tasks are pushed forward by their period.
    pub fn take_due(&mut self, now: u64) -> Vec<(TaskKey, Task)> {
        let mut due: Vec<(u64, TaskKey, Task)> = Vec::new();

        self.tasks.retain(|key, entry| {
            if entry.next_run > now {
                return true;
            }

            due.push((entry.sequence, *key, entry.task.clone()));

            match entry.period {
                Some(period) => {
                    entry.next_run = now + period;
                    true
                }
                None => false,
            }
        });

        due.sort_by_key(|(sequence, _, _)| *sequence);

        due.into_iter().map(|(_, key, task)| (key, task)).collect()
    }

    /// Apply a handler's verdict. A finished repeating task is cancelled only
    /// if it was not re-registered in the meantime.
    pub fn complete(&mut self, key: &TaskKey, ran: &Task, result: TaskResult) {
        if result == TaskResult::Done {
            if let Some(entry) = self.tasks.get(key) {
                if entry.task == *ran && entry.period.is_some() {
                    self.tasks.remove(key);
                }
            }
        }
    }
}
