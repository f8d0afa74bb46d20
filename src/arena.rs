//! Generation-checked task arena
//!
//! The scheduler owns every live task in a slot arena. A [`TaskRef`] carries
//! the slot index plus the slot's generation at insertion time, so a handle
//! that outlives its task is detected as stale instead of silently aliasing
//! whatever task reuses the slot.

use crate::task::{StepFn, SuspendReason, Task};
use std::fmt;
use std::sync::Arc;

/// Generation-checked reference to an arena slot.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct TaskRef {
    index: u32,
    generation: u32,
}

impl TaskRef {
    /// Construct a reference from raw parts. Normally only the scheduler
    /// produces these.
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index.
    pub fn index(self) -> u32 {
        self.index
    }

    /// Slot generation at insertion time.
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskRef({}v{})", self.index, self.generation)
    }
}

/// Hook run when a task reaches its terminal state, whatever that state is.
/// Used by the cancellation registry's rendezvous confirmation.
pub type ExitHook = Box<dyn FnOnce() + Send>;

/// Arena entry: the shared record plus scheduler-private execution state.
pub struct TaskEntry {
    /// Shared task record
    pub task: Arc<Task>,
    /// Step function; taken while the task runs
    pub body: Option<StepFn>,
    /// Current wait condition, for wake bookkeeping and cancellation cleanup
    pub wait: Option<SuspendReason>,
    /// Cleanup hooks run exactly once at termination
    pub exit_hooks: Vec<ExitHook>,
}

impl TaskEntry {
    /// Create an entry for a freshly spawned task.
    pub fn new(task: Arc<Task>, body: StepFn) -> Self {
        Self {
            task,
            body: Some(body),
            wait: None,
            exit_hooks: Vec::new(),
        }
    }
}

struct Slot {
    generation: u32,
    entry: Option<TaskEntry>,
}

/// Slot arena with a free list; generations bump on removal.
pub struct TaskArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl TaskArena {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Insert an entry, reusing a free slot when available.
    pub fn insert(&mut self, entry: TaskEntry) -> TaskRef {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(entry);
                TaskRef::new(index, slot.generation)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                TaskRef::new(index, 0)
            }
        }
    }

    /// Whether `r` refers to a live entry.
    pub fn contains(&self, r: TaskRef) -> bool {
        self.get(r).is_some()
    }

    /// Borrow the entry behind `r`, if the generation still matches.
    pub fn get(&self, r: TaskRef) -> Option<&TaskEntry> {
        let slot = self.slots.get(r.index() as usize)?;
        if slot.generation != r.generation() {
            return None;
        }
        slot.entry.as_ref()
    }

    /// Mutably borrow the entry behind `r`, if the generation still matches.
    pub fn get_mut(&mut self, r: TaskRef) -> Option<&mut TaskEntry> {
        let slot = self.slots.get_mut(r.index() as usize)?;
        if slot.generation != r.generation() {
            return None;
        }
        slot.entry.as_mut()
    }

    /// Clone the shared task record behind `r`.
    pub fn task(&self, r: TaskRef) -> Option<Arc<Task>> {
        self.get(r).map(|e| e.task.clone())
    }

    /// Remove the entry behind `r`, bumping the slot generation so stale
    /// references are detected.
    pub fn remove(&mut self, r: TaskRef) -> Option<TaskEntry> {
        let slot = self.slots.get_mut(r.index() as usize)?;
        if slot.generation != r.generation() {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(r.index());
        Some(entry)
    }

    /// Number of live entries.
    pub fn live_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// References to every live entry, in slot order.
    pub fn live_refs(&self) -> Vec<TaskRef> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.entry.is_some())
            .map(|(i, s)| TaskRef::new(i as u32, s.generation))
            .collect()
    }
}

impl Default for TaskArena {
    fn default() -> Self {
        Self::new()
    }
}
