//! Change-trigger callbacks.
//!
//! Subscribers (cloud sync, log shipping, application code) register a
//! callback filtered by model and event mask. CHANGE fires synchronously
//! inside the mutating call; COMMIT fires when the change reaches the
//! journal, either immediately or from the delayed-commit timer.

use crate::item::Item;
use bitflags::bitflags;

bitflags! {
    /// Events a callback can subscribe to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Events: u32 {
        /// The in-memory item changed.
        const CHANGE = 1;
        /// The change was written to the journal (or is in-memory only).
        const COMMIT = 2;
        /// Reserved.
        const FREE = 4;
    }
}

/// The mutation command that caused a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmd {
    Create,
    Update,
    Upsert,
    Remove,
}

impl Cmd {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cmd::Create => "create",
            Cmd::Update => "update",
            Cmd::Upsert => "upsert",
            Cmd::Remove => "remove",
        }
    }

    pub(crate) fn parse(text: &str) -> Option<Cmd> {
        match text {
            "create" => Some(Cmd::Create),
            "update" => Some(Cmd::Update),
            "upsert" => Some(Cmd::Upsert),
            "remove" => Some(Cmd::Remove),
            _ => None,
        }
    }
}

impl std::fmt::Display for Cmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context handed to a trigger callback.
#[derive(Debug)]
pub struct TriggerCtx<'a> {
    /// Model of the affected item, when known.
    pub model: Option<&'a str>,
    /// The affected item after the mutation (before removal for `Remove`).
    pub item: &'a Item,
    /// The mutation command.
    pub cmd: Cmd,
    /// Which of the subscribed events actually occurred.
    pub events: Events,
}

/// Handle returned from callback registration, used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(pub(crate) u64);

type Trigger = Box<dyn Fn(&TriggerCtx<'_>)>;

struct Entry {
    id: CallbackId,
    model: Option<String>,
    events: Events,
    func: Trigger,
}

/// Registered callbacks, invoked in registration order.
#[derive(Default)]
pub(crate) struct CallbackRegistry {
    entries: Vec<Entry>,
    next_id: u64,
}

impl CallbackRegistry {
    pub fn add(
        &mut self,
        model: Option<&str>,
        events: Events,
        func: impl Fn(&TriggerCtx<'_>) + 'static,
    ) -> CallbackId {
        self.next_id += 1;
        let id = CallbackId(self.next_id);
        self.entries.push(Entry {
            id,
            model: model.map(str::to_string),
            events,
            func: Box::new(func),
        });
        id
    }

    pub fn remove(&mut self, id: CallbackId) {
        self.entries.retain(|e| e.id != id);
    }

    /// Invoke every entry whose model filter matches and whose event mask
    /// intersects `events`.
    pub fn fire(&self, model: Option<&str>, item: &Item, cmd: Cmd, events: Events) {
        for entry in &self.entries {
            if let (Some(want), Some(got)) = (entry.model.as_deref(), model) {
                if want != got {
                    continue;
                }
            } else if entry.model.is_some() && model.is_none() {
                continue;
            }
            let fired = entry.events & events;
            if fired.is_empty() {
                continue;
            }
            (entry.func)(&TriggerCtx {
                model,
                item,
                cmd,
                events: fired,
            });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("entries", &self.entries.len())
            .finish()
    }
}
