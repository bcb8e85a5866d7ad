//! channel.rs — the optional cooperative channel VM (spec §4.8).
//!
//! The source spawns a genuine worker thread for native builds. Doing the
//! same here would require sharing the `Rc`-based value graph across an
//! OS thread boundary, which has no safe, idiomatic translation (see
//! DESIGN.md). Instead both the "native" and "hosted" paths described by
//! the spec collapse to the same thing here: the interpreter runs inline
//! and *cooperatively yields* back to the caller at the one suspension
//! point, `__string_channel_call`, resuming later from the exact paused
//! frame stack. Single-VM, single-thread ownership is preserved either way.

use std::cell::{Cell, RefCell};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Ready,
    Running,
    Suspended,
    Finished,
}

pub struct ChannelState {
    pub phase: Cell<Phase>,
    /// The string exchanged between script and host. Script writes when
    /// suspending; host writes via `write_jsonrpc_response`.
    pub slot: RefCell<Option<String>>,
    pub stop: Cell<bool>,
    /// Set by the `__string_channel_call` native fn; the run loop checks
    /// this after every dispatched instruction and yields control when set.
    pub suspend_requested: Cell<bool>,
}

impl Default for ChannelState {
    fn default() -> Self {
        ChannelState {
            phase: Cell::new(Phase::Ready),
            slot: RefCell::new(None),
            stop: Cell::new(false),
            suspend_requested: Cell::new(false),
        }
    }
}

impl ChannelState {
    pub fn get_state(&self) -> Phase {
        self.phase.get()
    }

    pub fn terminate(&self) {
        self.stop.set(true);
        self.phase.set(Phase::Finished);
    }

    pub fn reset_state(&self) {
        if self.phase.get() == Phase::Finished {
            self.phase.set(Phase::Ready);
            self.stop.set(false);
            *self.slot.borrow_mut() = None;
        }
    }

    /// Host → script: deliver a response and resume the script.
    pub fn write_jsonrpc_response(&self, response: String) {
        *self.slot.borrow_mut() = Some(response);
        self.phase.set(Phase::Running);
    }

    /// Script → host: called from inside `__string_channel_call`.
    pub fn request_suspend(&self, outgoing: String) {
        *self.slot.borrow_mut() = Some(outgoing);
        self.phase.set(Phase::Suspended);
        self.suspend_requested.set(true);
    }

    pub fn take_incoming(&self) -> Option<String> {
        self.slot.borrow_mut().take()
    }
}
