//! Per-read lifecycle decisions
//!
//! `on_read` is a pure function of the tag as it was before the read, the tag
//! after its location update, and the reporting reader's roles. It returns the
//! next lifecycle value plus the effects the registry must carry out.

use crate::domain::event::TagEvent;
use crate::domain::tag::{Lifecycle, TagSnapshot, TagState};
use crate::domain::types::ReaderRoles;
use smallvec::SmallVec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// A POS read departs a tag that arrived more than this long before the read
    pub pos_departed_ms: u64,
    /// A POS-departed tag must stay departed at least this long
    pub pos_return_ms: u64,
}

/// The tag after its location update, and the reader that produced the read
#[derive(Debug, Clone, Copy)]
pub struct AppliedRead<'a> {
    pub roles: ReaderRoles,
    pub reader_device: &'a str,
    pub previous: &'a TagSnapshot,
    pub location: &'a str,
    pub device_location: &'a str,
    pub facility: &'a str,
    pub last_read: u64,
}

impl AppliedRead<'_> {
    fn moved(&self) -> bool {
        self.previous.location != self.location
    }

    fn changed_facility(&self) -> bool {
        self.previous.facility != self.facility
    }

    /// The reader is the one the tag is currently located at
    fn at_reader(&self) -> bool {
        self.reader_device == self.device_location
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Event about the tag at its current location and facility
    Emit(TagEvent),
    /// `departed` from the location and facility held before this read
    DepartPrevious,
    /// Register the tag in the reporting reader's facility exiting set
    JoinExiting,
    /// Drop the tag from any exiting set
    LeaveExiting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub lifecycle: Lifecycle,
    pub effects: SmallVec<[Effect; 4]>,
}

struct Decider<'a> {
    read: &'a AppliedRead<'a>,
    thresholds: &'a Thresholds,
    lifecycle: Lifecycle,
    effects: SmallVec<[Effect; 4]>,
}

impl Decider<'_> {
    fn enter(&mut self, state: TagState) {
        self.lifecycle = self.lifecycle.enter(state, self.read.last_read);
    }

    fn movement(&mut self) {
        if !self.read.moved() {
            return;
        }
        if self.read.changed_facility() {
            self.effects.push(Effect::DepartPrevious);
            self.effects.push(Effect::Emit(TagEvent::Arrival));
        } else {
            self.effects.push(Effect::Emit(TagEvent::Moved));
        }
    }

    fn exit_promotion(&mut self) {
        if self.read.roles.exit && self.read.at_reader() {
            self.enter(TagState::Exiting);
            self.effects.push(Effect::JoinExiting);
        }
    }

    /// Returns true when the tag departed
    fn pos_depart(&mut self) -> bool {
        let expired = self
            .read
            .last_read
            .checked_sub(self.thresholds.pos_departed_ms)
            .is_some_and(|expiration| self.lifecycle.last_arrived < expiration);
        if expired {
            self.enter(TagState::DepartedPos);
            self.effects.push(Effect::Emit(TagEvent::Departed));
        }
        expired
    }

    fn tag_return(&mut self) {
        let event = if self.read.changed_facility() { TagEvent::Arrival } else { TagEvent::Returned };
        self.effects.push(Effect::Emit(event));
        self.enter(TagState::Present);
    }

    fn pos_return_due(&self) -> bool {
        self.read
            .last_read
            .checked_sub(self.thresholds.pos_return_ms)
            .is_some_and(|on_or_before| self.lifecycle.last_departed < on_or_before)
    }
}

/// Decide the lifecycle consequence of one applied read
pub fn on_read(read: &AppliedRead<'_>, thresholds: &Thresholds) -> Transition {
    let before = read.previous.lifecycle;
    let mut d = Decider { read, thresholds, lifecycle: before, effects: SmallVec::new() };
    let pos = read.roles.pos;

    match before.state {
        TagState::Unknown => {
            // POS readers never originate tags
            if !pos {
                d.effects.push(Effect::Emit(TagEvent::Arrival));
                d.enter(TagState::Present);
            }
        }
        TagState::Present => {
            if pos {
                if !d.pos_depart() {
                    d.movement();
                }
            } else {
                d.exit_promotion();
                d.movement();
            }
        }
        TagState::Exiting => {
            if pos {
                d.pos_depart();
            } else {
                if !read.roles.exit && read.at_reader() {
                    d.enter(TagState::Present);
                }
                d.movement();
            }
        }
        TagState::DepartedExit => {
            if !pos {
                d.tag_return();
                d.exit_promotion();
            }
        }
        TagState::DepartedPos => {
            if !pos && d.pos_return_due() {
                d.tag_return();
                d.exit_promotion();
            }
        }
    }

    if before.state == TagState::Exiting && d.lifecycle.state != TagState::Exiting {
        d.effects.push(Effect::LeaveExiting);
    }

    Transition { lifecycle: d.lifecycle, effects: d.effects }
}
