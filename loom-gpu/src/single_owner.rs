// SPDX-FileCopyrightText: 2025 loom contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Debug-only single-owner guard.
//!
//! Public entry points of an object acquire the guard for their duration. In
//! debug builds an entry from a second thread while another thread is still
//! inside the object panics. Reentry from the owning thread is allowed.
//! Release builds compile the guard down to nothing.

#[cfg(debug_assertions)]
use parking_lot::Mutex;
#[cfg(debug_assertions)]
use std::thread::{self, ThreadId};

#[derive(Default)]
pub struct SingleOwner {
    #[cfg(debug_assertions)]
    state: Mutex<OwnerState>,
}

#[cfg(debug_assertions)]
#[derive(Default)]
struct OwnerState {
    owner: Option<ThreadId>,
    depth: u32,
}

impl SingleOwner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the calling thread as the owner until the guard drops.
    #[inline]
    pub fn enter(&self, site: &'static str) -> SingleOwnerGuard<'_> {
        #[cfg(debug_assertions)]
        {
            let current = thread::current().id();
            let mut state = self.state.lock();
            match state.owner {
                Some(owner) if owner != current => {
                    drop(state);
                    panic!(
                        "single owner violation: `{}` entered from {:?} while owned by {:?}",
                        site, current, owner
                    );
                }
                _ => {
                    state.owner = Some(current);
                    state.depth += 1;
                }
            }
        }
        #[cfg(not(debug_assertions))]
        let _ = site;

        SingleOwnerGuard { owner: self }
    }
}

/// Releases ownership on drop.
pub struct SingleOwnerGuard<'a> {
    #[cfg_attr(not(debug_assertions), allow(dead_code))]
    owner: &'a SingleOwner,
}

impl Drop for SingleOwnerGuard<'_> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            let mut state = self.owner.state.lock();
            state.depth -= 1;
            if state.depth == 0 {
                state.owner = None;
            }
        }
    }
}
