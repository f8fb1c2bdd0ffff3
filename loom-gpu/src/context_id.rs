// SPDX-FileCopyrightText: 2025 loom contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Process-wide context identifiers.
//!
//! Every `Context` receives a fresh id at construction. Ids are allocated from
//! a monotonically increasing counter and never handed out twice, so a message
//! addressed to a destroyed context can never reach a newer one.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Raw value reserved for "no context".
const INVALID_ID: u32 = 0;

static NEXT_ID: AtomicU32 = AtomicU32::new(INVALID_ID + 1);

/// Identifier of a `Context` instance.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u32);

impl ContextId {
    /// Allocate a new, never-before-seen id.
    pub fn next() -> Self {
        let id = NEXT_ID
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| id.checked_add(1))
            .expect("context id space exhausted");
        Self(id)
    }

    pub const fn invalid() -> Self {
        Self(INVALID_ID)
    }

    #[inline]
    pub const fn is_valid(&self) -> bool {
        self.0 != INVALID_ID
    }

    pub fn make_invalid(&mut self) {
        self.0 = INVALID_ID;
    }

    #[inline]
    pub const fn raw(&self) -> u32 {
        self.0
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::invalid()
    }
}

impl fmt::Debug for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "ContextId({})", self.0)
        } else {
            write!(f, "ContextId::INVALID")
        }
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}
