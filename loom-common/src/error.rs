// SPDX-FileCopyrightText: 2025 loom contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use thiserror::Error;

/// Failure delivered to an async readback callback.
///
/// Every accepted readback request receives exactly one callback; when the
/// pixels cannot be produced the callback carries one of these instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReadPixelsError {
    #[error("texture to buffer transfer could not be scheduled")]
    TransferFailed,
    #[error("device lost before the transfer completed")]
    DeviceLost,
    #[error("transfer buffer could not be mapped")]
    MapFailed,
    #[error("context destroyed before the transfer completed")]
    Cancelled,
}

/// Outcome reported to a recording's finished callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackResult {
    Success,
    Failed,
}

impl CallbackResult {
    #[inline]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}
