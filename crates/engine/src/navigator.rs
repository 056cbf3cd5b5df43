// EDB - Ethereum Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Step cursor of a loaded trace.
//!
//! The navigator only decides where the cursor goes. Publishing the move and kicking
//! off location resolution is up to the session, which owns the navigator.

use serde::{Deserialize, Serialize};

use crate::{error::NavigationError, frames::CallFrameIndex};

/// Relative cursor movements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Movement {
    /// One step forward
    Next,
    /// One step back
    Previous,
    /// The first step
    First,
    /// The last step
    Last,
    /// Next step that is not inside a call made from the current frame
    StepOverForward,
    /// Previous step that is not inside a call made from the current frame
    StepOverBack,
    /// First step after the current frame returns
    JumpOut,
}

/// Cursor over the steps of a loaded trace
///
/// Invariant: `cursor < len`, and `len > 0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepNavigator {
    cursor: usize,
    len: usize,
}

impl StepNavigator {
    /// Create a navigator at step 0 of a trace with `len` steps
    ///
    /// Returns `None` for empty traces, which have no valid cursor.
    pub fn new(len: usize) -> Option<Self> {
        (len > 0).then_some(Self { cursor: 0, len })
    }

    /// Current step
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of steps
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the trace has no step. Always false for a constructed navigator.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Move the cursor to `index`, rejecting indices outside the trace
    pub fn jump_to(&mut self, index: usize) -> Result<usize, NavigationError> {
        if index >= self.len {
            return Err(NavigationError::OutOfRange { index, len: self.len });
        }
        self.cursor = index;
        Ok(index)
    }

    /// Where a movement would put the cursor
    ///
    /// `None` means the movement is a no-op at the current position (trace boundary,
    /// already there, or no enclosing frame to leave).
    pub fn target(&self, movement: Movement, frames: &CallFrameIndex) -> Option<usize> {
        let target = match movement {
            Movement::Next => self.cursor.checked_add(1).filter(|&next| next < self.len),
            Movement::Previous => self.cursor.checked_sub(1),
            Movement::First => Some(0),
            Movement::Last => Some(self.len - 1),
            Movement::StepOverForward => self.step_over_forward(frames),
            Movement::StepOverBack => self.step_over_back(frames),
            Movement::JumpOut => self.jump_out(frames),
        };
        target.filter(|&index| index != self.cursor)
    }

    fn step_over_forward(&self, frames: &CallFrameIndex) -> Option<usize> {
        let Ok(depth) = frames.depth_at(self.cursor) else {
            return self.target(Movement::Next, frames);
        };
        // A step whose frame is unknown stops the scan there
        (self.cursor + 1..self.len)
            .find(|&i| frames.depth_at(i).map_or(true, |d| d <= depth))
    }

    fn step_over_back(&self, frames: &CallFrameIndex) -> Option<usize> {
        let Ok(depth) = frames.depth_at(self.cursor) else {
            return self.target(Movement::Previous, frames);
        };
        (0..self.cursor).rev().find(|&i| frames.depth_at(i).map_or(true, |d| d <= depth))
    }

    fn jump_out(&self, frames: &CallFrameIndex) -> Option<usize> {
        let frame = frames.frame_at(self.cursor).ok()?;
        frame.parent?;
        frame.exited_at.filter(|&exit| exit < self.len)
    }
}
