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

//! Executing-address resolution by call-frame replay.
//!
//! The index replays the trace's depth markers once, maintaining an explicit frame
//! stack, and records for every stretch of consecutive steps which frame is on top.
//! The executing address at a step is therefore determined by the frame stack at
//! that step, not by the most recent call instruction seen, which keeps reentrant
//! and delegated calls attributed correctly.
//!
//! Replay rules for each step after the first, relative to the previous step:
//! - depth + 1: enter a frame. The previous step must be a call-family instruction
//!   with a target (the frame runs the target's code) or CREATE/CREATE2 (the frame
//!   runs init code identified by the creating step).
//! - depth - k: leave k frames.
//! - same depth: stay. Calls to precompiles or accounts without code, and calls
//!   that fail before entering, never open a frame.
//! - anything else makes the trace malformed from that step on.

use rdb_common::types::{
    CallFrame, CallFrameId, CreationSite, ExecutingAddress, ResolutionError, Step, Trace,
};
use tracing::{debug, error};

/// A maximal run of steps executed by the same frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Segment {
    /// First step of the run
    start: usize,
    /// Frame on top of the stack during the run
    frame: CallFrameId,
}

/// Where the replay stopped making sense
#[derive(Debug, Clone, PartialEq, Eq)]
struct Malformation {
    step: usize,
    reason: String,
}

/// Per-trace index answering "which frame executes step `i`"
#[derive(Debug, Clone)]
pub struct CallFrameIndex {
    frames: Vec<CallFrame>,
    segments: Vec<Segment>,
    len: usize,
    malformed: Option<Malformation>,
}

impl CallFrameIndex {
    /// Replay the trace's call-depth markers into frames
    pub fn build(trace: &Trace) -> Self {
        let mut index = Self {
            frames: Vec::new(),
            segments: Vec::new(),
            len: trace.len(),
            malformed: None,
        };

        let Some(first) = trace.first() else {
            return index;
        };

        index.frames.push(CallFrame {
            id: CallFrameId(0),
            parent: None,
            depth: 0,
            address: trace.root,
            entered_at: 0,
            exited_at: None,
        });
        index.segments.push(Segment { start: 0, frame: CallFrameId(0) });

        let mut stack = vec![CallFrameId(0)];
        let mut prev: &Step = first;

        for (i, step) in trace.iter().enumerate().skip(1) {
            if let Err(reason) = index.replay(&mut stack, i, prev, step) {
                error!(step = i, %reason, "Trace is malformed, frames after this step are unknown");
                index.malformed = Some(Malformation { step: i, reason });
                break;
            }
            prev = step;
        }

        debug!(steps = index.len, frames = index.frames.len(), "Built call frame index");
        index
    }

    /// Apply the transition from `prev` to `step` (at index `i`) to the frame stack
    fn replay(
        &mut self,
        stack: &mut Vec<CallFrameId>,
        i: usize,
        prev: &Step,
        step: &Step,
    ) -> Result<(), String> {
        if step.depth == prev.depth {
            return Ok(());
        }

        if step.depth == prev.depth + 1 {
            let address = if prev.is_call() {
                let target = prev.call_target.ok_or_else(|| {
                    format!("call at step {} entered a frame without a call target", i - 1)
                })?;
                ExecutingAddress::Contract(target)
            } else if prev.is_create() {
                ExecutingAddress::Creation(CreationSite::Step(i - 1))
            } else {
                return Err(format!(
                    "depth increased after opcode 0x{:02x}, which cannot enter a frame",
                    prev.opcode
                ));
            };

            let parent = stack.last().copied();
            let id = CallFrameId(self.frames.len());
            self.frames.push(CallFrame {
                id,
                parent,
                depth: stack.len(),
                address,
                entered_at: i,
                exited_at: None,
            });
            stack.push(id);
            self.segments.push(Segment { start: i, frame: id });
            return Ok(());
        }

        if step.depth < prev.depth {
            let returns = prev.depth - step.depth;
            if returns >= stack.len() {
                return Err(format!(
                    "returned {returns} frame(s) with only {} open",
                    stack.len()
                ));
            }
            for _ in 0..returns {
                if let Some(id) = stack.pop() {
                    self.frames[id.0].exited_at = Some(i);
                }
            }
            let top = *stack.last().ok_or("frame stack underflow")?;
            self.segments.push(Segment { start: i, frame: top });
            return Ok(());
        }

        Err(format!("depth jumped from {} to {}", prev.depth, step.depth))
    }

    /// Number of steps covered by the index
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the index covers no steps
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// All frames in entry order
    pub fn frames(&self) -> &[CallFrame] {
        &self.frames
    }

    /// Look up a frame by id
    pub fn frame(&self, id: CallFrameId) -> Option<&CallFrame> {
        self.frames.get(id.0)
    }

    /// First step the replay could not make sense of, if any
    pub fn malformed_at(&self) -> Option<usize> {
        self.malformed.as_ref().map(|m| m.step)
    }

    /// The frame executing the given step
    pub fn frame_at(&self, index: usize) -> Result<&CallFrame, ResolutionError> {
        if index >= self.len {
            return Err(ResolutionError::StepOutOfRange { index, len: self.len });
        }
        if let Some(malformed) = self.malformed.as_ref().filter(|m| index >= m.step) {
            return Err(ResolutionError::MalformedTrace {
                step: malformed.step,
                reason: malformed.reason.clone(),
            });
        }

        // Segments are sorted by start and the first one starts at step 0
        let pos = self.segments.partition_point(|segment| segment.start <= index);
        let segment = self.segments[pos - 1];
        Ok(&self.frames[segment.frame.0])
    }

    /// The address whose code executes the given step
    pub fn address_at(&self, index: usize) -> Result<ExecutingAddress, ResolutionError> {
        self.frame_at(index).map(|frame| frame.address)
    }

    /// Nesting level of the frame executing the given step (0 = top level)
    pub fn depth_at(&self, index: usize) -> Result<usize, ResolutionError> {
        self.frame_at(index).map(|frame| frame.depth)
    }

    /// The frame stack at the given step, outermost first
    pub fn call_stack_at(&self, index: usize) -> Result<Vec<&CallFrame>, ResolutionError> {
        let mut stack = Vec::new();
        let mut current = Some(self.frame_at(index)?);
        while let Some(frame) = current {
            stack.push(frame);
            current = frame.parent.and_then(|parent| self.frame(parent));
        }
        stack.reverse();
        Ok(stack)
    }
}
