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

//! RDB Engine - Debug session coordinator for recorded execution traces
//!
//! The engine replays a trace fetched by a [`TraceProvider`], keeps a step cursor
//! over it, attributes every step to the contract executing it, maps steps to source
//! locations through the active compilation, and navigates between breakpoint hits.
//! Consumers follow the session through the typed notifications of [`SessionEvent`].

pub mod breakpoint;
pub use breakpoint::*;

pub mod config;
pub use config::*;

pub mod error;
pub use error::*;

pub mod events;
pub use events::*;

pub mod frames;
pub use frames::*;

pub mod navigator;
pub use navigator::*;

pub mod provider;
pub use provider::*;

pub mod session;
pub use session::*;

pub mod source;
pub use source::*;

pub mod store;
pub use store::*;

pub mod utils;
