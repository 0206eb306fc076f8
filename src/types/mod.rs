// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Shared types passed between the cache, the router and the controller.

pub mod key;
pub mod notification;
pub mod state;

pub use key::ObjectKey;
pub use notification::{DeletedObject, Notification};
pub use state::ControllerState;
