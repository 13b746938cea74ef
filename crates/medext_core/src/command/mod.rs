//! Command contribution runtime: handlers, keybindings and the gated router.

pub mod handler;
pub mod keybinding;
pub mod router;
