/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

/// Module containing the error type used throughout the library.
///
/// This module provides [`ChannelError`], which covers transport, storage,
/// configuration and state errors surfaced by the connection layer.
pub mod error;
mod util;

mod logger;

pub use error::ChannelError;
pub use logger::{LOG_LEVEL_ENV, setup_logger, setup_logger_with_level};
pub use util::{setup_signal_hook, unix_millis};
