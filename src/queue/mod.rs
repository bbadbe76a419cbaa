/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Store-and-forward queue for payloads sent while the connection is not open.

mod outbound;

pub use outbound::{DrainReport, OutboundItem, OutboundQueue};
