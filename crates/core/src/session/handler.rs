use crate::wire::{NetReader, WireError};

use super::{ConnectionId, Session};

/// Passed to every user message handler.
pub struct HandlerContext<'a> {
    pub session: &'a mut Session,
    /// `None` when the message came from the server.
    pub from: Option<ConnectionId>,
}

/// Handler for one user message type. Implemented by closures too.
pub trait MessageHandler {
    fn handle(
        &mut self,
        ctx: &mut HandlerContext<'_>,
        reader: &mut NetReader<'_>,
    ) -> Result<(), WireError>;
}

impl<F> MessageHandler for F
where
    F: FnMut(&mut HandlerContext<'_>, &mut NetReader<'_>) -> Result<(), WireError>,
{
    fn handle(
        &mut self,
        ctx: &mut HandlerContext<'_>,
        reader: &mut NetReader<'_>,
    ) -> Result<(), WireError> {
        self(ctx, reader)
    }
}
