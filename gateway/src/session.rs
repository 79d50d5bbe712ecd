//! Session bracket: open, run one operation, always close.

use crate::error::GatewayError;
use crate::remote::RemoteClient;

/// Closes the session when dropped, including during a panic unwind.
struct CloseOnDrop<'a>(&'a mut dyn RemoteClient);

impl Drop for CloseOnDrop<'_> {
    fn drop(&mut self) {
        self.0.close_session();
    }
}

/// Run `op` inside a GLPI session.
///
/// `close_session` runs exactly once on every path, including a failed
/// `open_session` (where it is a no-op). Errors from closing never replace
/// the result of `op`.
pub fn with_session<R, F>(client: &mut dyn RemoteClient, op: F) -> Result<R, GatewayError>
where
    F: FnOnce(&dyn RemoteClient) -> Result<R, GatewayError>,
{
    with_session_for(client, Ok(()), |glpi, ()| op(glpi))
}

/// Run `op` on a validated inbound `input` inside a GLPI session.
///
/// The session is opened and closed whether or not `input` is valid. When
/// it is not, the input error is returned even if opening also failed, so
/// a malformed request reads as 400 no matter how GLPI is doing.
pub fn with_session_for<I, R, F>(
    client: &mut dyn RemoteClient,
    input: Result<I, GatewayError>,
    op: F,
) -> Result<R, GatewayError>
where
    F: FnOnce(&dyn RemoteClient, I) -> Result<R, GatewayError>,
{
    let mut guard = CloseOnDrop(client);
    let opened = guard.0.open_session();
    let input = input?;
    opened?;
    op(&*guard.0, input)
}
