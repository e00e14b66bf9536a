//! The outbound seam between student use cases and the teacher connection.

use async_trait::async_trait;
use focusclass_core::ClassMessage;

/// Outbound message path to the teacher.
///
/// Sends are fire-and-forget from the caller's point of view: encode or
/// write failures are the connection's to log, and a dead link surfaces
/// through the connection's event channel rather than through this trait.
#[async_trait]
pub trait TeacherLink: Send + Sync {
    async fn send(&self, message: &ClassMessage);
}
