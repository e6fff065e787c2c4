//! Interfaces the pipeline consumes from the application around it.

/// The camera side of a session.
///
/// A capture source pushes frames into
/// [`SessionController::on_frame`](crate::stream::SessionController::on_frame)
/// from whatever thread it captures on. The controller calls `unbind`
/// exactly once when the session reaches a terminal state; after that
/// the source should stop producing frames.
pub trait CaptureSource: Send + Sync {
    fn unbind(&self);
}

/// Where status and result text goes.
///
/// Called from the session's I/O task; implementations that render on a
/// UI thread do their own marshaling.
pub trait PresentationSink: Send + Sync {
    fn show(&self, status: &str);
}
