use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgressEvent {
    ClientRequestStarted,
    RequestContentLength(u64),
    HttpRequestStarted,
    HttpRequestCompleted,
    HttpResponseStarted,
    HttpResponseCompleted,
    ResponseContentLength(u64),
    ClientRequestRetry,
    ClientRequestSucceeded,
    ClientRequestFailed,
}

/// Receives lifecycle milestones of a call. Delivery is best effort.
pub trait ProgressListener: Send + Sync {
    fn progress_changed(&self, event: ProgressEvent);
}

impl<F> ProgressListener for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn progress_changed(&self, event: ProgressEvent) {
        self(event)
    }
}

pub(crate) fn publish(listener: Option<&Arc<dyn ProgressListener>>, event: ProgressEvent) {
    let Some(listener) = listener else {
        return;
    };
    if catch_unwind(AssertUnwindSafe(|| listener.progress_changed(event))).is_err() {
        warn!(?event, "progress listener panicked; event dropped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::{ProgressEvent, ProgressListener, publish};

    #[test]
    fn publish_delivers_to_listener() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener: Arc<dyn ProgressListener> = Arc::new(move |event: ProgressEvent| {
            sink.lock().expect("lock").push(event);
        });
        publish(Some(&listener), ProgressEvent::HttpRequestStarted);
        assert_eq!(
            *seen.lock().expect("lock"),
            vec![ProgressEvent::HttpRequestStarted]
        );
    }

    #[test]
    fn panicking_listener_does_not_escape() {
        let listener: Arc<dyn ProgressListener> = Arc::new(|_event: ProgressEvent| {
            panic!("listener bug");
        });
        publish(Some(&listener), ProgressEvent::ClientRequestStarted);
        publish(None, ProgressEvent::ClientRequestStarted);
    }
}
