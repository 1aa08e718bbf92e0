//! Response-body decorator that runs a callback once the body is done.

use axum::body::Body;
use bytes::{Bytes, BytesMut};
use http_body::{Body as _, Frame, SizeHint};
use std::{
    pin::Pin,
    task::{ready, Context, Poll},
};
use tracing::warn;

type OnFinish = Box<dyn FnOnce(Option<Bytes>) + Send + 'static>;

/// Wraps a response body without altering what the client receives.
///
/// `on_finish` runs exactly once, when the inner body reports end of stream,
/// receiving the streamed bytes if capture was requested. It also runs on
/// drop when the body was never polled (HEAD responses, servers skipping
/// empty bodies) or the inner body had nothing left to send. A body that
/// errors or is dropped mid-stream never calls it.
///
/// Capture stops once the body grows past the limit; the callback then gets
/// `None`.
pub struct LoggedBody {
    inner: Body,
    on_finish: Option<OnFinish>,
    captured: Option<BytesMut>,
    limit: usize,
    polled: bool,
}

impl LoggedBody {
    pub fn new<F>(inner: Body, capture_limit: Option<usize>, on_finish: F) -> Self
    where
        F: FnOnce(Option<Bytes>) + Send + 'static,
    {
        Self {
            inner,
            on_finish: Some(Box::new(on_finish)),
            captured: capture_limit.map(|_| BytesMut::new()),
            limit: capture_limit.unwrap_or(0),
            polled: false,
        }
    }

    fn finish(&mut self) {
        if let Some(on_finish) = self.on_finish.take() {
            on_finish(self.captured.take().map(BytesMut::freeze));
        }
    }

    fn capture(&mut self, data: &Bytes) {
        let over = match self.captured.as_mut() {
            Some(buf) if buf.len() + data.len() > self.limit => true,
            Some(buf) => {
                buf.extend_from_slice(data);
                false
            }
            None => false,
        };

        if over {
            warn!(
                limit = self.limit,
                "Response body exceeds capture limit, logging it without a body"
            );
            self.captured = None;
        }
    }
}

impl http_body::Body for LoggedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        this.polled = true;
        let frame = ready!(Pin::new(&mut this.inner).poll_frame(cx));

        match &frame {
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    this.capture(data);
                }
            }
            Some(Err(_)) => {
                this.on_finish = None;
            }
            None => this.finish(),
        }

        Poll::Ready(frame)
    }

    fn is_end_stream(&self) -> bool {
        // Keep reporting "more to come" until the callback has run so the
        // final poll reaches us.
        self.on_finish.is_none() && self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for LoggedBody {
    fn drop(&mut self) {
        if self.on_finish.is_some() && (!self.polled || self.inner.is_end_stream()) {
            self.finish();
        }
    }
}
