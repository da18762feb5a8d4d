//! Panic containment for engine tasks.
//!
//! [`supervise`] polls a future under `catch_unwind`. While a supervised
//! poll is on the stack the process panic hook captures a backtrace into a
//! thread local instead of printing, so the caller can log the panic once,
//! through `tracing`, with its stack.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Once;
use std::task::{Context, Poll};

thread_local! {
    static DEPTH: Cell<u32> = const { Cell::new(0) };
    static CAPTURED: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

static INSTALL_HOOK: Once = Once::new();

fn install_hook() {
    INSTALL_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if DEPTH.with(|d| d.get()) > 0 {
                CAPTURED.with(|c| *c.borrow_mut() = Some(Backtrace::force_capture()));
            } else {
                previous(info);
            }
        }));
    });
}

/// A panic caught inside a supervised future.
#[derive(Debug)]
pub struct PanicReport {
    pub message: String,
    pub backtrace: Option<Backtrace>,
}

impl PanicReport {
    fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self {
            message,
            backtrace: CAPTURED.with(|c| c.borrow_mut().take()),
        }
    }

    pub fn backtrace_string(&self) -> String {
        self.backtrace
            .as_ref()
            .map(|b| b.to_string())
            .unwrap_or_default()
    }
}

impl fmt::Display for PanicReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "panic: {}", self.message)
    }
}

pub struct Supervised<F> {
    inner: Pin<Box<F>>,
}

pub fn supervise<F: Future>(future: F) -> Supervised<F> {
    install_hook();
    Supervised {
        inner: Box::pin(future),
    }
}

impl<F: Future> Future for Supervised<F> {
    type Output = Result<F::Output, PanicReport>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        DEPTH.with(|d| d.set(d.get() + 1));
        let polled = panic::catch_unwind(AssertUnwindSafe(|| this.inner.as_mut().poll(cx)));
        DEPTH.with(|d| d.set(d.get() - 1));

        match polled {
            Ok(Poll::Ready(v)) => Poll::Ready(Ok(v)),
            Ok(Poll::Pending) => Poll::Pending,
            Err(payload) => Poll::Ready(Err(PanicReport::from_payload(payload))),
        }
    }
}
