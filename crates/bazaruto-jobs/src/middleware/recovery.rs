use super::{Handler, Middleware};
use crate::error::JobError;
use futures::FutureExt;
use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Once};
use tracing::error;

thread_local! {
    /// Location and stack of the last panic raised on this thread.
    static PANIC_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static TRACE_HOOK: Once = Once::new();

/// Chains a panic hook that records the panicking stack before unwinding starts.
fn install_trace_hook() {
    TRACE_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let location = info
                .location()
                .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
                .unwrap_or_else(|| "unknown location".to_string());
            let trace = format!("panicked at {location}\n{}", Backtrace::force_capture());
            PANIC_TRACE.with(|slot| *slot.borrow_mut() = Some(trace));
            previous(info);
        }));
    });
}

/// The hook runs on the panicking thread, and `catch_unwind` returns within
/// the same poll, so the slot holds this panic's trace.
fn take_panic_trace() -> String {
    PANIC_TRACE
        .with(|slot| slot.borrow_mut().take())
        .unwrap_or_default()
}

/// Converts a panic inside the wrapped handler into [`JobError::Panic`].
///
/// The error carries the stack captured where the panic was raised.
#[derive(Debug, Clone, Copy, Default)]
pub struct Recovery;

impl Middleware for Recovery {
    fn name(&self) -> &'static str {
        "recovery"
    }

    fn wrap(&self, next: Handler) -> Handler {
        install_trace_hook();
        Arc::new(move |ctx, job| {
            let next = next.clone();
            Box::pin(async move {
                let job_id = ctx.job_id;
                let job_type = ctx.job_type.clone();

                match AssertUnwindSafe(async move { next(ctx, job).await })
                    .catch_unwind()
                    .await
                {
                    Ok(result) => result,
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        let backtrace = take_panic_trace();
                        error!(
                            job_id = %job_id,
                            job_type = %job_type,
                            panic = %message,
                            "Job panicked"
                        );
                        Err(JobError::Panic { message, backtrace })
                    }
                }
            })
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
