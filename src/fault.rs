//! Scoped fault barrier for handler futures.
//!
//! [`contain`] polls a future under `catch_unwind` and turns a panic into a
//! [`Fault`]. While a barrier is being polled, a process-wide panic hook
//! records the panic message, its location and a backtrace for the current
//! thread instead of printing them; outside any barrier the previously
//! installed hook runs unchanged.
//!
//! A panic the future recovers from by itself (an inner `catch_unwind`) is
//! logged as a warning once the poll that caught it returns.

use futures::FutureExt;
use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::{poll_fn, Future};
use std::panic::{self, AssertUnwindSafe};
use std::pin::pin;
use std::sync::Once;
use std::task::Poll;
use tracing::warn;

thread_local! {
    static BARRIER_DEPTH: Cell<usize> = const { Cell::new(0) };
    static LAST_FAULT: RefCell<Option<Fault>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// A panic intercepted by [`contain`].
#[derive(Debug, Clone)]
pub struct Fault {
    /// Panic payload rendered as text
    pub message: String,
    /// Source location of the panic, when known
    pub location: Option<String>,
    /// Backtrace captured at the panic site
    pub backtrace: String,
}

impl Fault {
    fn from_payload(payload: &(dyn Any + Send)) -> Self {
        Self {
            message: payload_message(payload),
            location: None,
            backtrace: String::new(),
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} at {location}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

struct BarrierGuard;

impl BarrierGuard {
    fn enter() -> Self {
        BARRIER_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self
    }
}

impl Drop for BarrierGuard {
    fn drop(&mut self) {
        BARRIER_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

fn install_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if BARRIER_DEPTH.with(Cell::get) == 0 {
                previous(info);
                return;
            }
            let fault = Fault {
                message: payload_message(info.payload()),
                location: info.location().map(ToString::to_string),
                backtrace: Backtrace::force_capture().to_string(),
            };
            LAST_FAULT.with(|slot| *slot.borrow_mut() = Some(fault));
        }));
    });
}

fn take_recorded() -> Option<Fault> {
    LAST_FAULT.with(|slot| slot.borrow_mut().take())
}

fn report_recovered(recorded: Option<Fault>) {
    if let Some(fault) = recorded {
        warn!(
            panic = %fault.message,
            location = fault.location.as_deref().unwrap_or("unknown"),
            backtrace = %fault.backtrace,
            "Handler recovered from a panic"
        );
    }
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_owned()
    }
}

/// Run `fut` to completion, converting a panic during any poll into a
/// [`Fault`].
pub async fn contain<F: Future>(fut: F) -> Result<F::Output, Fault> {
    install_hook();
    let mut fut = pin!(AssertUnwindSafe(fut).catch_unwind());

    poll_fn(|cx| {
        let _guard = BarrierGuard::enter();
        let poll = fut.as_mut().poll(cx);
        let recorded = take_recorded();
        match poll {
            Poll::Pending => {
                report_recovered(recorded);
                Poll::Pending
            }
            Poll::Ready(Ok(output)) => {
                report_recovered(recorded);
                Poll::Ready(Ok(output))
            }
            Poll::Ready(Err(payload)) => {
                let fault = recorded.unwrap_or_else(|| Fault::from_payload(payload.as_ref()));
                Poll::Ready(Err(fault))
            }
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::capture;
    use std::time::Duration;
    use tracing::instrument::WithSubscriber;

    #[tokio::test]
    async fn test_passes_output_through() {
        assert_eq!(contain(async { 7 }).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_captures_panic_details() {
        let fault = contain(async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            panic!("handler exploded");
        })
        .await
        .unwrap_err();

        assert_eq!(fault.message, "handler exploded");
        assert!(fault.location.as_deref().unwrap_or_default().contains("fault.rs"));
        assert!(!fault.backtrace.is_empty());
        assert!(fault.to_string().starts_with("handler exploded at "));
    }

    #[tokio::test]
    async fn test_formatted_payload() {
        let code = 3;
        let fault = contain(async move { panic!("code {code}") }).await.unwrap_err();
        assert_eq!(fault.message, "code 3");
    }

    #[tokio::test]
    async fn test_depth_restored_after_fault() {
        let _ = contain(async {
            panic!("once");
        })
        .await;
        assert_eq!(BARRIER_DEPTH.with(Cell::get), 0);
        assert!(LAST_FAULT.with(|slot| slot.borrow().is_none()));
    }

    #[tokio::test]
    async fn test_recovered_panic_is_reported_and_cleared() {
        let (dispatch, captured) = capture::dispatch();

        let output = contain(async {
            let inner = panic::catch_unwind(|| panic!("recovered inside handler"));
            assert!(inner.is_err());
            tokio::task::yield_now().await;
            5
        })
        .with_subscriber(dispatch)
        .await;

        assert_eq!(output.unwrap(), 5);
        assert!(LAST_FAULT.with(|slot| slot.borrow().is_none()));

        let logged = captured.text();
        assert!(logged.contains("Handler recovered from a panic"));
        assert!(logged.contains("recovered inside handler"));
    }

    #[tokio::test]
    async fn test_recovered_panic_does_not_leak_into_next_fault() {
        let _ = contain(async {
            let _ = panic::catch_unwind(|| panic!("first"));
        })
        .await;

        let fault = contain(async {
            panic!("second");
        })
        .await
        .unwrap_err();
        assert_eq!(fault.message, "second");
    }

    #[test]
    fn test_payload_message_fallback() {
        assert_eq!(payload_message(&42_u8), "Unknown panic");
    }
}
