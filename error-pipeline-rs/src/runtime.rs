//! # Host Runtime
//!
//! The failure channels a pipeline listens on: a non-fatal error handler, an
//! uncaught-exception handler and shutdown hooks, plus the reporting mask and
//! the "last recorded error" query. [`HostRuntime`] names these extension
//! points; [`ProcessRuntime`] provides them for a real process, with the
//! exception channel backed by the std panic hook.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use crate::exception::ExceptionHandle;
use crate::severity::{self, code, SeverityCode};
use crate::types::LastError;

/// Exit status used when a terminal condition stops the process
pub const FATAL_EXIT_CODE: i32 = 255;

/// Mask in effect before a pipeline escalates it
pub const DEFAULT_MASK: SeverityCode =
    code::ALL & !(code::E_NOTICE | code::E_STRICT | code::E_DEPRECATED | code::E_USER_DEPRECATED);

// Nesting depth of `silence` on the current thread
thread_local! {
    static SILENCE_DEPTH: Cell<u32> = Cell::new(0);
}

/// Receives `(severity_code, message, file, line)` for every non-fatal error
pub type ErrorHandler = Arc<dyn Fn(SeverityCode, &str, &str, u32) + Send + Sync>;

/// Receives every uncaught exception
pub type ExceptionHandler = Arc<dyn Fn(ExceptionHandle) + Send + Sync>;

/// Runs once at process end with the last recorded error, if any
pub type ShutdownHook = Arc<dyn Fn(Option<&LastError>) + Send + Sync>;

/// Which severities are currently reported
#[derive(Debug)]
pub struct ReportingMask {
    level: AtomicU32,
}

impl Default for ReportingMask {
    fn default() -> Self {
        Self::new(code::ALL)
    }
}

impl ReportingMask {
    pub fn new(level: SeverityCode) -> Self {
        Self {
            level: AtomicU32::new(level),
        }
    }

    /// Configured level, ignoring local suppression
    pub fn level(&self) -> SeverityCode {
        self.level.load(Ordering::SeqCst)
    }

    pub fn set(&self, level: SeverityCode) {
        self.level.store(level, Ordering::SeqCst);
    }

    /// Effective mask on the calling thread; zero inside [`silence`]
    pub fn current(&self) -> SeverityCode {
        if is_silenced() {
            0
        } else {
            self.level()
        }
    }

    pub fn allows(&self, severity_code: SeverityCode) -> bool {
        self.current() & severity_code != 0
    }
}

struct SilenceGuard;

impl Drop for SilenceGuard {
    fn drop(&mut self) {
        SILENCE_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Runs `f` with every severity suppressed on the current thread
pub fn silence<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    SILENCE_DEPTH.with(|depth| depth.set(depth.get() + 1));
    let _guard = SilenceGuard;
    f()
}

/// Returns true inside [`silence`]
pub fn is_silenced() -> bool {
    SILENCE_DEPTH.with(|depth| depth.get() > 0)
}

/// Extension points a pipeline registers against
pub trait HostRuntime: Send + Sync {
    /// Shared reporting mask
    fn reporting_mask(&self) -> Arc<ReportingMask>;

    /// Replaces the non-fatal error handler
    fn set_error_handler(&self, handler: ErrorHandler);

    /// Replaces the uncaught-exception handler
    fn set_exception_handler(&self, handler: ExceptionHandler);

    /// Adds a hook run once at process end
    fn register_shutdown(&self, hook: ShutdownHook);

    /// Most recently recorded error, if any
    fn last_error(&self) -> Option<LastError>;
}

struct RuntimeInner {
    mask: Arc<ReportingMask>,
    error_handler: RwLock<Option<ErrorHandler>>,
    exception_handler: RwLock<Option<ExceptionHandler>>,
    shutdown_hooks: Mutex<Vec<ShutdownHook>>,
    last_error: Mutex<Option<LastError>>,
    shut_down: AtomicBool,
    capture_panics: bool,
    panic_hook_installed: AtomicBool,
}

impl RuntimeInner {
    fn error_handler(&self) -> Option<ErrorHandler> {
        self.error_handler.read().ok().and_then(|h| h.clone())
    }

    fn exception_handler(&self) -> Option<ExceptionHandler> {
        self.exception_handler.read().ok().and_then(|h| h.clone())
    }

    fn record(&self, error: LastError) {
        match self.last_error.lock() {
            Ok(mut last) => *last = Some(error),
            Err(poisoned) => *poisoned.into_inner() = Some(error),
        }
    }
}

/// Failure channels of the running process
#[derive(Clone)]
pub struct ProcessRuntime {
    inner: Arc<RuntimeInner>,
}

impl std::fmt::Debug for ProcessRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRuntime")
            .field("mask", &self.inner.mask.level())
            .field("capture_panics", &self.inner.capture_panics)
            .field("shut_down", &self.inner.shut_down.load(Ordering::SeqCst))
            .finish()
    }
}

impl Default for ProcessRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRuntime {
    /// Runtime whose exception channel is the process panic hook
    pub fn new() -> Self {
        Self::with_panic_capture(true)
    }

    /// Runtime that never touches the process panic hook; exceptions reach
    /// the handler only through [`ProcessRuntime::throw`]
    pub fn without_panic_hook() -> Self {
        Self::with_panic_capture(false)
    }

    fn with_panic_capture(capture_panics: bool) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                mask: Arc::new(ReportingMask::new(DEFAULT_MASK)),
                error_handler: RwLock::new(None),
                exception_handler: RwLock::new(None),
                shutdown_hooks: Mutex::new(Vec::new()),
                last_error: Mutex::new(None),
                shut_down: AtomicBool::new(false),
                capture_panics,
                panic_hook_installed: AtomicBool::new(false),
            }),
        }
    }

    /// Raises a non-fatal error through the registered handler.
    ///
    /// Terminal codes never reach the handler; they are only recorded for the
    /// shutdown scan. Errors raised with no handler registered are recorded
    /// and logged.
    pub fn raise(&self, severity_code: SeverityCode, message: &str, file: &str, line: u32) {
        if severity::is_terminal(severity_code) {
            tracing::debug!(severity_code, file, line, "Terminal condition recorded");
            self.inner.record(LastError::new(severity_code, message, file, line));
            return;
        }

        match self.inner.error_handler() {
            Some(handler) => handler(severity_code, message, file, line),
            None => {
                self.inner.record(LastError::new(severity_code, message, file, line));
                if self.inner.mask.allows(severity_code) {
                    tracing::warn!(severity_code, file, line, error_message = message, "Unhandled error raised");
                }
            }
        }
    }

    /// Hands an exception to the registered handler, or logs it
    pub fn throw(&self, exception: ExceptionHandle) {
        match self.inner.exception_handler() {
            Some(handler) => handler(exception),
            None => tracing::error!(exception = %exception, "Uncaught exception with no handler"),
        }
    }

    /// Records a terminal condition, runs the shutdown hooks and exits
    pub fn fatal(&self, severity_code: SeverityCode, message: &str, file: &str, line: u32) -> ! {
        self.inner.record(LastError::new(severity_code, message, file, line));
        self.shutdown();
        std::process::exit(FATAL_EXIT_CODE)
    }

    /// Runs the shutdown hooks. Only the first call has any effect.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let last = self.last_error();
        let hooks: Vec<ShutdownHook> = match self.inner.shutdown_hooks.lock() {
            Ok(hooks) => hooks.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };

        tracing::debug!(hooks = hooks.len(), has_last_error = last.is_some(), "Running shutdown hooks");
        for hook in hooks {
            hook(last.as_ref());
        }
    }

    /// Runs [`ProcessRuntime::shutdown`] when dropped; keep it alive in `main`
    pub fn shutdown_guard(&self) -> ShutdownGuard {
        ShutdownGuard {
            runtime: self.clone(),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    fn install_panic_hook(&self) {
        if !self.inner.capture_panics || self.inner.panic_hook_installed.swap(true, Ordering::SeqCst) {
            return;
        }

        let runtime: Weak<RuntimeInner> = Arc::downgrade(&self.inner);
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let handler = runtime.upgrade().and_then(|inner| inner.exception_handler());
            match handler {
                Some(handler) => handler(ExceptionHandle::from_panic(info.payload(), info.location())),
                None => previous(info),
            }
        }));
        tracing::debug!("Panic hook installed");
    }
}

impl HostRuntime for ProcessRuntime {
    fn reporting_mask(&self) -> Arc<ReportingMask> {
        self.inner.mask.clone()
    }

    fn set_error_handler(&self, handler: ErrorHandler) {
        match self.inner.error_handler.write() {
            Ok(mut slot) => *slot = Some(handler),
            Err(poisoned) => *poisoned.into_inner() = Some(handler),
        }
    }

    fn set_exception_handler(&self, handler: ExceptionHandler) {
        match self.inner.exception_handler.write() {
            Ok(mut slot) => *slot = Some(handler),
            Err(poisoned) => *poisoned.into_inner() = Some(handler),
        }
        self.install_panic_hook();
    }

    fn register_shutdown(&self, hook: ShutdownHook) {
        match self.inner.shutdown_hooks.lock() {
            Ok(mut hooks) => hooks.push(hook),
            Err(poisoned) => poisoned.into_inner().push(hook),
        }
    }

    fn last_error(&self) -> Option<LastError> {
        match self.inner.last_error.lock() {
            Ok(last) => last.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Runs the shutdown hooks of a runtime when dropped
#[derive(Debug)]
pub struct ShutdownGuard {
    runtime: ProcessRuntime,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.runtime.shutdown();
    }
}

/// Raises a non-fatal error at the call site through a [`ProcessRuntime`]
#[macro_export]
macro_rules! raise {
    ($runtime:expr, $code:expr, $($arg:tt)+) => {
        $runtime.raise($code, &format!($($arg)+), file!(), line!())
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_silence_suppresses_on_current_thread() {
        let mask = ReportingMask::new(code::ALL);
        assert!(mask.allows(code::E_WARNING));

        let inside = silence(|| {
            assert!(is_silenced());
            silence(|| mask.allows(code::E_WARNING))
        });
        assert!(!inside);
        assert!(!is_silenced());
        assert!(mask.allows(code::E_WARNING));
    }

    #[test]
    fn test_silence_restored_after_panic() {
        let result = std::panic::catch_unwind(|| {
            silence(|| {
                panic!("inside silence");
            })
        });
        assert!(result.is_err());
        assert!(!is_silenced());
    }

    #[test]
    fn test_mask_level() {
        let mask = ReportingMask::new(code::E_WARNING | code::E_NOTICE);
        assert!(mask.allows(code::E_NOTICE));
        assert!(!mask.allows(code::E_DEPRECATED));
        mask.set(code::ALL);
        assert!(mask.allows(code::E_DEPRECATED));
    }

    #[test]
    fn test_default_mask_hides_notices() {
        let runtime = ProcessRuntime::without_panic_hook();
        let mask = runtime.reporting_mask();
        assert!(mask.allows(code::E_WARNING));
        assert!(!mask.allows(code::E_DEPRECATED));
    }

    #[test]
    fn test_raise_reaches_handler() {
        let runtime = ProcessRuntime::without_panic_hook();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        runtime.set_error_handler(Arc::new(move |c: SeverityCode, msg: &str, file: &str, line: u32| {
            sink.lock().unwrap().push((c, msg.to_string(), file.to_string(), line));
        }));

        raise!(runtime, code::E_USER_WARNING, "queue depth {}", 42);

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, code::E_USER_WARNING);
        assert_eq!(calls[0].1, "queue depth 42");
        assert!(calls[0].2.ends_with("runtime.rs"));
    }

    #[test]
    fn test_terminal_codes_only_recorded() {
        let runtime = ProcessRuntime::without_panic_hook();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        runtime.set_error_handler(Arc::new(move |_: SeverityCode, _: &str, _: &str, _: u32| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        runtime.raise(code::E_COMPILE_ERROR, "bad module", "plugin.rs", 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let last = runtime.last_error().unwrap();
        assert_eq!(last.severity_code, code::E_COMPILE_ERROR);
        assert_eq!(last.message, "bad module");
    }

    #[test]
    fn test_shutdown_runs_once_with_last_error() {
        let runtime = ProcessRuntime::without_panic_hook();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        runtime.register_shutdown(Arc::new(move |last: Option<&LastError>| {
            sink.lock().unwrap().push(last.map(|l| l.message.clone()));
        }));

        runtime.raise(code::E_ERROR, "out of memory", "alloc.rs", 12);
        {
            let _guard = runtime.shutdown_guard();
        }
        runtime.shutdown();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[Some("out of memory".to_string())]);
        assert!(runtime.is_shut_down());
    }

    #[test]
    fn test_throw_reaches_exception_handler() {
        let runtime = ProcessRuntime::without_panic_hook();
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        runtime.set_exception_handler(Arc::new(move |e: ExceptionHandle| {
            *sink.lock().unwrap() = Some(e.message);
        }));

        runtime.throw(ExceptionHandle::new("boom", "src/main.rs", 1));
        assert_eq!(seen.lock().unwrap().as_deref(), Some("boom"));
    }
}
