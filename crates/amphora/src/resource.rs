use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use crate::{
    error::{Fatal, FatalKind},
    location::Loc,
};

/// Default request memory budget: 32 MiB.
pub const DEFAULT_MEMORY_LIMIT: usize = 32 * 1024 * 1024;

/// Default request wall-clock budget: 30 seconds.
pub const DEFAULT_TIME_LIMIT: Duration = Duration::from_secs(30);

/// Default call-stack depth budget.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 1000;

/// Error returned when a resource limit is exceeded during execution.
///
/// These convert into non-catchable fatals: untrusted code must not be able
/// to suppress its own resource-limit violations.
#[derive(Debug, Clone)]
pub enum ResourceError {
    /// Maximum execution time exceeded.
    Time { limit: Duration, elapsed: Duration },
    /// Maximum memory usage exceeded.
    Memory { limit: usize, requested: usize },
    /// Maximum call depth exceeded.
    Recursion { limit: usize, depth: usize },
    /// The external cancellation token fired.
    Cancelled,
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Time { limit, elapsed } => {
                write!(f, "time limit exceeded: {elapsed:?} > {limit:?}")
            }
            Self::Memory { limit, requested } => {
                write!(f, "memory limit exceeded: {requested} bytes > {limit} bytes")
            }
            Self::Recursion { limit, depth } => {
                write!(f, "call depth exceeded: {depth} > {limit}")
            }
            Self::Cancelled => write!(f, "execution cancelled"),
        }
    }
}

impl std::error::Error for ResourceError {}

impl ResourceError {
    /// Converts this limit violation into the fatal the script observes,
    /// using the language's canonical diagnostic texts.
    #[must_use]
    pub fn into_fatal(self, loc: Loc) -> Fatal {
        match self {
            Self::Time { limit, .. } => Fatal::new(
                FatalKind::Timeout,
                format!("Maximum execution time of {} seconds exceeded", limit.as_secs()),
                loc,
            ),
            Self::Memory { limit, requested } => Fatal::new(
                FatalKind::OutOfMemory,
                format!("Allowed memory size of {limit} bytes exhausted (tried to allocate {requested} bytes)"),
                loc,
            ),
            Self::Recursion { limit, .. } => Fatal::new(
                FatalKind::RecursionDepth,
                format!("Maximum function nesting level of {limit} reached"),
                loc,
            ),
            Self::Cancelled => Fatal::new(FatalKind::Cancelled, "Request cancelled", loc),
        }
    }
}

/// Configuration for per-request resource limits.
///
/// Every limit is optional; `ResourceLimits::default()` applies the
/// language's stock budgets, `ResourceLimits::unlimited()` disables them all
/// (except call depth, which always has a ceiling to protect the host
/// stack).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ResourceLimits {
    /// Maximum heap memory in bytes (approximate).
    pub max_memory: Option<usize>,
    /// Maximum wall-clock execution time.
    pub max_duration: Option<Duration>,
    /// Maximum function call depth.
    pub max_call_depth: Option<usize>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory: Some(DEFAULT_MEMORY_LIMIT),
            max_duration: Some(DEFAULT_TIME_LIMIT),
            max_call_depth: Some(DEFAULT_MAX_CALL_DEPTH),
        }
    }
}

impl ResourceLimits {
    /// All limits off, apart from the host-stack-protecting call depth.
    #[must_use]
    pub fn unlimited() -> Self {
        Self {
            max_memory: None,
            max_duration: None,
            max_call_depth: Some(DEFAULT_MAX_CALL_DEPTH),
        }
    }

    #[must_use]
    pub fn max_memory(mut self, limit: usize) -> Self {
        self.max_memory = Some(limit);
        self
    }

    #[must_use]
    pub fn max_duration(mut self, limit: Duration) -> Self {
        self.max_duration = Some(limit);
        self
    }

    #[must_use]
    pub fn max_call_depth(mut self, limit: usize) -> Self {
        self.max_call_depth = Some(limit);
        self
    }
}

/// Shared flag a host can flip to abort a running request.
///
/// Cloning shares the flag. The meter polls it at every tick.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-request resource accounting: deadline, memory meter, call depth.
///
/// The deadline is derived from `max_duration` at construction and can be
/// moved by the host afterwards; memory is tracked as a running byte
/// counter debited by `alloc` and credited by `free`.
#[derive(Debug)]
pub struct ResourceMeter {
    limits: ResourceLimits,
    start: Instant,
    deadline: Option<Instant>,
    current_memory: usize,
    cancel: CancelToken,
}

impl ResourceMeter {
    #[must_use]
    pub fn new(limits: ResourceLimits) -> Self {
        let start = Instant::now();
        let deadline = limits.max_duration.map(|d| start + d);
        Self {
            limits,
            start,
            deadline,
            current_memory: 0,
            cancel: CancelToken::new(),
        }
    }

    #[must_use]
    pub fn start_time(&self) -> Instant {
        self.start
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Moves the wall-clock deadline.
    pub fn set_deadline(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    #[must_use]
    pub fn current_memory(&self) -> usize {
        self.current_memory
    }

    /// Debits `size` bytes against the memory budget.
    pub fn alloc(&mut self, size: usize) -> Result<(), ResourceError> {
        if let Some(max) = self.limits.max_memory {
            let requested = self.current_memory.saturating_add(size);
            if requested > max {
                return Err(ResourceError::Memory { limit: max, requested });
            }
        }
        self.current_memory = self.current_memory.saturating_add(size);
        Ok(())
    }

    /// Credits bytes back (value dropped or buffer discarded).
    pub fn free(&mut self, size: usize) {
        self.current_memory = self.current_memory.saturating_sub(size);
    }

    /// Polled at statement boundaries: deadline first, then cancellation.
    pub fn check_time(&self) -> Result<(), ResourceError> {
        if let Some(deadline) = self.deadline {
            let now = Instant::now();
            if now >= deadline {
                // a host-moved deadline reports its own span, not the ini default
                let limit = deadline.saturating_duration_since(self.start);
                return Err(ResourceError::Time {
                    limit,
                    elapsed: now.duration_since(self.start),
                });
            }
        }
        if self.cancel.is_cancelled() {
            return Err(ResourceError::Cancelled);
        }
        Ok(())
    }

    /// Checked before pushing a call frame; `depth` is the depth before the
    /// new frame.
    pub fn check_call_depth(&self, depth: usize) -> Result<(), ResourceError> {
        if let Some(max) = self.limits.max_call_depth
            && depth >= max
        {
            return Err(ResourceError::Recursion {
                limit: max,
                depth: depth + 1,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_meter_debits_and_credits() {
        let mut meter = ResourceMeter::new(ResourceLimits::unlimited().max_memory(100));
        meter.alloc(60).unwrap();
        meter.free(30);
        meter.alloc(60).unwrap();
        assert!(matches!(meter.alloc(20), Err(ResourceError::Memory { .. })));
    }

    #[test]
    fn deadline_monotonicity() {
        let mut meter = ResourceMeter::new(ResourceLimits::unlimited());
        assert!(meter.check_time().is_ok());
        meter.set_deadline(Instant::now() - Duration::from_millis(1));
        assert!(matches!(meter.check_time(), Err(ResourceError::Time { .. })));
        // a later tick still errors
        assert!(meter.check_time().is_err());
    }

    #[test]
    fn cancellation_observed_by_tick() {
        let meter = ResourceMeter::new(ResourceLimits::unlimited());
        let token = meter.cancel_token();
        assert!(meter.check_time().is_ok());
        token.cancel();
        assert!(matches!(meter.check_time(), Err(ResourceError::Cancelled)));
    }
}
