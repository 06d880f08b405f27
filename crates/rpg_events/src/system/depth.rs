/// Per-thread cascade depth tracking
use crate::error::BusError;
use compact_str::CompactString;
use std::cell::RefCell;
use std::collections::HashMap;
use tracing::warn;

thread_local! {
    // bus id -> publish frames currently open on this thread
    static DEPTHS: RefCell<HashMap<u64, u32>> = RefCell::new(HashMap::new());
}

/// Holds one level of publish nesting for a bus until dropped.
///
/// Depth is counted per thread, so publishes running concurrently on other
/// threads never see each other's frames. Dropping the guard (on success,
/// error or unwind) releases the level.
#[derive(Debug)]
pub(super) struct DepthGuard {
    bus_id: u64,
}

impl DepthGuard {
    /// Opens a frame, failing if the new depth is past `max`.
    pub(super) fn enter(bus_id: u64, max: u32, topic: &CompactString) -> Result<Self, BusError> {
        let depth = DEPTHS.with(|depths| {
            let mut depths = depths.borrow_mut();
            let depth = depths.entry(bus_id).or_insert(0);
            *depth += 1;
            *depth
        });
        let guard = DepthGuard { bus_id };

        if depth > max {
            warn!(
                "Event cascade depth exceeded on {}: current={}, max={}",
                topic, depth, max
            );
            return Err(BusError::CascadeDepthExceeded {
                depth,
                max,
                topic: topic.clone(),
            });
        }

        Ok(guard)
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        // try_with: the thread-local may already be gone during thread teardown
        let _ = DEPTHS.try_with(|depths| {
            let mut depths = depths.borrow_mut();
            if let Some(depth) = depths.get_mut(&self.bus_id) {
                *depth = depth.saturating_sub(1);
                if *depth == 0 {
                    depths.remove(&self.bus_id);
                }
            }
        });
    }
}

/// Publish frames open for `bus_id` on the calling thread.
pub(super) fn current_depth(bus_id: u64) -> u32 {
    DEPTHS
        .try_with(|depths| depths.borrow().get(&bus_id).copied().unwrap_or(0))
        .unwrap_or(0)
}
