use parking_lot::Mutex;
use std::sync::Arc;

/// State shared between the scheduler task and HTTP handlers. Every handler
/// takes the lock for its whole body, so no two of them interleave.
pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}
