use parking_lot::Mutex;
use std::sync::Arc;

/// État partagé entre handlers HTTP et tâches de fond.
/// Les sections critiques restent courtes : jamais de `.await` lock tenu.
pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}
