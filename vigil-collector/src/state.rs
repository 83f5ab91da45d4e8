use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

pub type Shared<T> = Arc<Mutex<T>>;
pub type SharedRw<T> = Arc<RwLock<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

pub fn new_rw_state<T>(value: T) -> SharedRw<T> {
    Arc::new(RwLock::new(value))
}
