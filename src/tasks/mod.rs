pub mod admission;
pub mod broadcaster;
pub mod listener;
pub mod lost;
pub mod membership;
pub mod reconcile;
