pub mod access_guard;

pub use access_guard::access_guard_middleware;
