// ABOUTME: Chat sources feeding the intake queue, plus the reconnect supervisor that runs them
// ABOUTME: HTTP chat injection lives on the overlay server instead

pub mod backoff;
pub mod stdin;
pub mod supervisor;

pub use backoff::{Backoff, BackoffConfig};
pub use stdin::StdinSource;
pub use supervisor::{spawn_supervised, supervise};
