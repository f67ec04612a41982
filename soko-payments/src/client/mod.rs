pub mod retry;

pub use retry::{RetryController, RetryError, RetryOptions};
