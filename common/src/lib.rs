pub mod buffer2;
pub mod cancel_token;
pub mod file_utils;
pub mod fnv;
pub mod log_setup;
pub mod parallel;
pub mod shared_fn;

pub use buffer2::Buffer2;
pub use cancel_token::CancelToken;
pub use fnv::FnvHasher;
pub use shared_fn::SharedFn;
