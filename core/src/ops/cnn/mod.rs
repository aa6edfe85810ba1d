//! Convolutions and pooling.
pub mod conv;
mod maxpool;

pub use self::conv::Conv;
pub use self::maxpool::MaxPool;
