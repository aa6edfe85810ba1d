//! Detection networks and their experiment descriptions.
mod exp;
mod yolox;

pub use self::exp::{Exp, get_exp};
pub use self::yolox::*;
