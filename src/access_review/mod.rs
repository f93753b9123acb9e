mod attributes;
mod err;
mod expand;
mod report;
mod reviewer;
pub(crate) mod test_utils;
mod verdict;

pub use attributes::*;
pub use err::*;
pub use expand::*;
pub use reviewer::*;
pub use verdict::*;
