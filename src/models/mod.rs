pub mod call;
pub mod conference;
pub mod token;

pub use call::*;
pub use conference::*;
pub use token::*;
