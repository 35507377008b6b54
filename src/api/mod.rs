pub mod client;
pub mod invites;
pub mod token;

#[cfg(test)]
mod tests;

pub use client::*;
pub use invites::{HttpInviteApi, InviteApi};
pub use token::{HttpTokenProvider, TokenProvider};
