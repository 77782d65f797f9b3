//! Wire and domain types exchanged with the support back-office API.

pub mod employee;
pub mod login;

pub use employee::{Employee, ProfileUpdate};
pub use login::{LoginRequest, LoginResponse};
