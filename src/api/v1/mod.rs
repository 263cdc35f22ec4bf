pub mod appointment;
pub mod auth;
pub mod avatar;
pub mod message;
pub mod token;
pub mod user;
