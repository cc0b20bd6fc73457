pub mod advs;
pub mod auth;
pub mod photos;
pub mod status;
