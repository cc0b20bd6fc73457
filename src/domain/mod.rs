pub mod currency;
pub mod entities;
pub mod error;
pub mod ids;
pub mod moderation;
pub mod types;
