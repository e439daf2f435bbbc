pub mod events;
pub mod features;
pub mod health;
