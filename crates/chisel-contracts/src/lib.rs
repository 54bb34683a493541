pub mod events;
pub mod models;
pub mod params;
pub mod providers;
