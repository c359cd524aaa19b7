pub mod actions;
pub mod events;
pub mod expr;
pub mod feedback;
pub mod models;
pub mod output;
pub mod scene;
pub mod schema;
