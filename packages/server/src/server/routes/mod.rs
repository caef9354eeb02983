pub mod health;
pub mod tick;
pub mod webhook;

pub use health::health_handler;
pub use tick::tick_handler;
pub use webhook::webhook_handler;
