pub mod bridge;
pub mod config;
pub mod error;
pub mod logging;
pub mod notifications;
pub mod presence;
pub mod registry;
pub mod router;
pub mod routes;
pub mod services;
pub mod state;
