pub mod auth;
pub mod recipes;
pub mod routes;
pub mod utils;
