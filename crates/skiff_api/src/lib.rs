pub mod api;
pub mod app_state;
pub mod auth;
pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod mail;
pub mod registry;
