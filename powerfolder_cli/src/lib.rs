pub mod config;
pub mod error;
pub mod folder_service;
pub mod session;
pub mod settings;
