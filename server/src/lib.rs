//! Booking platform real-time delivery server library.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod auth;
pub mod chat;
pub mod config;
pub mod db;
pub mod hub;
pub mod routes;
pub mod state;
pub mod ws;
