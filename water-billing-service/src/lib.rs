//! Water utility billing: tariffs, meter readings, invoices, payments and
//! receivables aging.

pub mod config;
pub mod dtos;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;
