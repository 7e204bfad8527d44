//! Filter, fetch and map EJScreen indicators for a single jurisdiction.
//!
//! The pipeline has three independent steps, each reading and writing flat
//! files: [`filter`] cuts the national tract file down to one state, [`study`]
//! fetches block group reports from the EJScreen broker through a [`getter::Getter`],
//! and [`merge`] joins tabular data onto TIGER/Line boundaries, which [`plot`]
//! can render as a choropleth.

pub mod config;
pub mod ejscreen;
pub mod filter;
pub mod getter;
pub mod merge;
pub mod plot;
pub mod study;
pub mod table;
pub mod tiger;
