//! `entrada-api` — HTTP admin surface for the FEL certification pipeline.

pub mod app;
