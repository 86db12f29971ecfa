pub mod coalesce;
pub mod fork;
pub mod heatmap;
pub mod service;
pub mod spatial;
pub mod strategy;
