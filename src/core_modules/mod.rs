pub mod confirmation_window;
pub mod detection;
pub mod labels;
pub mod metric_extractor;
pub mod molting;
pub mod movement;
pub mod pixel;
pub mod region;
pub mod stage_thresholds;
pub mod utils;
