pub mod layout;
pub mod renderer;
pub mod terminal;

pub use renderer::{to_json, write_summary};
pub use terminal::run_ui;
