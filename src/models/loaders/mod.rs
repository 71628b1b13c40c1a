pub mod json_loader;

pub use json_loader::{load_json_dir, load_json_file, save_json};
