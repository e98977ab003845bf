pub mod light;
pub mod models;
pub mod scene;
pub mod settings;
