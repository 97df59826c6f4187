pub mod settings;

pub use settings::PersistentSettings;
