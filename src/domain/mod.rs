pub mod dates;
pub mod models;
pub mod sections;
pub mod template;
