pub mod paths;
pub mod text;
