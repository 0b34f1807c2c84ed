pub mod credential;
pub mod workspace;
