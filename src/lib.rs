pub mod contribution;
pub mod dot_bracket;
pub mod motif;
pub mod progress;
pub mod session;
pub mod stream;
pub mod submission;
