pub mod classifier;
pub mod fs_service;
pub mod organizer;
