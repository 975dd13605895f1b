pub mod videos;
pub mod youtube;
