pub mod image_upload;
pub mod staging;

pub use image_upload::ImageUploader;
pub use staging::StagingUploader;
