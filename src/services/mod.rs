pub mod auth_service;
pub mod conference_publisher;
pub mod conference_service;
