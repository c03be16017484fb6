pub mod config;
pub mod environment;
pub mod form;
pub mod html;
pub mod observability;
pub mod render;
pub mod request;
pub mod response;
pub mod stress;
