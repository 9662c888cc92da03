pub mod activity;
pub mod hash;
pub mod html;
pub mod jwt;
