#![forbid(unsafe_code)]

pub mod books;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod fetch;
pub mod formats;
pub mod helps;
pub mod html;
pub mod layout;
pub mod logging;
pub mod markdown;
pub mod paginate;
pub mod pipeline;
pub mod print;
pub mod quote;
pub mod rc_link;
pub mod render;
pub mod tsv;
pub mod usfm;
