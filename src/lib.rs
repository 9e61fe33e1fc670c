#![allow(async_fn_in_trait)]
pub mod catalog;
pub mod download_plan;
pub mod error;
pub mod harvest;
pub mod item_selection;
pub mod item_stream;
