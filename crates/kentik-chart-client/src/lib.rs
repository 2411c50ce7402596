//! Kentik chart rendering client
//!
//! Defines the [`Renderer`] contract used by the image cache to obtain
//! rendered charts, and [`KentikClient`], its implementation against the
//! Kentik `query/topxchart` endpoint.

pub mod client;
pub mod error;
pub mod renderer;
pub mod types;

pub use client::KentikClient;
pub use error::{ClientError, RenderError, Result};
pub use renderer::Renderer;
pub use types::Chart;
