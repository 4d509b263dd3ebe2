// Library root
// -----------
// The binary (`main.rs`) is a thin shell over these modules.
//
// Module responsibilities:
// - `config`: settings from the environment and `.env` files.
// - `errors`: the error type every step reports.
// - `imagegen`: image generation with a model fallback chain.
// - `api`: the scheduling service (media upload, draft publishing).
// - `pipeline`: one run from image to per-platform drafts.
// - `ui`: command line, interactive menu and progress output.
pub mod api;
pub mod config;
pub mod errors;
pub mod imagegen;
pub mod pipeline;
pub mod ui;
