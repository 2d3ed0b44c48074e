//! lookdev - headless HDRI look-development viewer.
//!
//! Replays a JSON session (model, HDRI environment, sun, animation and a
//! scripted command timeline) and writes a PNG still or PNG sequence:
//! - environment lighting with a detected or calibrated sun direction
//! - shadow-catcher ground with configurable shadow quality
//! - progressive accumulation once the scene settles

mod app;
mod assets;
mod render;
mod scene;
mod viewer;

use std::process::ExitCode;

fn main() -> ExitCode {
    app::run()
}
