//! Starchart.
//!
//! Starchart is the web service behind an animated gallery landing page. It
//! keeps a bounded in-memory cache of image descriptors fetched from an
//! upstream listing API, serves random samples of them with their URLs
//! rewritten onto same-origin proxy paths, and forwards image requests to
//! the mirror hosts with the headers those hosts insist on.

#![warn(missing_docs, missing_debug_implementations, clippy::all)]

mod cli;
mod endpoints;
mod logging;
mod server;
mod service;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
