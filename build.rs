//! Build script for rampart
//!
//! Embeds build-time information (git commit, dirty status, build timestamp)
//! surfaced through `rampart --version`.

fn main() {
    shadow_rs::ShadowBuilder::builder()
        .build()
        .expect("Failed to generate build info");
}
